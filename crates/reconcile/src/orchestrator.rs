use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use fatura_core::{BillingCycle, Money, TransactionId, UserId};
use fatura_import::{ConfidenceTier, MatchCandidate, MatchScorer, MatchableTransaction};
use fatura_storage::{
    find_potential_bill_payments, get_credit_card_status, list_pending_cycles, list_statement_imports, DbPool,
    PendingCycle, StatementImport,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::diagnostics::{CycleOutcome, DiagnosticSink, MatchDiagnostic, NullSink};
use crate::error::{parse_cycle, ReconcileError, Result};
use crate::lifecycle::{CollapseResult, ExpansionLifecycle};
use crate::preview::{matchable, scored_event};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleTotals {
    pub billing_cycle: BillingCycle,
    pub transaction_count: i64,
    pub total_amount: Money,
    /// Date the bill payments were compared against.
    pub reference_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoLinkedCycle {
    #[serde(flatten)]
    pub totals: CycleTotals,
    pub bill_payment_id: TransactionId,
    pub linked_count: u64,
    pub amount_difference: Money,
    pub confidence: ConfidenceTier,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionNeeded {
    #[serde(flatten)]
    pub totals: CycleTotals,
    pub candidates: Vec<MatchCandidate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationSummary {
    pub auto_linked: Vec<AutoLinkedCycle>,
    pub requires_selection: Vec<SelectionNeeded>,
    pub no_match: Vec<CycleTotals>,
    pub auto_linked_count: usize,
    pub requires_selection_count: usize,
    pub no_match_count: usize,
}

impl ReconciliationSummary {
    fn finish(mut self) -> Self {
        self.auto_linked_count = self.auto_linked.len();
        self.requires_selection_count = self.requires_selection.len();
        self.no_match_count = self.no_match.len();
        self
    }

    pub fn processed(&self) -> usize {
        self.auto_linked_count + self.requires_selection_count + self.no_match_count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManualLinkResult {
    pub billing_cycle: BillingCycle,
    pub bill_payment_id: TransactionId,
    pub linked_count: u64,
    pub original_amount: Money,
    pub cycle_total: Money,
    /// Bill magnitude minus the cycle total.
    pub amount_difference: Money,
    pub amount_difference_percent: f64,
    pub has_mismatch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationCycleState {
    Pending,
    Linked,
    Mismatched,
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleStatus {
    pub billing_cycle: BillingCycle,
    pub state: ReconciliationCycleState,
    pub transaction_count: i64,
    pub total_amount: Money,
    pub bill_payment_id: Option<TransactionId>,
    pub amount_difference: Option<Money>,
}

enum Classification {
    NoMatch,
    AutoLink(MatchCandidate),
    Select(Vec<MatchCandidate>),
}

fn classify(mut plausible: Vec<MatchCandidate>) -> Classification {
    if plausible.is_empty() {
        return Classification::NoMatch;
    }
    if plausible.len() == 1 && plausible[0].score.confidence.is_auto_linkable() {
        if let Some(only) = plausible.pop() {
            return Classification::AutoLink(only);
        }
    }
    Classification::Select(plausible)
}

/// Finds bill payments for every cycle that has itemized rows but no bill.
/// Only unambiguous cycles are written; each in its own transaction, so a
/// cancelled run keeps the cycles it already linked.
pub struct ReconciliationOrchestrator {
    pool: DbPool,
    lifecycle: ExpansionLifecycle,
    scorer: MatchScorer,
    mismatch_threshold: Money,
    sink: Arc<dyn DiagnosticSink>,
}

impl ReconciliationOrchestrator {
    pub fn new(pool: DbPool, scorer: MatchScorer, mismatch_threshold: Money) -> Self {
        Self {
            lifecycle: ExpansionLifecycle::new(pool.clone()),
            pool,
            scorer,
            mismatch_threshold,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub async fn trigger(&self, user_id: UserId, billing_cycle: Option<&str>) -> Result<ReconciliationSummary> {
        let pending = match billing_cycle {
            Some(raw) => vec![self.pending_cycle(user_id, parse_cycle(raw)?).await?],
            None => list_pending_cycles(&self.pool, user_id).await?,
        };

        let mut summary = ReconciliationSummary::default();
        for cycle in pending {
            self.reconcile_cycle(user_id, cycle, &mut summary).await?;
        }
        let summary = summary.finish();

        info!(
            user_id = %user_id,
            auto_linked = summary.auto_linked_count,
            requires_selection = summary.requires_selection_count,
            no_match = summary.no_match_count,
            "Reconciliation finished"
        );
        Ok(summary)
    }

    async fn pending_cycle(&self, user_id: UserId, cycle: BillingCycle) -> Result<PendingCycle> {
        let status = get_credit_card_status(&self.pool, user_id, cycle).await?;
        if status.linked_bill().is_some() {
            return Err(ReconcileError::CycleAlreadyLinked(cycle));
        }
        status.pending.ok_or(ReconcileError::PendingNotFound(cycle))
    }

    async fn reconcile_cycle(
        &self,
        user_id: UserId,
        pending: PendingCycle,
        summary: &mut ReconciliationSummary,
    ) -> Result<()> {
        let cycle = pending.billing_cycle;
        let totals = self.totals(user_id, &pending).await?;
        let plausible = self.plausible_bills(user_id, &totals).await?;
        let plausible_count = plausible.len();

        let outcome = match classify(plausible) {
            Classification::NoMatch => {
                summary.no_match.push(totals);
                CycleOutcome::NoMatch
            }
            Classification::Select(candidates) => {
                summary.requires_selection.push(SelectionNeeded { totals, candidates });
                CycleOutcome::RequiresSelection
            }
            Classification::AutoLink(candidate) => {
                let bill_id = candidate.transaction.id;
                let difference = candidate.score.amount_difference;
                match self.lifecycle.link_pending(user_id, bill_id, cycle, difference).await {
                    Ok(linked) => {
                        summary.auto_linked.push(AutoLinkedCycle {
                            totals,
                            bill_payment_id: bill_id,
                            linked_count: linked.linked_count,
                            amount_difference: difference,
                            confidence: candidate.score.confidence,
                            score: candidate.score.score,
                        });
                        CycleOutcome::AutoLinked
                    }
                    // The bill was expanded by someone else after scoring.
                    Err(ReconcileError::BillAlreadyExpanded(_)) => {
                        self.conflict(cycle, bill_id, "bill already expanded");
                        summary.requires_selection.push(SelectionNeeded {
                            totals,
                            candidates: vec![candidate],
                        });
                        CycleOutcome::RequiresSelection
                    }
                    // The cycle was resolved concurrently; nothing left to do.
                    Err(err @ (ReconcileError::CycleAlreadyLinked(_) | ReconcileError::PendingNotFound(_))) => {
                        self.conflict(cycle, bill_id, &err.to_string());
                        return Ok(());
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        self.sink.emit(MatchDiagnostic::CycleClassified {
            billing_cycle: cycle,
            outcome,
            plausible_candidates: plausible_count,
        });
        Ok(())
    }

    fn conflict(&self, cycle: BillingCycle, bill_id: TransactionId, reason: &str) {
        warn!(cycle = %cycle, bill_id = %bill_id, reason, "Auto-link lost a race");
        self.sink.emit(MatchDiagnostic::LinkConflict {
            billing_cycle: cycle,
            bill_id,
            reason: reason.to_string(),
        });
    }

    /// The cycle's total, compared against the date the card network
    /// received the payment when the statement recorded it.
    async fn totals(&self, user_id: UserId, pending: &PendingCycle) -> Result<CycleTotals> {
        let import = fatura_storage::get_statement_import(&self.pool, user_id, pending.billing_cycle).await?;
        Ok(CycleTotals {
            billing_cycle: pending.billing_cycle,
            transaction_count: pending.transaction_count,
            total_amount: pending.total_amount,
            reference_date: import
                .and_then(|i| i.payment_received_date)
                .unwrap_or(pending.last_date),
        })
    }

    async fn plausible_bills(&self, user_id: UserId, totals: &CycleTotals) -> Result<Vec<MatchCandidate>> {
        let cycle = totals.billing_cycle;
        let bills = find_potential_bill_payments(&self.pool, user_id, cycle.import_window()).await?;
        let candidates: Vec<MatchableTransaction> = bills.iter().map(matchable).collect();

        let scored = self
            .scorer
            .score_all(totals.total_amount, totals.reference_date, &candidates);
        for candidate in &scored {
            self.sink.emit(scored_event(cycle, candidate));
        }
        Ok(scored.into_iter().filter(|c| c.score.is_match).collect())
    }

    /// Links a cycle's pending rows to a bill the user picked. Outside the
    /// reconciliation tolerance this fails unless `force` is set, in which
    /// case the mismatch is recorded.
    pub async fn manual_link(
        &self,
        user_id: UserId,
        billing_cycle: &str,
        bill_id: TransactionId,
        force: bool,
    ) -> Result<ManualLinkResult> {
        let cycle = parse_cycle(billing_cycle)?;
        let bill = self.lifecycle.find_owned_bill(user_id, bill_id).await?;
        if bill.is_expanded() {
            return Err(ReconcileError::BillAlreadyExpanded(bill_id));
        }
        let pending = self.pending_cycle(user_id, cycle).await?;
        let totals = self.totals(user_id, &pending).await?;

        let score = self
            .scorer
            .score(&matchable(&bill), totals.total_amount, totals.reference_date);
        if !score.is_amount_match && !force {
            return Err(ReconcileError::AmountMismatch {
                bill_amount: bill.amount.abs(),
                cycle_total: totals.total_amount,
                difference: score.amount_difference,
                percent: score.amount_difference_percent,
            });
        }

        let linked = self
            .lifecycle
            .link_pending(user_id, bill_id, cycle, score.amount_difference)
            .await?;
        let has_mismatch = !score.is_amount_match;
        if has_mismatch {
            warn!(
                user_id = %user_id,
                cycle = %cycle,
                bill_id = %bill_id,
                difference = %score.amount_difference,
                "Forced link outside tolerance"
            );
        }

        Ok(ManualLinkResult {
            billing_cycle: cycle,
            bill_payment_id: bill_id,
            linked_count: linked.linked_count,
            original_amount: linked.original_amount,
            cycle_total: totals.total_amount,
            amount_difference: score.amount_difference,
            amount_difference_percent: score.amount_difference_percent,
            has_mismatch,
        })
    }

    pub async fn unlink(&self, user_id: UserId, bill_id: TransactionId) -> Result<CollapseResult> {
        self.lifecycle.collapse(user_id, bill_id).await
    }

    /// Every cycle with an import or pending rows, oldest first.
    pub async fn status(&self, user_id: UserId) -> Result<Vec<CycleStatus>> {
        let mut imports: BTreeMap<BillingCycle, StatementImport> = list_statement_imports(&self.pool, user_id)
            .await?
            .into_iter()
            .map(|i| (i.billing_cycle, i))
            .collect();
        let pending: BTreeMap<BillingCycle, PendingCycle> = list_pending_cycles(&self.pool, user_id)
            .await?
            .into_iter()
            .map(|p| (p.billing_cycle, p))
            .collect();

        let mut cycles: Vec<BillingCycle> = imports.keys().chain(pending.keys()).copied().collect();
        cycles.sort();
        cycles.dedup();

        let mut report = Vec::with_capacity(cycles.len());
        for cycle in cycles {
            let import = imports.remove(&cycle);
            let status = match (import, pending.get(&cycle)) {
                (Some(import), _) if import.bill_payment_id.is_some() => {
                    let difference = import.amount_difference.unwrap_or_default();
                    let state = if difference.abs() > self.mismatch_threshold {
                        ReconciliationCycleState::Mismatched
                    } else {
                        ReconciliationCycleState::Linked
                    };
                    CycleStatus {
                        billing_cycle: cycle,
                        state,
                        transaction_count: import.imported_count,
                        total_amount: import.total_amount,
                        bill_payment_id: import.bill_payment_id,
                        amount_difference: Some(difference),
                    }
                }
                (_, Some(p)) => {
                    let totals = self.totals(user_id, p).await?;
                    let state = if self.plausible_bills(user_id, &totals).await?.is_empty() {
                        ReconciliationCycleState::Unmatched
                    } else {
                        ReconciliationCycleState::Pending
                    };
                    CycleStatus {
                        billing_cycle: cycle,
                        state,
                        transaction_count: p.transaction_count,
                        total_amount: p.total_amount,
                        bill_payment_id: None,
                        amount_difference: None,
                    }
                }
                (Some(import), None) => CycleStatus {
                    billing_cycle: cycle,
                    state: ReconciliationCycleState::Pending,
                    transaction_count: 0,
                    total_amount: import.total_amount,
                    bill_payment_id: None,
                    amount_difference: None,
                },
                (None, None) => continue,
            };
            report.push(status);
        }
        Ok(report)
    }
}
