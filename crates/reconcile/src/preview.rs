use std::sync::Arc;

use fatura_core::{BillingCycle, Money, StatementLine, UserId};
use fatura_import::{partition, MatchCandidate, MatchScorer, MatchableTransaction, PaymentMarker, PaymentReceived};
use fatura_storage::{find_potential_bill_payments, get_credit_card_status, DbPool};
use serde::Serialize;
use tracing::debug;

use crate::diagnostics::{DiagnosticSink, MatchDiagnostic, NullSink};
use crate::error::{parse_cycle, ReconcileError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct PreviewResult {
    pub billing_cycle: BillingCycle,
    pub payment_received: Option<PaymentReceived>,
    /// Signed sum of the lines to import, statement convention.
    pub total_amount: Money,
    pub transactions_to_import: Vec<StatementLine>,
    /// Bill payments matching the payment received, best first.
    pub matches: Vec<MatchCandidate>,
    pub has_existing_import: bool,
}

impl PreviewResult {
    pub fn payment_received_amount(&self) -> Option<Money> {
        self.payment_received.as_ref().map(|p| p.amount)
    }

    pub fn best_match(&self) -> Option<&MatchCandidate> {
        self.matches.first()
    }
}

/// Read-only: shows what importing a statement would do.
pub struct ImportPreviewer {
    pool: DbPool,
    scorer: MatchScorer,
    marker: PaymentMarker,
    sink: Arc<dyn DiagnosticSink>,
}

impl ImportPreviewer {
    pub fn new(pool: DbPool, scorer: MatchScorer, marker: PaymentMarker) -> Self {
        Self {
            pool,
            scorer,
            marker,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub async fn preview(&self, user_id: UserId, billing_cycle: &str, lines: &[StatementLine]) -> Result<PreviewResult> {
        let cycle = parse_cycle(billing_cycle)?;
        if lines.is_empty() {
            return Err(ReconcileError::EmptyTransactions);
        }

        let statement = partition(lines, &self.marker);
        let status = get_credit_card_status(&self.pool, user_id, cycle).await?;

        let matches = match &statement.payment_received {
            Some(payment) => self.rank_bills(user_id, cycle, payment).await?,
            None => Vec::new(),
        };

        debug!(
            user_id = %user_id,
            cycle = %cycle,
            lines = statement.items.len(),
            matches = matches.len(),
            "Previewed statement import"
        );

        Ok(PreviewResult {
            billing_cycle: cycle,
            payment_received: statement.payment_received,
            total_amount: statement.total_amount,
            transactions_to_import: statement.items,
            matches,
            has_existing_import: status.has_existing_import(),
        })
    }

    async fn rank_bills(
        &self,
        user_id: UserId,
        cycle: BillingCycle,
        payment: &PaymentReceived,
    ) -> Result<Vec<MatchCandidate>> {
        let bills = find_potential_bill_payments(&self.pool, user_id, cycle.import_window()).await?;
        let candidates: Vec<MatchableTransaction> = bills.iter().map(matchable).collect();

        let scored = self.scorer.score_all(payment.amount, payment.date, &candidates);
        for candidate in &scored {
            self.sink.emit(scored_event(cycle, candidate));
        }
        Ok(scored.into_iter().filter(|c| c.score.is_match).collect())
    }
}

pub(crate) fn matchable(tx: &fatura_core::Transaction) -> MatchableTransaction {
    MatchableTransaction {
        id: tx.id,
        date: tx.date,
        description: tx.description.clone(),
        amount: tx.amount,
    }
}

pub(crate) fn scored_event(cycle: BillingCycle, candidate: &MatchCandidate) -> MatchDiagnostic {
    MatchDiagnostic::CandidateScored {
        billing_cycle: cycle,
        bill_id: candidate.transaction.id,
        is_match: candidate.score.is_match,
        score: candidate.score.score,
        confidence: candidate.score.confidence,
        date_difference_days: candidate.score.date_difference_days,
    }
}
