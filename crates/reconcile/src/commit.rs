use std::sync::Arc;

use chrono::{DateTime, Utc};
use fatura_core::{BillingCycle, Money, NewTransaction, StatementLine, TransactionId, UserId};
use fatura_import::{partition, CategoryMatcher, PaymentMarker};
use fatura_storage::{get_statement_import, import_standalone, DbPool, NewStatementImport};
use serde::Serialize;
use tracing::{info, warn};

use crate::diagnostics::{DiagnosticSink, MatchDiagnostic, NullSink};
use crate::error::{parse_cycle, ReconcileError, Result};
use crate::lifecycle::ExpansionLifecycle;

#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub user_id: UserId,
    pub billing_cycle: String,
    /// `None` imports the lines without a bill payment.
    pub bill_payment_id: Option<TransactionId>,
    pub lines: Vec<StatementLine>,
    pub apply_auto_category: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkedBill {
    pub id: TransactionId,
    pub original_amount: Money,
    /// Bill magnitude minus the imported total.
    pub amount_difference: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportResult {
    pub billing_cycle: BillingCycle,
    pub imported_count: usize,
    pub categorized_count: usize,
    pub transaction_ids: Vec<TransactionId>,
    pub bill_payment: Option<LinkedBill>,
    pub imported_at: DateTime<Utc>,
}

/// Writes a previewed statement, expanding the chosen bill payment if any.
pub struct ImportCommitter {
    pool: DbPool,
    lifecycle: ExpansionLifecycle,
    marker: PaymentMarker,
    categories: Option<Arc<dyn CategoryMatcher>>,
    sink: Arc<dyn DiagnosticSink>,
}

impl ImportCommitter {
    pub fn new(pool: DbPool, marker: PaymentMarker) -> Self {
        Self {
            lifecycle: ExpansionLifecycle::new(pool.clone()),
            pool,
            marker,
            categories: None,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_categories(mut self, matcher: Arc<dyn CategoryMatcher>) -> Self {
        self.categories = Some(matcher);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub async fn commit(&self, request: CommitRequest) -> Result<ImportResult> {
        let cycle = parse_cycle(&request.billing_cycle)?;
        if request.lines.is_empty() {
            return Err(ReconcileError::EmptyTransactions);
        }
        let user_id = request.user_id;

        let statement = partition(&request.lines, &self.marker);
        if statement.items.is_empty() {
            return Err(ReconcileError::EmptyTransactions);
        }

        // Preview and commit are not linked; the unique index backs this up
        // when two commits race.
        if get_statement_import(&self.pool, user_id, cycle).await?.is_some() {
            return Err(ReconcileError::HasExistingImport(cycle));
        }

        let bill = match request.bill_payment_id {
            Some(id) => {
                let bill = self.lifecycle.find_owned_bill(user_id, id).await?;
                if bill.is_expanded() {
                    return Err(ReconcileError::BillAlreadyExpanded(id));
                }
                Some(bill)
            }
            None => None,
        };

        let (items, categorized_count) = self.build_items(user_id, cycle, &statement.items, request.apply_auto_category);
        let amount_difference = bill.as_ref().map(|b| b.amount.abs() - statement.total_amount);

        let import = NewStatementImport {
            user_id,
            billing_cycle: cycle,
            total_amount: statement.total_amount,
            payment_received_amount: statement.payment_received.as_ref().map(|p| p.amount),
            payment_received_date: statement.payment_received.as_ref().map(|p| p.date),
            imported_count: items.len(),
            bill_payment_id: None,
            amount_difference,
        };

        let (transaction_ids, bill_payment) = match (bill, amount_difference) {
            (Some(bill), Some(amount_difference)) => {
                let outcome = self.lifecycle.expand(user_id, bill.id, &items, import).await?;
                let linked = LinkedBill {
                    id: bill.id,
                    original_amount: outcome.original_amount,
                    amount_difference,
                };
                (outcome.item_ids, Some(linked))
            }
            _ => (import_standalone(&self.pool, import, &items, Utc::now()).await?, None),
        };

        info!(
            user_id = %user_id,
            cycle = %cycle,
            imported = transaction_ids.len(),
            categorized = categorized_count,
            linked = bill_payment.is_some(),
            "Committed statement import"
        );

        Ok(ImportResult {
            billing_cycle: cycle,
            imported_count: transaction_ids.len(),
            categorized_count,
            transaction_ids,
            bill_payment,
            imported_at: Utc::now(),
        })
    }

    /// Category lookup happens before any database transaction opens. A rule
    /// failure leaves that line uncategorized.
    fn build_items(
        &self,
        user_id: UserId,
        cycle: BillingCycle,
        lines: &[StatementLine],
        apply_auto_category: bool,
    ) -> (Vec<NewTransaction>, usize) {
        let matcher = self.categories.as_deref().filter(|_| apply_auto_category);
        let mut categorized = 0;

        let items = lines
            .iter()
            .map(|line| {
                let mut item = NewTransaction::itemized(user_id, cycle, line);
                if let Some(matcher) = matcher {
                    match matcher.match_category(&line.description, line.amount) {
                        Ok(Some(category)) => {
                            item.category_id = Some(category);
                            categorized += 1;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(description = %line.description, error = %e, "Category rule failed; line left uncategorized");
                            self.sink.emit(MatchDiagnostic::CategoryRuleFailed {
                                description: line.description.clone(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
                item
            })
            .collect();

        (items, categorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{bank_bill, cycle, date, line, november_statement, test_pool, USER};
    use fatura_core::{CategoryId, TransactionSource};
    use fatura_import::{CategoryRule, CategoryRuleEngine, RuleMatchType, DEFAULT_PAYMENT_MARKER};
    use fatura_storage::{get_linked_transactions, get_pending_cycle, get_transaction};

    fn committer(pool: &DbPool) -> ImportCommitter {
        ImportCommitter::new(pool.clone(), PaymentMarker::new(DEFAULT_PAYMENT_MARKER).unwrap())
    }

    fn request(bill: Option<TransactionId>, apply_auto_category: bool) -> CommitRequest {
        CommitRequest {
            user_id: USER,
            billing_cycle: "2024-11".into(),
            bill_payment_id: bill,
            lines: november_statement(),
            apply_auto_category,
        }
    }

    fn rule(name: &str, pattern: &str, match_type: RuleMatchType, category: i64) -> CategoryRule {
        CategoryRule {
            name: name.into(),
            priority: 0,
            pattern: pattern.into(),
            match_type,
            category_id: CategoryId(category),
            amount_min: None,
            amount_max: None,
        }
    }

    #[tokio::test]
    async fn commit_with_bill_expands_it() {
        let (_dir, pool) = test_pool().await;
        let bill = bank_bill(&pool, USER, date(2024, 11, 8), 152_377).await;

        let result = committer(&pool).commit(request(Some(bill.id), false)).await.unwrap();
        assert_eq!(result.imported_count, 4);
        assert_eq!(result.categorized_count, 0);
        let linked = result.bill_payment.unwrap();
        assert_eq!(linked.original_amount, Money::from_cents(-152_377));
        assert_eq!(linked.amount_difference, Money::zero());

        let stored = get_transaction(&pool, bill.id).await.unwrap().unwrap();
        assert!(stored.is_expanded());
        let items = get_linked_transactions(&pool, bill.id).await.unwrap();
        assert_eq!(items.len(), 4);
        assert!(items.iter().all(|t| t.source == TransactionSource::Statement));
        // Purchases become outflows, the refund an inflow; they net to the bill.
        let net: Money = items.iter().map(|t| t.amount).sum();
        assert_eq!(net, Money::from_cents(-152_377));
    }

    #[tokio::test]
    async fn commit_without_bill_leaves_cycle_pending() {
        let (_dir, pool) = test_pool().await;
        let result = committer(&pool).commit(request(None, false)).await.unwrap();
        assert!(result.bill_payment.is_none());
        assert_eq!(result.transaction_ids.len(), 4);

        let pending = get_pending_cycle(&pool, USER, cycle("2024-11")).await.unwrap().unwrap();
        assert_eq!(pending.transaction_count, 4);
        assert_eq!(pending.total_amount, Money::from_cents(152_377));
    }

    #[tokio::test]
    async fn second_commit_of_cycle_is_rejected() {
        let (_dir, pool) = test_pool().await;
        let bill = bank_bill(&pool, USER, date(2024, 11, 8), 152_377).await;
        let c = committer(&pool);
        c.commit(request(None, false)).await.unwrap();

        for bill_id in [None, Some(bill.id)] {
            let err = c.commit(request(bill_id, false)).await.unwrap_err();
            assert!(matches!(err, ReconcileError::HasExistingImport(_)));
        }
        assert!(!get_transaction(&pool, bill.id).await.unwrap().unwrap().is_expanded());
        assert_eq!(
            get_pending_cycle(&pool, USER, cycle("2024-11")).await.unwrap().unwrap().transaction_count,
            4
        );
    }

    #[tokio::test]
    async fn racing_commits_import_once() {
        let (_dir, pool) = test_pool().await;
        let c = committer(&pool);
        let (a, b) = tokio::join!(c.commit(request(None, false)), c.commit(request(None, false)));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert!(matches!(a.err().or(b.err()), Some(ReconcileError::HasExistingImport(_))));
        assert_eq!(
            get_pending_cycle(&pool, USER, cycle("2024-11")).await.unwrap().unwrap().transaction_count,
            4
        );
    }

    #[tokio::test]
    async fn bad_rule_is_skipped_per_line() {
        let (_dir, pool) = test_pool().await;
        let engine = CategoryRuleEngine::new(vec![
            rule("market", "supermercado", RuleMatchType::Contains, 1),
            rule("delivery", "ifood", RuleMatchType::Contains, 2),
            rule("broken", "(unclosed", RuleMatchType::Regex, 3),
        ]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let result = committer(&pool)
            .with_categories(Arc::new(engine))
            .with_sink(Arc::new(tx))
            .commit(request(None, true))
            .await
            .unwrap();

        assert_eq!(result.imported_count, 4);
        assert_eq!(result.categorized_count, 2);
        let mut failures = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, MatchDiagnostic::CategoryRuleFailed { .. }));
            failures += 1;
        }
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn auto_category_off_skips_matcher() {
        let (_dir, pool) = test_pool().await;
        let engine = CategoryRuleEngine::new(vec![rule("all", "", RuleMatchType::Contains, 9)]);
        let result = committer(&pool)
            .with_categories(Arc::new(engine))
            .commit(request(None, false))
            .await
            .unwrap();
        assert_eq!(result.categorized_count, 0);
    }

    #[tokio::test]
    async fn rejects_statement_with_only_payment_lines() {
        let (_dir, pool) = test_pool().await;
        let req = CommitRequest {
            lines: vec![line(date(2024, 11, 5), "Pagamento recebido", -100)],
            ..request(None, false)
        };
        assert!(matches!(
            committer(&pool).commit(req).await,
            Err(ReconcileError::EmptyTransactions)
        ));
    }

    #[tokio::test]
    async fn foreign_bill_is_rejected_before_writing() {
        let (_dir, pool) = test_pool().await;
        let bill = bank_bill(&pool, fatura_core::UserId(2), date(2024, 11, 8), 152_377).await;
        let err = committer(&pool).commit(request(Some(bill.id), false)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::BillPaymentNotOwned(_)));
        assert!(get_pending_cycle(&pool, USER, cycle("2024-11")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inflow_cannot_absorb_a_statement() {
        let (_dir, pool) = test_pool().await;
        let salary = fatura_storage::insert_transaction(
            &pool,
            &NewTransaction::bank(USER, date(2024, 11, 5), "SALARIO", Money::from_cents(900_000)),
        )
        .await
        .unwrap();

        let err = committer(&pool).commit(request(Some(salary.id), false)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::BillPaymentNotFound(id) if id == salary.id));
        let stored = get_transaction(&pool, salary.id).await.unwrap().unwrap();
        assert_eq!(stored.amount, Money::from_cents(900_000));
        assert!(!stored.is_expanded());
        assert!(get_pending_cycle(&pool, USER, cycle("2024-11")).await.unwrap().is_none());
    }
}
