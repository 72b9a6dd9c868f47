//! Credit-card statement reconciliation: previewing and committing statement
//! imports, expanding and collapsing bill payments, and matching pending
//! cycles to bill payments.

pub mod commit;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod preview;

#[cfg(test)]
pub(crate) mod testutil;

use std::sync::Arc;

use fatura_import::{CategoryMatcher, MatchScorer};
use fatura_storage::DbPool;

pub use commit::{CommitRequest, ImportCommitter, ImportResult, LinkedBill};
pub use config::{ConfigError, ReconcileConfig};
pub use diagnostics::{CycleOutcome, DiagnosticSink, MatchDiagnostic, NullSink};
pub use error::{ReconcileError, Result};
pub use lifecycle::{BillState, CollapseResult, ExpansionLifecycle};
pub use orchestrator::{
    AutoLinkedCycle, CycleStatus, CycleTotals, ManualLinkResult, ReconciliationCycleState,
    ReconciliationOrchestrator, ReconciliationSummary, SelectionNeeded,
};
pub use preview::{ImportPreviewer, PreviewResult};

/// All services wired to one pool and one configuration.
pub struct Reconciler {
    pub lifecycle: ExpansionLifecycle,
    pub previewer: ImportPreviewer,
    pub committer: ImportCommitter,
    pub orchestrator: ReconciliationOrchestrator,
}

impl Reconciler {
    pub fn new(
        pool: DbPool,
        config: &ReconcileConfig,
        categories: Option<Arc<dyn CategoryMatcher>>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let marker = config.marker()?;

        let mut committer = ImportCommitter::new(pool.clone(), marker.clone()).with_sink(sink.clone());
        if let Some(categories) = categories {
            committer = committer.with_categories(categories);
        }

        Ok(Self {
            lifecycle: ExpansionLifecycle::new(pool.clone()),
            previewer: ImportPreviewer::new(pool.clone(), MatchScorer::new(config.preview.clone()), marker)
                .with_sink(sink.clone()),
            committer,
            orchestrator: ReconciliationOrchestrator::new(
                pool,
                MatchScorer::new(config.reconciliation.clone()),
                config.mismatch_threshold,
            )
            .with_sink(sink),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{bank_bill, date, november_statement, test_pool, USER};

    #[tokio::test]
    async fn preview_then_commit_then_unlink() {
        let (_dir, pool) = test_pool().await;
        let bill = bank_bill(&pool, USER, date(2024, 11, 8), 152_377).await;
        let fatura = Reconciler::new(pool, &ReconcileConfig::default(), None, Arc::new(NullSink)).unwrap();

        let preview = fatura
            .previewer
            .preview(USER, "2024-11", &november_statement())
            .await
            .unwrap();
        let chosen = preview.best_match().map(|m| m.transaction.id);
        assert_eq!(chosen, Some(bill.id));

        let result = fatura
            .committer
            .commit(CommitRequest {
                user_id: USER,
                billing_cycle: "2024-11".into(),
                bill_payment_id: chosen,
                lines: november_statement(),
                apply_auto_category: false,
            })
            .await
            .unwrap();
        assert_eq!(result.imported_count, preview.transactions_to_import.len());

        let again = fatura
            .previewer
            .preview(USER, "2024-11", &november_statement())
            .await
            .unwrap();
        assert!(again.has_existing_import);
        assert!(again.matches.is_empty());

        let status = fatura.orchestrator.status(USER).await.unwrap();
        assert_eq!(status[0].state, ReconciliationCycleState::Linked);

        fatura.orchestrator.unlink(USER, bill.id).await.unwrap();
        let state = fatura.lifecycle.state(USER, bill.id).await.unwrap();
        assert_eq!(state.bill.amount, bill.amount);
        assert!(state.items.is_empty());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let (_dir, pool) = test_pool().await;
        let config = ReconcileConfig {
            payment_marker: "(".into(),
            ..ReconcileConfig::default()
        };
        assert!(matches!(
            Reconciler::new(pool, &config, None, Arc::new(NullSink)),
            Err(ConfigError::InvalidMarker(_))
        ));
    }
}
