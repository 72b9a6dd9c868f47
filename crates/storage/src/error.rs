use fatura_core::{BillingCycle, TransactionId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Billing cycle {0} already has a statement import")]
    DuplicateImport(BillingCycle),
    #[error("Billing cycle {0} is already linked to a bill payment")]
    CycleLinked(BillingCycle),
    /// A conditional write on the bill matched no row: another caller changed
    /// its expansion state first.
    #[error("Bill payment {0} changed state concurrently")]
    StaleBill(TransactionId),
    #[error("Bill payment {0} cannot be expanded into zero items")]
    EmptyExpansion(TransactionId),
    #[error("No pending itemized transactions for billing cycle {0}")]
    NothingPending(BillingCycle),
    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

impl StoreError {
    pub(crate) fn on_import_insert(err: sqlx::Error, cycle: BillingCycle) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateImport(cycle),
            _ => StoreError::Database(err),
        }
    }
}
