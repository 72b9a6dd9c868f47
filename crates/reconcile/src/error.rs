use fatura_core::{BillingCycle, Money, TransactionId};
use fatura_storage::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Invalid billing cycle '{0}': expected YYYY-MM")]
    InvalidBillingCycle(String),
    #[error("No statement transactions supplied")]
    EmptyTransactions,
    #[error("Bill payment {0} not found")]
    BillPaymentNotFound(TransactionId),
    #[error("Bill payment {0} belongs to another user")]
    BillPaymentNotOwned(TransactionId),
    #[error("Bill payment {0} is already expanded")]
    BillAlreadyExpanded(TransactionId),
    #[error("Bill payment {0} is not expanded")]
    BillNotExpanded(TransactionId),
    #[error("Billing cycle {0} is already linked to a bill payment")]
    CycleAlreadyLinked(BillingCycle),
    #[error("Bill amount {bill_amount} differs from cycle total {cycle_total} by {difference} ({percent:.2}%)")]
    AmountMismatch {
        bill_amount: Money,
        cycle_total: Money,
        difference: Money,
        percent: f64,
    },
    #[error("No pending itemized transactions for billing cycle {0}")]
    PendingNotFound(BillingCycle),
    #[error("Billing cycle {0} already has a statement import")]
    HasExistingImport(BillingCycle),
    #[error("Internal error: {0}")]
    Internal(#[source] StoreError),
}

impl ReconcileError {
    /// True for infrastructure failures, false for rule violations the
    /// caller can act on.
    pub fn is_internal(&self) -> bool {
        matches!(self, ReconcileError::Internal(_))
    }
}

/// A lost conditional update means the bill was expanded underneath us.
/// Collapse maps that case to [`ReconcileError::BillNotExpanded`] itself.
impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateImport(cycle) => ReconcileError::HasExistingImport(cycle),
            StoreError::CycleLinked(cycle) => ReconcileError::CycleAlreadyLinked(cycle),
            StoreError::NothingPending(cycle) => ReconcileError::PendingNotFound(cycle),
            StoreError::StaleBill(id) => ReconcileError::BillAlreadyExpanded(id),
            StoreError::EmptyExpansion(_) => ReconcileError::EmptyTransactions,
            other => ReconcileError::Internal(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

pub(crate) fn parse_cycle(raw: &str) -> Result<BillingCycle> {
    raw.parse()
        .map_err(|_| ReconcileError::InvalidBillingCycle(raw.to_string()))
}
