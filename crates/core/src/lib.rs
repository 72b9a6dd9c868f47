pub mod ids;
pub mod money;
pub mod period;
pub mod transaction;

pub use ids::{CategoryId, TransactionId, UserId};
pub use money::{Money, MoneyError};
pub use period::{BillingCycle, CycleError, DateRange};
pub use transaction::{
    ExpansionState, Installment, NewTransaction, StatementLine, Transaction, TransactionSource,
};
