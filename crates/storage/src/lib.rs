pub mod db;
pub mod error;
pub mod expansion;
pub mod imports;
pub mod transactions;

pub use db::{create_db, DbPool};
pub use error::StoreError;
pub use expansion::{
    collapse_bill, expand_bill, import_standalone, link_pending, CollapseOutcome, ExpandOutcome,
    ExpandRequest, LinkOutcome,
};
pub use imports::{
    get_credit_card_status, get_statement_import, list_statement_imports, CreditCardStatus,
    NewStatementImport, StatementImport,
};
pub use transactions::{
    count_linked, find_bill_payment_by_id, find_potential_bill_payments, get_linked_transactions,
    get_pending_cycle, get_transaction, insert_transaction, is_bill_expanded, list_pending_cycles,
    BillLookup, PendingCycle,
};
