use chrono::NaiveDate;
use fatura_core::{BillingCycle, Money, NewTransaction, StatementLine, Transaction, UserId};
use fatura_storage::{create_db, insert_transaction, DbPool, NewStatementImport};

pub const USER: UserId = UserId(1);

pub async fn test_pool() -> (tempfile::TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_db(&dir.path().join("fatura.db")).await.unwrap();
    (dir, pool)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn cycle(s: &str) -> BillingCycle {
    s.parse().unwrap()
}

/// A bank-side bill payment of `cents` (stored as an outflow).
pub async fn bank_bill(pool: &DbPool, user: UserId, on: NaiveDate, cents: i64) -> Transaction {
    insert_transaction(
        pool,
        &NewTransaction::bank(user, on, "PAGTO FATURA CARTAO", -Money::from_cents(cents)),
    )
    .await
    .unwrap()
}

pub fn line(on: NaiveDate, description: &str, cents: i64) -> StatementLine {
    StatementLine::new(on, description, Money::from_cents(cents))
}

pub fn itemized(user: UserId, c: &str, rows: &[(&str, i64)]) -> Vec<NewTransaction> {
    rows.iter()
        .map(|(desc, cents)| NewTransaction::itemized(user, cycle(c), &line(date(2024, 10, 20), desc, *cents)))
        .collect()
}

pub fn new_import(user: UserId, c: &str, total_cents: i64, count: usize) -> NewStatementImport {
    NewStatementImport {
        user_id: user,
        billing_cycle: cycle(c),
        total_amount: Money::from_cents(total_cents),
        payment_received_amount: None,
        payment_received_date: None,
        imported_count: count,
        bill_payment_id: None,
        amount_difference: None,
    }
}

/// The November 2024 statement: R$1,523.77 paid on the 5th, purchases
/// and one refund adding up to the same amount.
pub fn november_statement() -> Vec<StatementLine> {
    vec![
        line(date(2024, 11, 5), "Pagamento recebido", -152_377),
        line(date(2024, 10, 12), "SUPERMERCADO EXTRA", 80_000),
        line(date(2024, 10, 18), "MAGAZINE LUIZA 03/10", 75_000),
        line(date(2024, 10, 22), "IFOOD *RESTAURANTE", 10_000),
        line(date(2024, 10, 25), "ESTORNO LOJA", -12_623),
    ]
}
