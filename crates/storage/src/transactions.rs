use chrono::{DateTime, NaiveDate, Utc};
use fatura_core::{
    BillingCycle, CategoryId, DateRange, Installment, Money, NewTransaction, Transaction,
    TransactionId, TransactionSource, UserId,
};
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::db::DbPool;
use crate::error::StoreError;

pub(crate) const TRANSACTION_COLUMNS: &str = "id, user_id, date, description, amount_cents, source, \
     category_id, billing_cycle, bill_payment_id, original_amount_cents, expanded_at, \
     installment_current, installment_total, created_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TransactionRow {
    id: i64,
    user_id: i64,
    date: NaiveDate,
    description: String,
    amount_cents: i64,
    source: String,
    category_id: Option<i64>,
    billing_cycle: Option<String>,
    bill_payment_id: Option<i64>,
    original_amount_cents: Option<i64>,
    expanded_at: Option<DateTime<Utc>>,
    installment_current: Option<i64>,
    installment_total: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(r: TransactionRow) -> Result<Self, Self::Error> {
        let corrupt = |detail: String| StoreError::Corrupt {
            table: "transactions",
            detail: format!("id {}: {detail}", r.id),
        };
        let source = r.source.parse::<TransactionSource>().map_err(corrupt)?;
        let billing_cycle = r
            .billing_cycle
            .as_deref()
            .map(str::parse::<BillingCycle>)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;
        let installment = match (r.installment_current, r.installment_total) {
            (Some(current), Some(total)) => u16::try_from(current)
                .ok()
                .zip(u16::try_from(total).ok())
                .and_then(|(c, t)| Installment::new(c, t)),
            _ => None,
        };

        Ok(Transaction {
            id: TransactionId(r.id),
            user_id: UserId(r.user_id),
            date: r.date,
            description: r.description,
            amount: Money::from_cents(r.amount_cents),
            source,
            category_id: r.category_id.map(CategoryId),
            billing_cycle,
            bill_payment_id: r.bill_payment_id.map(TransactionId),
            original_amount: r.original_amount_cents.map(Money::from_cents),
            expanded_at: r.expanded_at,
            installment,
            created_at: r.created_at,
        })
    }
}

fn into_transactions(rows: Vec<TransactionRow>) -> Result<Vec<Transaction>, StoreError> {
    rows.into_iter().map(Transaction::try_from).collect()
}

/// Inserts on an existing connection so callers can batch inside a transaction.
pub(crate) async fn insert_with(
    conn: &mut SqliteConnection,
    tx: &NewTransaction,
    now: DateTime<Utc>,
) -> Result<TransactionId, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO transactions (user_id, date, description, amount_cents, source, category_id, \
         billing_cycle, bill_payment_id, installment_current, installment_total, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(tx.user_id.0)
    .bind(tx.date)
    .bind(&tx.description)
    .bind(tx.amount.to_cents())
    .bind(tx.source.to_string())
    .bind(tx.category_id.map(|c| c.0))
    .bind(tx.billing_cycle.map(|c| c.to_string()))
    .bind(tx.bill_payment_id.map(|b| b.0))
    .bind(tx.installment.map(|i| i64::from(i.current)))
    .bind(tx.installment.map(|i| i64::from(i.total)))
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(TransactionId(result.last_insert_rowid()))
}

pub async fn insert_transaction(pool: &DbPool, tx: &NewTransaction) -> Result<Transaction, StoreError> {
    let mut conn = pool.acquire().await?;
    let id = insert_with(&mut conn, tx, Utc::now()).await?;
    drop(conn);
    get_transaction(pool, id).await?.ok_or_else(|| StoreError::Corrupt {
        table: "transactions",
        detail: format!("id {id} vanished after insert"),
    })
}

pub async fn get_transaction(pool: &DbPool, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
    let row = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    row.map(Transaction::try_from).transpose()
}

#[derive(Debug, Clone, PartialEq)]
pub enum BillLookup {
    Found(Transaction),
    NotFound,
    NotOwned,
}

/// Distinguishes a missing row from one that belongs to somebody else.
pub async fn find_bill_payment_by_id(
    pool: &DbPool,
    id: TransactionId,
    user_id: UserId,
) -> Result<BillLookup, StoreError> {
    Ok(match get_transaction(pool, id).await? {
        Some(tx) if tx.user_id != user_id => BillLookup::NotOwned,
        // Itemized statement rows are never bill payments.
        Some(tx) if tx.source != TransactionSource::Bank => BillLookup::NotFound,
        // Nor are inflows. Expanded bills hold zero, so check what they settled.
        Some(tx) if !tx.settled_amount().is_negative() => BillLookup::NotFound,
        Some(tx) => BillLookup::Found(tx),
        None => BillLookup::NotFound,
    })
}

pub async fn is_bill_expanded(pool: &DbPool, id: TransactionId) -> Result<bool, StoreError> {
    let expanded: Option<i64> =
        sqlx::query_scalar("SELECT expanded_at IS NOT NULL FROM transactions WHERE id = ?")
            .bind(id.0)
            .fetch_optional(pool)
            .await?;
    Ok(expanded.is_some_and(|flag| flag != 0))
}

pub async fn get_linked_transactions(
    pool: &DbPool,
    bill_id: TransactionId,
) -> Result<Vec<Transaction>, StoreError> {
    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE bill_payment_id = ? ORDER BY date, id"
    ))
    .bind(bill_id.0)
    .fetch_all(pool)
    .await?;

    into_transactions(rows)
}

/// Bank outflows in `range` that are not yet standing in for a statement.
pub async fn find_potential_bill_payments(
    pool: &DbPool,
    user_id: UserId,
    range: DateRange,
) -> Result<Vec<Transaction>, StoreError> {
    let rows = sqlx::query_as::<_, TransactionRow>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions \
         WHERE user_id = ? AND source = 'bank' AND amount_cents < 0 \
           AND expanded_at IS NULL AND billing_cycle IS NULL \
           AND date >= ? AND date <= ? \
         ORDER BY date, id"
    ))
    .bind(user_id.0)
    .bind(range.start)
    .bind(range.end)
    .fetch_all(pool)
    .await?;

    into_transactions(rows)
}

/// Itemized statement rows of one cycle that no bill payment has claimed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingCycle {
    pub billing_cycle: BillingCycle,
    pub transaction_count: i64,
    /// In statement convention (purchases positive).
    pub total_amount: Money,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
}

type PendingRow = (String, i64, i64, NaiveDate, NaiveDate);

const PENDING_SELECT: &str = "SELECT billing_cycle, COUNT(*), COALESCE(SUM(amount_cents), 0), MIN(date), MAX(date) \
     FROM transactions \
     WHERE user_id = ? AND source = 'statement' AND bill_payment_id IS NULL AND billing_cycle IS NOT NULL";

fn pending_from_row(row: PendingRow) -> Result<PendingCycle, StoreError> {
    let (cycle, count, sum_cents, first_date, last_date) = row;
    let billing_cycle = cycle.parse::<BillingCycle>().map_err(|e| StoreError::Corrupt {
        table: "transactions",
        detail: e.to_string(),
    })?;
    Ok(PendingCycle {
        billing_cycle,
        transaction_count: count,
        total_amount: -Money::from_cents(sum_cents),
        first_date,
        last_date,
    })
}

pub async fn list_pending_cycles(pool: &DbPool, user_id: UserId) -> Result<Vec<PendingCycle>, StoreError> {
    let rows = sqlx::query_as::<_, PendingRow>(&format!(
        "{PENDING_SELECT} GROUP BY billing_cycle ORDER BY billing_cycle"
    ))
    .bind(user_id.0)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(pending_from_row).collect()
}

pub async fn get_pending_cycle(
    pool: &DbPool,
    user_id: UserId,
    cycle: BillingCycle,
) -> Result<Option<PendingCycle>, StoreError> {
    let row = sqlx::query_as::<_, PendingRow>(&format!(
        "{PENDING_SELECT} AND billing_cycle = ? GROUP BY billing_cycle"
    ))
    .bind(user_id.0)
    .bind(cycle.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(pending_from_row).transpose()
}

pub async fn count_linked(pool: &DbPool, bill_id: TransactionId) -> Result<i64, StoreError> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE bill_payment_id = ?")
        .bind(bill_id.0)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
