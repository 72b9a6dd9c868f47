use chrono::{DateTime, NaiveDate, Utc};
use fatura_core::{BillingCycle, Money, TransactionId, UserId};
use serde::Serialize;
use sqlx::SqliteConnection;

use crate::db::DbPool;
use crate::error::StoreError;
use crate::transactions::{get_pending_cycle, PendingCycle};

/// One imported credit-card statement. At most one exists per user and cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementImport {
    pub id: i64,
    pub user_id: UserId,
    pub billing_cycle: BillingCycle,
    pub total_amount: Money,
    pub payment_received_amount: Option<Money>,
    pub payment_received_date: Option<NaiveDate>,
    pub imported_count: i64,
    pub bill_payment_id: Option<TransactionId>,
    pub amount_difference: Option<Money>,
    pub linked_at: Option<DateTime<Utc>>,
    pub imported_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewStatementImport {
    pub user_id: UserId,
    pub billing_cycle: BillingCycle,
    pub total_amount: Money,
    pub payment_received_amount: Option<Money>,
    pub payment_received_date: Option<NaiveDate>,
    pub imported_count: usize,
    pub bill_payment_id: Option<TransactionId>,
    pub amount_difference: Option<Money>,
}

#[derive(sqlx::FromRow)]
struct StatementImportRow {
    id: i64,
    user_id: i64,
    billing_cycle: String,
    total_cents: i64,
    payment_received_cents: Option<i64>,
    payment_received_date: Option<NaiveDate>,
    imported_count: i64,
    bill_payment_id: Option<i64>,
    amount_difference_cents: Option<i64>,
    linked_at: Option<DateTime<Utc>>,
    imported_at: DateTime<Utc>,
}

impl TryFrom<StatementImportRow> for StatementImport {
    type Error = StoreError;

    fn try_from(r: StatementImportRow) -> Result<Self, Self::Error> {
        let billing_cycle = r.billing_cycle.parse().map_err(|e: fatura_core::CycleError| StoreError::Corrupt {
            table: "statement_imports",
            detail: format!("id {}: {e}", r.id),
        })?;
        Ok(StatementImport {
            id: r.id,
            user_id: UserId(r.user_id),
            billing_cycle,
            total_amount: Money::from_cents(r.total_cents),
            payment_received_amount: r.payment_received_cents.map(Money::from_cents),
            payment_received_date: r.payment_received_date,
            imported_count: r.imported_count,
            bill_payment_id: r.bill_payment_id.map(TransactionId),
            amount_difference: r.amount_difference_cents.map(Money::from_cents),
            linked_at: r.linked_at,
            imported_at: r.imported_at,
        })
    }
}

const IMPORT_COLUMNS: &str = "id, user_id, billing_cycle, total_cents, payment_received_cents, \
     payment_received_date, imported_count, bill_payment_id, amount_difference_cents, linked_at, imported_at";

pub(crate) async fn insert_import_with(
    conn: &mut SqliteConnection,
    import: &NewStatementImport,
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let linked_at = import.bill_payment_id.map(|_| now);
    let result = sqlx::query(
        "INSERT INTO statement_imports (user_id, billing_cycle, total_cents, payment_received_cents, \
         payment_received_date, imported_count, bill_payment_id, amount_difference_cents, linked_at, imported_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(import.user_id.0)
    .bind(import.billing_cycle.to_string())
    .bind(import.total_amount.to_cents())
    .bind(import.payment_received_amount.map(Money::to_cents))
    .bind(import.payment_received_date)
    .bind(import.imported_count as i64)
    .bind(import.bill_payment_id.map(|b| b.0))
    .bind(import.amount_difference.map(Money::to_cents))
    .bind(linked_at)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| StoreError::on_import_insert(e, import.billing_cycle))?;

    Ok(result.last_insert_rowid())
}

pub async fn get_statement_import(
    pool: &DbPool,
    user_id: UserId,
    cycle: BillingCycle,
) -> Result<Option<StatementImport>, StoreError> {
    let row = sqlx::query_as::<_, StatementImportRow>(&format!(
        "SELECT {IMPORT_COLUMNS} FROM statement_imports WHERE user_id = ? AND billing_cycle = ?"
    ))
    .bind(user_id.0)
    .bind(cycle.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(StatementImport::try_from).transpose()
}

pub async fn list_statement_imports(pool: &DbPool, user_id: UserId) -> Result<Vec<StatementImport>, StoreError> {
    let rows = sqlx::query_as::<_, StatementImportRow>(&format!(
        "SELECT {IMPORT_COLUMNS} FROM statement_imports WHERE user_id = ? ORDER BY billing_cycle"
    ))
    .bind(user_id.0)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(StatementImport::try_from).collect()
}

/// Everything known about one cycle of one user's card.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditCardStatus {
    pub billing_cycle: BillingCycle,
    pub import: Option<StatementImport>,
    pub pending: Option<PendingCycle>,
}

impl CreditCardStatus {
    pub fn has_existing_import(&self) -> bool {
        self.import.is_some()
    }

    pub fn linked_bill(&self) -> Option<TransactionId> {
        self.import.as_ref().and_then(|i| i.bill_payment_id)
    }
}

pub async fn get_credit_card_status(
    pool: &DbPool,
    user_id: UserId,
    cycle: BillingCycle,
) -> Result<CreditCardStatus, StoreError> {
    Ok(CreditCardStatus {
        billing_cycle: cycle,
        import: get_statement_import(pool, user_id, cycle).await?,
        pending: get_pending_cycle(pool, user_id, cycle).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn cycle(s: &str) -> BillingCycle {
        s.parse().unwrap()
    }

    fn new_import(user: i64, c: &str) -> NewStatementImport {
        NewStatementImport {
            user_id: UserId(user),
            billing_cycle: cycle(c),
            total_amount: Money::from_cents(35000),
            payment_received_amount: Some(Money::from_cents(52345)),
            payment_received_date: NaiveDate::from_ymd_opt(2024, 11, 5),
            imported_count: 2,
            bill_payment_id: None,
            amount_difference: None,
        }
    }

    #[tokio::test]
    async fn duplicate_cycle_is_rejected_per_user() {
        let (_dir, pool) = test_db().await;
        let mut conn = pool.acquire().await.unwrap();
        insert_import_with(&mut conn, &new_import(1, "2024-11"), Utc::now()).await.unwrap();

        let err = insert_import_with(&mut conn, &new_import(1, "2024-11"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateImport(c) if c == cycle("2024-11")));

        // Another user may import the same month.
        insert_import_with(&mut conn, &new_import(2, "2024-11"), Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn status_reports_import() {
        let (_dir, pool) = test_db().await;
        let mut conn = pool.acquire().await.unwrap();
        insert_import_with(&mut conn, &new_import(1, "2024-11"), Utc::now()).await.unwrap();
        drop(conn);

        let status = get_credit_card_status(&pool, UserId(1), cycle("2024-11")).await.unwrap();
        assert!(status.has_existing_import());
        assert_eq!(status.linked_bill(), None);
        let import = status.import.unwrap();
        assert_eq!(import.payment_received_amount, Some(Money::from_cents(52345)));
        assert_eq!(import.imported_count, 2);

        let other = get_credit_card_status(&pool, UserId(1), cycle("2024-12")).await.unwrap();
        assert!(!other.has_existing_import());
        assert!(other.pending.is_none());

        assert_eq!(list_statement_imports(&pool, UserId(1)).await.unwrap().len(), 1);
    }
}
