//! Writes that change a bill payment's expansion state.
//!
//! Each function runs in a single SQLite transaction whose first statement is
//! a conditional update of the bill row. If that update matches nothing,
//! another caller got there first and the transaction is rolled back when it
//! is dropped. Writing before reading keeps WAL snapshots from going stale
//! while the write lock is awaited.

use chrono::{DateTime, Utc};
use fatura_core::{BillingCycle, Money, NewTransaction, TransactionId, TransactionSource, UserId};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::db::DbPool;
use crate::error::StoreError;
use crate::imports::{insert_import_with, NewStatementImport};
use crate::transactions::insert_with;

#[derive(Debug, Clone)]
pub struct ExpandRequest<'a> {
    pub user_id: UserId,
    pub bill_id: TransactionId,
    pub billing_cycle: BillingCycle,
    pub items: &'a [NewTransaction],
    pub statement: NewStatementImport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandOutcome {
    pub original_amount: Money,
    pub item_ids: Vec<TransactionId>,
    pub import_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkOutcome {
    pub original_amount: Money,
    pub linked_count: u64,
    /// Linked itemized total, statement convention.
    pub total_amount: Money,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollapseOutcome {
    pub deleted_count: u64,
    pub restored_amount: Money,
    pub billing_cycle: Option<BillingCycle>,
}

/// Flags the bill as expanded and zeroes its amount. Returns the amount it
/// had before, or `None` if the row is not a collapsed outflow of the user's.
async fn mark_expanded(
    conn: &mut SqliteConnection,
    user_id: UserId,
    bill_id: TransactionId,
    cycle: BillingCycle,
    now: DateTime<Utc>,
) -> Result<Option<Money>, StoreError> {
    let original: Option<i64> = sqlx::query_scalar(
        "UPDATE transactions \
         SET original_amount_cents = amount_cents, amount_cents = 0, expanded_at = ?, \
             billing_cycle = ? \
         WHERE id = ? AND user_id = ? AND source = 'bank' AND amount_cents < 0 AND expanded_at IS NULL \
         RETURNING original_amount_cents",
    )
    .bind(now)
    .bind(cycle.to_string())
    .bind(bill_id.0)
    .bind(user_id.0)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(original.map(Money::from_cents))
}

fn as_itemized(item: &NewTransaction, bill_id: TransactionId, cycle: BillingCycle) -> NewTransaction {
    NewTransaction {
        source: TransactionSource::Statement,
        billing_cycle: Some(cycle),
        bill_payment_id: Some(bill_id),
        ..item.clone()
    }
}

/// Replaces the bill's aggregate amount with `items`, recording the statement
/// import in the same transaction.
pub async fn expand_bill(
    pool: &DbPool,
    request: ExpandRequest<'_>,
    now: DateTime<Utc>,
) -> Result<ExpandOutcome, StoreError> {
    let ExpandRequest {
        user_id,
        bill_id,
        billing_cycle,
        items,
        mut statement,
    } = request;

    if items.is_empty() {
        return Err(StoreError::EmptyExpansion(bill_id));
    }

    let mut tx = pool.begin().await?;

    let original_amount = mark_expanded(&mut tx, user_id, bill_id, billing_cycle, now)
        .await?
        .ok_or(StoreError::StaleBill(bill_id))?;

    statement.bill_payment_id = Some(bill_id);
    let import_id = insert_import_with(&mut tx, &statement, now).await?;

    let mut item_ids = Vec::with_capacity(items.len());
    for item in items {
        let id = insert_with(&mut tx, &as_itemized(item, bill_id, billing_cycle), now).await?;
        item_ids.push(id);
    }

    tx.commit().await?;

    debug!(
        user_id = %user_id,
        bill_id = %bill_id,
        cycle = %billing_cycle,
        items = item_ids.len(),
        "expanded bill payment"
    );

    Ok(ExpandOutcome {
        original_amount,
        item_ids,
        import_id,
    })
}

/// Expands the bill over itemized rows that were imported earlier without a
/// bill, creating or completing the cycle's import record.
pub async fn link_pending(
    pool: &DbPool,
    user_id: UserId,
    bill_id: TransactionId,
    cycle: BillingCycle,
    amount_difference: Money,
    now: DateTime<Utc>,
) -> Result<LinkOutcome, StoreError> {
    let mut tx = pool.begin().await?;

    let original_amount = mark_expanded(&mut tx, user_id, bill_id, cycle, now)
        .await?
        .ok_or(StoreError::StaleBill(bill_id))?;

    let linked_count = sqlx::query(
        "UPDATE transactions SET bill_payment_id = ? \
         WHERE user_id = ? AND source = 'statement' AND billing_cycle = ? AND bill_payment_id IS NULL",
    )
    .bind(bill_id.0)
    .bind(user_id.0)
    .bind(cycle.to_string())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if linked_count == 0 {
        return Err(StoreError::NothingPending(cycle));
    }

    let sum_cents: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(amount_cents), 0) FROM transactions WHERE bill_payment_id = ?")
            .bind(bill_id.0)
            .fetch_one(&mut *tx)
            .await?;
    let total_amount = -Money::from_cents(sum_cents);

    let upserted = sqlx::query(
        "INSERT INTO statement_imports (user_id, billing_cycle, total_cents, imported_count, \
         bill_payment_id, amount_difference_cents, linked_at, imported_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (user_id, billing_cycle) DO UPDATE SET \
             bill_payment_id = excluded.bill_payment_id, \
             amount_difference_cents = excluded.amount_difference_cents, \
             linked_at = excluded.linked_at \
         WHERE statement_imports.bill_payment_id IS NULL",
    )
    .bind(user_id.0)
    .bind(cycle.to_string())
    .bind(total_amount.to_cents())
    .bind(linked_count as i64)
    .bind(bill_id.0)
    .bind(amount_difference.to_cents())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if upserted == 0 {
        return Err(StoreError::CycleLinked(cycle));
    }

    tx.commit().await?;

    debug!(user_id = %user_id, bill_id = %bill_id, cycle = %cycle, linked_count, "linked pending cycle");

    Ok(LinkOutcome {
        original_amount,
        linked_count,
        total_amount,
    })
}

/// Deletes the bill's itemized rows and import record and restores its
/// original amount.
pub async fn collapse_bill(
    pool: &DbPool,
    user_id: UserId,
    bill_id: TransactionId,
) -> Result<CollapseOutcome, StoreError> {
    let mut tx = pool.begin().await?;

    let restored: Option<i64> = sqlx::query_scalar(
        "UPDATE transactions \
         SET amount_cents = original_amount_cents, original_amount_cents = NULL, expanded_at = NULL, \
             billing_cycle = NULL \
         WHERE id = ? AND user_id = ? AND expanded_at IS NOT NULL AND original_amount_cents IS NOT NULL \
         RETURNING amount_cents",
    )
    .bind(bill_id.0)
    .bind(user_id.0)
    .fetch_optional(&mut *tx)
    .await?;
    let restored_amount = restored
        .map(Money::from_cents)
        .ok_or(StoreError::StaleBill(bill_id))?;

    let deleted_count = sqlx::query("DELETE FROM transactions WHERE bill_payment_id = ?")
        .bind(bill_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let cycle: Option<String> =
        sqlx::query_scalar("DELETE FROM statement_imports WHERE bill_payment_id = ? RETURNING billing_cycle")
            .bind(bill_id.0)
            .fetch_optional(&mut *tx)
            .await?;
    let billing_cycle = cycle
        .map(|c| c.parse::<BillingCycle>())
        .transpose()
        .map_err(|e| StoreError::Corrupt {
            table: "statement_imports",
            detail: e.to_string(),
        })?;

    tx.commit().await?;

    debug!(user_id = %user_id, bill_id = %bill_id, deleted_count, "collapsed bill payment");

    Ok(CollapseOutcome {
        deleted_count,
        restored_amount,
        billing_cycle,
    })
}

/// Imports a statement without a bill payment. The rows stay pending until a
/// reconciliation run or a manual link claims them.
pub async fn import_standalone(
    pool: &DbPool,
    statement: NewStatementImport,
    items: &[NewTransaction],
    now: DateTime<Utc>,
) -> Result<Vec<TransactionId>, StoreError> {
    let cycle = statement.billing_cycle;
    let mut tx = pool.begin().await?;

    insert_import_with(&mut tx, &statement, now).await?;

    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        let row = NewTransaction {
            source: TransactionSource::Statement,
            billing_cycle: Some(cycle),
            bill_payment_id: None,
            ..item.clone()
        };
        ids.push(insert_with(&mut tx, &row, now).await?);
    }

    tx.commit().await?;

    debug!(user_id = %statement.user_id, cycle = %cycle, items = ids.len(), "imported standalone statement");

    Ok(ids)
}
