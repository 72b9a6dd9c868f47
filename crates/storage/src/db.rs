use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;

pub type DbPool = Pool<Sqlite>;

/// Opens (creating if needed) the database at `path` and applies migrations.
///
/// Several connections share the file in WAL mode; writers queue on the
/// busy timeout rather than failing.
pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            description TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            source TEXT NOT NULL DEFAULT 'bank',
            category_id INTEGER,
            billing_cycle TEXT,
            bill_payment_id INTEGER,
            original_amount_cents INTEGER,
            expanded_at TEXT,
            installment_current INTEGER,
            installment_total INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY (bill_payment_id) REFERENCES transactions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_user_date ON transactions(user_id, date)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_bill ON transactions(bill_payment_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_cycle ON transactions(user_id, billing_cycle, source)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS statement_imports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            billing_cycle TEXT NOT NULL,
            total_cents INTEGER NOT NULL,
            payment_received_cents INTEGER,
            payment_received_date TEXT,
            imported_count INTEGER NOT NULL,
            bill_payment_id INTEGER,
            amount_difference_cents INTEGER,
            linked_at TEXT,
            imported_at TEXT NOT NULL,
            UNIQUE (user_id, billing_cycle),
            FOREIGN KEY (bill_payment_id) REFERENCES transactions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_db() -> (tempfile::TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_db(&dir.path().join("test.db")).await.unwrap();
    (dir, pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let (dir, pool) = test_db().await;
        run_migrations(&pool).await.unwrap();
        drop(pool);
        // Reopening an existing file must not fail either.
        create_db(&dir.path().join("test.db")).await.unwrap();
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let (_dir, pool) = test_db().await;
        let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(fk, 1);
    }
}
