//! Database layer — migrations, payment queries, status transitions, and
//! watermark management.
//!
//! The store is the lock authority: the `pending/failed → claim_in_progress`
//! transition is a conditional UPDATE guarded by the current status, so two
//! concurrent claimers can never both win even across processes.

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::errors::Result;
use crate::models::{PaymentRecord, PaymentStatus};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    // Make sure the file is created if it doesn't exist yet.
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Watermark
// ─────────────────────────────────────────────────────────

/// Read the highest fully-processed feed message id, if any.
pub async fn get_watermark(pool: &SqlitePool) -> Result<Option<String>> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT last_external_id FROM watermark WHERE id = 1")
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|(v,)| v))
}

/// Persist the watermark after a fully-processed batch.
pub async fn save_watermark(pool: &SqlitePool, last_external_id: &str) -> Result<()> {
    sqlx::query("UPDATE watermark SET last_external_id = ?1 WHERE id = 1")
        .bind(last_external_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Payment writes
// ─────────────────────────────────────────────────────────

/// Insert a new pending payment. Rows sharing an `external_id` are silently
/// ignored, which makes ingestion idempotent. Returns whether a row was
/// actually created.
pub async fn insert_payment(
    pool: &SqlitePool,
    external_id: &str,
    sender: &str,
    recipient: &str,
    amount_minor: i64,
    created_at: i64,
) -> Result<bool> {
    let rows_affected = sqlx::query(
        r#"
        INSERT OR IGNORE INTO payments
            (external_id, sender_handle, recipient_handle, amount_minor, status, created_at)
        VALUES (?1, ?2, ?3, ?4, 'pending', ?5)
        "#,
    )
    .bind(external_id)
    .bind(sender)
    .bind(recipient)
    .bind(amount_minor)
    .bind(created_at)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// Insert a new pending payment unless the id was already ingested or a
/// logical duplicate exists in the window.
///
/// Check and insert happen in one statement, so two concurrent writers with
/// different ids cannot both pass the duplicate scan and both insert.
/// Returns whether a row was created.
pub async fn insert_payment_unless_duplicate(
    pool: &SqlitePool,
    external_id: &str,
    sender: &str,
    recipient: &str,
    amount_minor: i64,
    created_at: i64,
    window_secs: i64,
) -> Result<bool> {
    let rows_affected = sqlx::query(
        r#"
        INSERT OR IGNORE INTO payments
            (external_id, sender_handle, recipient_handle, amount_minor, status, created_at)
        SELECT ?1, ?2, ?3, ?4, 'pending', ?5
        WHERE NOT EXISTS (
            SELECT 1 FROM payments
            WHERE  sender_handle = ?2 AND recipient_handle = ?3 AND amount_minor = ?4
                   AND created_at > ?5 - ?6 AND created_at <= ?5
        )
        "#,
    )
    .bind(external_id)
    .bind(sender)
    .bind(recipient)
    .bind(amount_minor)
    .bind(created_at)
    .bind(window_secs)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// Atomically move a record into `claim_in_progress`.
///
/// The guard on the prior status (`pending` or a retryable `failed`) is the
/// sole concurrency-control point in the system: exactly one concurrent
/// claimer observes `true` here.
pub async fn begin_claim(pool: &SqlitePool, external_id: &str) -> Result<bool> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE payments
        SET    status = 'claim_in_progress', failure_reason = NULL
        WHERE  external_id = ?1 AND status IN ('pending', 'failed')
        "#,
    )
    .bind(external_id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected > 0)
}

/// Finalize a successful settlement: `claim_in_progress → completed`.
pub async fn complete_claim(
    pool: &SqlitePool,
    external_id: &str,
    claimed_by: &str,
    settlement_ref: &str,
    finalized_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE payments
        SET    status = 'completed', claimed_by = ?2, settlement_ref = ?3, finalized_at = ?4
        WHERE  external_id = ?1 AND status = 'claim_in_progress'
        "#,
    )
    .bind(external_id)
    .bind(claimed_by)
    .bind(settlement_ref)
    .bind(finalized_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failed settlement attempt: `claim_in_progress → failed`.
pub async fn fail_claim(
    pool: &SqlitePool,
    external_id: &str,
    reason: &str,
    finalized_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE payments
        SET    status = 'failed', failure_reason = ?2, finalized_at = ?3
        WHERE  external_id = ?1 AND status = 'claim_in_progress'
        "#,
    )
    .bind(external_id)
    .bind(reason)
    .bind(finalized_at)
    .execute(pool)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Payment reads
// ─────────────────────────────────────────────────────────

/// Point lookup by the idempotency key.
pub async fn get_payment(pool: &SqlitePool, external_id: &str) -> Result<Option<PaymentRecord>> {
    let row = sqlx::query_as::<_, PaymentRecord>(
        r#"
        SELECT external_id, sender_handle, recipient_handle, amount_minor, status,
               claimed_by, settlement_ref, failure_reason, created_at, finalized_at
        FROM   payments
        WHERE  external_id = ?1
        "#,
    )
    .bind(external_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Range scan for a logical duplicate: same `(sender, recipient, amount)`
/// created within the window ending at `observed_at`.
pub async fn find_logical_duplicate(
    pool: &SqlitePool,
    sender: &str,
    recipient: &str,
    amount_minor: i64,
    observed_at: i64,
    window_secs: i64,
) -> Result<Option<PaymentRecord>> {
    let row = sqlx::query_as::<_, PaymentRecord>(
        r#"
        SELECT external_id, sender_handle, recipient_handle, amount_minor, status,
               claimed_by, settlement_ref, failure_reason, created_at, finalized_at
        FROM   payments
        WHERE  sender_handle = ?1 AND recipient_handle = ?2 AND amount_minor = ?3
               AND created_at > ?4 AND created_at <= ?5
        LIMIT  1
        "#,
    )
    .bind(sender)
    .bind(recipient)
    .bind(amount_minor)
    .bind(observed_at - window_secs)
    .bind(observed_at)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// All payments addressed to a recipient, newest first.
pub async fn list_for_recipient(
    pool: &SqlitePool,
    recipient: &str,
) -> Result<Vec<PaymentRecord>> {
    let rows = sqlx::query_as::<_, PaymentRecord>(
        r#"
        SELECT external_id, sender_handle, recipient_handle, amount_minor, status,
               claimed_by, settlement_ref, failure_reason, created_at, finalized_at
        FROM   payments
        WHERE  recipient_handle = ?1
        ORDER  BY created_at DESC
        "#,
    )
    .bind(recipient)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Current status of a record, if it exists.
pub async fn get_status(pool: &SqlitePool, external_id: &str) -> Result<Option<PaymentStatus>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT status FROM payments WHERE external_id = ?1")
            .bind(external_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|(s,)| PaymentStatus::from_str(&s)))
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    // A single connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}
