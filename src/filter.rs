//! Replay/Duplicate Filter — decides whether a candidate payment event is
//! new, an exact replay, or a logical duplicate of a recent one.
//!
//! The exact-replay point lookup runs first because it is cheap and
//! unambiguous; the logical-duplicate range scan only runs when it misses.

use sqlx::SqlitePool;

use crate::db;
use crate::errors::Result;

/// Classification of one candidate payment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Unseen — admit for creation.
    New,
    /// The originating message was already ingested.
    ExactReplay,
    /// Same `(sender, recipient, amount)` recorded within the duplicate
    /// window under a different message id.
    LogicalDuplicate,
}

/// Classify a candidate against the ledger.
///
/// Store errors abort only this candidate; the caller logs and moves on.
pub async fn classify(
    pool: &SqlitePool,
    external_id: &str,
    sender: &str,
    recipient: &str,
    amount_minor: i64,
    observed_at: i64,
    window_secs: i64,
) -> Result<Admission> {
    if db::get_payment(pool, external_id).await?.is_some() {
        return Ok(Admission::ExactReplay);
    }

    let dup = db::find_logical_duplicate(
        pool,
        sender,
        recipient,
        amount_minor,
        observed_at,
        window_secs,
    )
    .await?;

    Ok(if dup.is_some() {
        Admission::LogicalDuplicate
    } else {
        Admission::New
    })
}
