//! Intake Scanner — long-running background task that polls the message
//! feed, turns command messages into pending payment records, and advances
//! the watermark.
//!
//! The watermark is written once per fully-processed batch, never per item,
//! so a crash mid-batch reprocesses at most one batch — which is safe
//! because ingestion is idempotent on the message id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::command;
use crate::config::Config;
use crate::db;
use crate::errors::Result;
use crate::feed::{FeedError, MessageFeed};
use crate::filter::{self, Admission};
use crate::models::{normalize_handle, Candidate};
use crate::units;

pub struct ScannerState {
    pub pool: SqlitePool,
    pub config: Config,
    pub feed: Arc<dyn MessageFeed>,
}

/// Spawn the scanner loop as a background [`tokio`] task.
pub async fn run(state: Arc<ScannerState>) {
    info!(
        "Scanner starting — interval {}s, page size {}",
        state.config.scan_interval_secs, state.config.feed_page_size
    );

    loop {
        if let Err(e) = scan_once(&state).await {
            error!("Scan cycle error: {e}");
        }
        tokio::time::sleep(Duration::from_secs(state.config.scan_interval_secs)).await;
    }
}

/// Perform a single scan cycle: poll, ingest, advance the watermark.
///
/// Feed unavailability or rate limiting skips the whole cycle with the
/// watermark untouched; there is no partial advance.
async fn scan_once(state: &ScannerState) -> Result<()> {
    let watermark = db::get_watermark(&state.pool).await?;

    let candidates = match state
        .feed
        .poll(watermark.as_deref(), state.config.feed_page_size)
        .await
    {
        Ok(candidates) => candidates,
        Err(FeedError::RateLimited) => {
            warn!("Feed rate limited; skipping this cycle");
            return Ok(());
        }
        Err(FeedError::Unavailable(e)) => {
            warn!("Feed unavailable ({e}); skipping this cycle");
            return Ok(());
        }
    };

    if candidates.is_empty() {
        return Ok(());
    }

    // Resolve authors up front; unresolved ids fall back to the raw ref.
    let author_ids: Vec<String> = candidates.iter().map(|c| c.author_ref.clone()).collect();
    let authors = match state.feed.resolve_authors(&author_ids).await {
        Ok(map) => map,
        Err(e) => {
            warn!("Author resolution failed ({e}); skipping this cycle");
            return Ok(());
        }
    };

    let window_secs = state.config.duplicate_window_mins * 60;
    let new_watermark = ingest_batch(
        &state.pool,
        &candidates,
        &authors,
        watermark.as_deref(),
        &state.config.bot_handle,
        window_secs,
        Utc::now().timestamp(),
    )
    .await?;

    if let Some(wm) = new_watermark {
        info!("Scan cycle done; watermark now {wm}");
    }
    Ok(())
}

/// Convert a batch of raw candidates into admitted payment records, then
/// persist the new watermark. Returns the watermark written, if any.
///
/// The maximum message id is tracked across the whole batch — including
/// skipped and non-command messages — so the next poll never re-fetches it.
pub async fn ingest_batch(
    pool: &SqlitePool,
    candidates: &[Candidate],
    authors: &HashMap<String, String>,
    watermark: Option<&str>,
    bot_handle: &str,
    duplicate_window_secs: i64,
    observed_at: i64,
) -> Result<Option<String>> {
    let mut max_id = watermark.map(String::from);
    let mut admitted = 0usize;

    for candidate in candidates {
        max_id = Some(units::cursor_max(max_id.as_deref(), &candidate.external_id));

        if candidate.is_retweet || candidate.is_quote || command::is_manual_repost(&candidate.text)
        {
            continue;
        }

        // Drop the bot's own mention so it can never be read as a recipient.
        let text = command::strip_mention(&candidate.text, bot_handle);
        let Some(intent) = command::parse_command(&text) else {
            continue;
        };

        let sender = authors
            .get(&candidate.author_ref)
            .map(|h| normalize_handle(h))
            .unwrap_or_else(|| normalize_handle(&candidate.author_ref));

        if sender.is_empty() || sender == intent.recipient {
            continue;
        }

        // A store error aborts only this candidate, never the batch.
        let admission = match filter::classify(
            pool,
            &candidate.external_id,
            &sender,
            &intent.recipient,
            intent.amount_minor,
            observed_at,
            duplicate_window_secs,
        )
        .await
        {
            Ok(admission) => admission,
            Err(e) => {
                warn!(
                    "Skipping candidate {} after store error: {e}",
                    candidate.external_id
                );
                continue;
            }
        };

        match admission {
            Admission::New => {}
            Admission::ExactReplay | Admission::LogicalDuplicate => continue,
        }

        // Guarded insert: the duplicate scan repeats inside the statement,
        // closing the race against the manual-record path.
        match db::insert_payment_unless_duplicate(
            pool,
            &candidate.external_id,
            &sender,
            &intent.recipient,
            intent.amount_minor,
            observed_at,
            duplicate_window_secs,
        )
        .await
        {
            Ok(true) => admitted += 1,
            Ok(false) => {}
            Err(e) => {
                warn!(
                    "Skipping candidate {} after insert error: {e}",
                    candidate.external_id
                );
            }
        }
    }

    if admitted > 0 {
        info!(
            "Ingested {admitted} new payment(s) from {} candidate(s)",
            candidates.len()
        );
    }

    // Single atomic advance after the whole batch.
    let advanced = match (&max_id, watermark) {
        (Some(new), Some(old)) => new != old,
        (Some(_), None) => true,
        (None, _) => false,
    };
    if advanced {
        let wm = max_id.as_deref().unwrap_or_default();
        db::save_watermark(pool, wm).await?;
    }

    Ok(max_id)
}
