//! Claim Settlement — the state machine that takes a pending payment,
//! re-validates authorization, submits exactly one on-chain transfer, and
//! finalizes or rolls back the record.
//!
//! Transitions: `pending → claim_in_progress → completed`, or
//! `claim_in_progress → failed`. A `failed` record may be retried; nothing
//! ever leaves `completed`. The conditional UPDATE in [`db::begin_claim`]
//! is the sole concurrency-control point — concurrent claimers race it and
//! exactly one wins.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::chain::{self, ChainClient, ConfirmStatus};
use crate::config::Config;
use crate::db;
use crate::errors::{EngineError, Result};
use crate::filter::{self, Admission};
use crate::models::{normalize_handle, AuthorizationSnapshot, PaymentRecord, PaymentStatus};
use crate::units;

/// Settlement parameters, extracted from [`Config`] so the state machine
/// does not drag the feed/API configuration along.
#[derive(Debug, Clone)]
pub struct ClaimSettings {
    pub token_mint: String,
    pub vault_account: String,
    pub confirm_timeout: Duration,
}

impl ClaimSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            token_mint: config.token_mint.clone(),
            vault_account: config.vault_account.clone(),
            confirm_timeout: Duration::from_secs(config.confirm_timeout_secs),
        }
    }
}

/// Successful settlement result returned to the claimer.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimReceipt {
    pub external_id: String,
    pub settlement_ref: String,
    pub amount_minor: i64,
}

/// A payment record enriched with the sender's current authorization
/// standing, for claim listings.
#[derive(Debug, Serialize)]
pub struct ClaimView {
    #[serde(flatten)]
    pub record: PaymentRecord,
    pub authorization: AuthorizationSnapshot,
}

/// Execute the claim protocol for one payment record.
pub async fn claim(
    pool: &SqlitePool,
    chain_client: &dyn ChainClient,
    settings: &ClaimSettings,
    external_id: &str,
    destination_account: &str,
    requesting_handle: &str,
) -> Result<ClaimReceipt> {
    let record = db::get_payment(pool, external_id)
        .await?
        .ok_or(EngineError::NotFound)?;

    if normalize_handle(requesting_handle) != record.recipient_handle {
        return Err(EngineError::Forbidden);
    }
    if record.status == PaymentStatus::Completed.as_str() {
        return Err(EngineError::AlreadyClaimed);
    }

    // Exactly one concurrent claimer passes this guard.
    if !db::begin_claim(pool, external_id).await? {
        return Err(EngineError::AlreadyClaimed);
    }

    // From here on the record is `claim_in_progress` and must be finalized
    // one way or the other before returning.
    match settle(pool, chain_client, settings, &record, destination_account).await {
        Ok(receipt) => Ok(receipt),
        Err(e) => {
            // `settle` already finalized taxonomy failures; roll back
            // anything else (upstream errors) so the claim stays retryable.
            if db::get_status(pool, external_id).await? == Some(PaymentStatus::ClaimInProgress) {
                db::fail_claim(pool, external_id, &e.to_string(), Utc::now().timestamp()).await?;
            }
            Err(e)
        }
    }
}

/// The post-guard half of the claim: authorization check, transfer,
/// confirmation, finalization.
async fn settle(
    pool: &SqlitePool,
    chain_client: &dyn ChainClient,
    settings: &ClaimSettings,
    record: &PaymentRecord,
    destination_account: &str,
) -> Result<ClaimReceipt> {
    let sender_account = chain_client.resolve_account(&record.sender_handle).await?;

    // Fresh snapshot every attempt; never cached across claims.
    let snapshot = chain::verify_authorization(
        chain_client,
        sender_account.as_deref(),
        &settings.token_mint,
        &settings.vault_account,
    )
    .await?;

    if !snapshot.covers(record.amount_minor) {
        let reason = format!(
            "insufficient authorization: balance={}, allowance={}, required={}",
            snapshot.token_balance, snapshot.delegated_allowance, record.amount_minor
        );
        db::fail_claim(pool, &record.external_id, &reason, Utc::now().timestamp()).await?;
        return Err(EngineError::PaymentRequired {
            balance: snapshot.token_balance,
            allowance: snapshot.delegated_allowance,
            required: record.amount_minor,
        });
    }

    // covers() implies the account resolved.
    let source = sender_account.unwrap_or_default();

    let settlement_ref = chain_client
        .submit_transfer(
            &source,
            destination_account,
            &settings.vault_account,
            record.amount_minor,
        )
        .await?;

    let confirmation = match chain_client
        .confirm(&settlement_ref, settings.confirm_timeout)
        .await
    {
        Ok(confirmation) => confirmation,
        Err(e) => {
            // The transfer may have landed even though the status check
            // died; keep the attempted reference for reconciliation, same
            // as a timeout.
            let reason =
                format!("confirmation check failed ({e}), attempted ref {settlement_ref}");
            db::fail_claim(pool, &record.external_id, &reason, Utc::now().timestamp()).await?;
            warn!("Payment {}: {reason}", record.external_id);
            return Err(EngineError::ConfirmationTimeout {
                attempted_ref: settlement_ref,
            });
        }
    };

    match confirmation {
        ConfirmStatus::Confirmed => {
            db::complete_claim(
                pool,
                &record.external_id,
                destination_account,
                &settlement_ref,
                Utc::now().timestamp(),
            )
            .await?;
            info!(
                "Payment {} settled: {} → {} ({})",
                record.external_id,
                record.sender_handle,
                record.recipient_handle,
                units::display_amount(record.amount_minor)
            );
            Ok(ClaimReceipt {
                external_id: record.external_id.clone(),
                settlement_ref,
                amount_minor: record.amount_minor,
            })
        }
        ConfirmStatus::Failed(reason) => {
            db::fail_claim(pool, &record.external_id, &reason, Utc::now().timestamp()).await?;
            Err(EngineError::UpstreamUnavailable(format!(
                "transfer failed on chain: {reason}"
            )))
        }
        ConfirmStatus::TimedOut => {
            // The transfer may or may not have landed; keep the attempted
            // reference for manual reconciliation.
            let reason = format!("confirmation timed out, attempted ref {settlement_ref}");
            db::fail_claim(pool, &record.external_id, &reason, Utc::now().timestamp()).await?;
            warn!("Payment {}: {reason}", record.external_id);
            Err(EngineError::ConfirmationTimeout {
                attempted_ref: settlement_ref,
            })
        }
    }
}

/// All payments addressed to a recipient, each with a fresh view of the
/// sender's authorization so the recipient can see which are claimable.
pub async fn list_claims(
    pool: &SqlitePool,
    chain_client: &dyn ChainClient,
    settings: &ClaimSettings,
    recipient_handle: &str,
) -> Result<Vec<ClaimView>> {
    let records = db::list_for_recipient(pool, &normalize_handle(recipient_handle)).await?;

    let mut views = Vec::with_capacity(records.len());
    for record in records {
        let sender_account = chain_client.resolve_account(&record.sender_handle).await?;
        let authorization = chain::verify_authorization(
            chain_client,
            sender_account.as_deref(),
            &settings.token_mint,
            &settings.vault_account,
        )
        .await?;
        views.push(ClaimView {
            record,
            authorization,
        });
    }
    Ok(views)
}

/// Fallback ingestion path bypassing the feed. Subject to the same
/// validation and replay/duplicate suppression as scanned messages.
pub async fn record_manual(
    pool: &SqlitePool,
    sender: &str,
    recipient: &str,
    amount: rust_decimal::Decimal,
    external_id: &str,
    duplicate_window_secs: i64,
) -> Result<PaymentRecord> {
    let sender = normalize_handle(sender);
    let recipient = normalize_handle(recipient);

    if sender.is_empty() || recipient.is_empty() {
        return Err(EngineError::Validation("empty handle".to_string()));
    }
    if sender == recipient {
        return Err(EngineError::Validation(
            "sender and recipient must differ".to_string(),
        ));
    }
    let amount_minor = units::to_minor_units(amount)
        .ok_or_else(|| EngineError::Validation("amount must be positive".to_string()))?;

    let now = Utc::now().timestamp();
    match filter::classify(
        pool,
        external_id,
        &sender,
        &recipient,
        amount_minor,
        now,
        duplicate_window_secs,
    )
    .await?
    {
        Admission::New => {}
        Admission::ExactReplay => {
            return Err(EngineError::Validation(format!(
                "message {external_id} already recorded"
            )))
        }
        Admission::LogicalDuplicate => {
            return Err(EngineError::Validation(format!(
                "duplicate of a recent {sender}→{recipient} payment"
            )))
        }
    }

    // The classification above gives the caller a precise rejection; the
    // guarded insert closes the race between that check and the write.
    let inserted = db::insert_payment_unless_duplicate(
        pool,
        external_id,
        &sender,
        &recipient,
        amount_minor,
        now,
        duplicate_window_secs,
    )
    .await?;
    if !inserted {
        return Err(EngineError::Validation(format!(
            "duplicate of a recent {sender}→{recipient} payment"
        )));
    }

    db::get_payment(pool, external_id)
        .await?
        .ok_or(EngineError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::AccountStatus;
    use crate::db::test_pool;
    use async_trait::async_trait;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> ClaimSettings {
        ClaimSettings {
            token_mint: "USDC".to_string(),
            vault_account: "VAULT".to_string(),
            confirm_timeout: Duration::from_secs(5),
        }
    }

    /// Scripted chain: configurable account state and confirmation outcome,
    /// counting transfer submissions.
    struct ScriptedChain {
        status: Option<AccountStatus>,
        outcome: ConfirmStatus,
        confirm_rpc_fails: bool,
        submissions: AtomicUsize,
    }

    impl ScriptedChain {
        fn authorized(balance: i64, allowance: i64) -> Self {
            Self {
                status: Some(AccountStatus {
                    balance,
                    delegated_allowance: allowance,
                    delegate: Some("VAULT".to_string()),
                }),
                outcome: ConfirmStatus::Confirmed,
                confirm_rpc_fails: false,
                submissions: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChainClient for ScriptedChain {
        async fn resolve_account(&self, handle: &str) -> Result<Option<String>> {
            Ok(Some(format!("ACC_{handle}")))
        }

        async fn get_account_status(
            &self,
            _account: &str,
            _mint: &str,
        ) -> Result<Option<AccountStatus>> {
            Ok(self.status.clone())
        }

        async fn submit_transfer(
            &self,
            _source: &str,
            _destination: &str,
            _delegate_authority: &str,
            _amount_minor: i64,
        ) -> Result<String> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok("SIG_1".to_string())
        }

        async fn confirm(&self, _r: &str, _t: Duration) -> Result<ConfirmStatus> {
            if self.confirm_rpc_fails {
                return Err(EngineError::UpstreamUnavailable(
                    "chain rpc: connection reset".to_string(),
                ));
            }
            Ok(self.outcome.clone())
        }
    }

    async fn seed(pool: &SqlitePool) {
        db::insert_payment(pool, "100", "bob", "alice", 3_000_000, 0)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn happy_path_completes_with_settlement_ref() {
        let pool = test_pool().await;
        seed(&pool).await;
        let chain = ScriptedChain::authorized(10_000_000, 10_000_000);

        let receipt = claim(&pool, &chain, &settings(), "100", "DEST_ALICE", "alice")
            .await
            .unwrap();
        assert_eq!(receipt.settlement_ref, "SIG_1");
        assert_eq!(receipt.amount_minor, 3_000_000);

        let rec = db::get_payment(&pool, "100").await.unwrap().unwrap();
        assert_eq!(rec.status, "completed");
        assert_eq!(rec.claimed_by.as_deref(), Some("DEST_ALICE"));
        assert_eq!(rec.settlement_ref.as_deref(), Some("SIG_1"));
        assert!(rec.finalized_at.is_some());
        assert_eq!(chain.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let pool = test_pool().await;
        let chain = ScriptedChain::authorized(1, 1);
        let err = claim(&pool, &chain, &settings(), "404", "DEST", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound));
    }

    #[tokio::test]
    async fn wrong_claimant_is_forbidden() {
        let pool = test_pool().await;
        seed(&pool).await;
        let chain = ScriptedChain::authorized(10_000_000, 10_000_000);

        let err = claim(&pool, &chain, &settings(), "100", "DEST", "mallory")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden));
        // Record untouched.
        let rec = db::get_payment(&pool, "100").await.unwrap().unwrap();
        assert_eq!(rec.status, "pending");
    }

    #[tokio::test]
    async fn low_allowance_is_payment_required_and_failed() {
        let pool = test_pool().await;
        seed(&pool).await;
        let chain = ScriptedChain::authorized(10_000_000, 2_000_000);

        let err = claim(&pool, &chain, &settings(), "100", "DEST", "@Alice")
            .await
            .unwrap_err();
        match err {
            EngineError::PaymentRequired {
                balance,
                allowance,
                required,
            } => {
                assert_eq!(balance, 10_000_000);
                assert_eq!(allowance, 2_000_000);
                assert_eq!(required, 3_000_000);
            }
            other => panic!("expected PaymentRequired, got {other:?}"),
        }
        let rec = db::get_payment(&pool, "100").await.unwrap().unwrap();
        assert_eq!(rec.status, "failed");
        assert!(rec.failure_reason.unwrap().contains("insufficient"));
        assert_eq!(chain.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_claim_sees_already_claimed() {
        let pool = test_pool().await;
        seed(&pool).await;
        let chain = ScriptedChain::authorized(10_000_000, 10_000_000);

        claim(&pool, &chain, &settings(), "100", "DEST", "alice")
            .await
            .unwrap();
        let err = claim(&pool, &chain, &settings(), "100", "DEST", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyClaimed));
        assert_eq!(chain.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn confirmation_timeout_fails_and_preserves_ref() {
        let pool = test_pool().await;
        seed(&pool).await;
        let mut chain = ScriptedChain::authorized(10_000_000, 10_000_000);
        chain.outcome = ConfirmStatus::TimedOut;

        let err = claim(&pool, &chain, &settings(), "100", "DEST", "alice")
            .await
            .unwrap_err();
        match err {
            EngineError::ConfirmationTimeout { attempted_ref } => {
                assert_eq!(attempted_ref, "SIG_1")
            }
            other => panic!("expected ConfirmationTimeout, got {other:?}"),
        }
        let rec = db::get_payment(&pool, "100").await.unwrap().unwrap();
        assert_eq!(rec.status, "failed");
        assert!(rec.failure_reason.unwrap().contains("SIG_1"));
        assert!(rec.settlement_ref.is_none());
    }

    #[tokio::test]
    async fn confirm_rpc_error_fails_and_preserves_ref() {
        let pool = test_pool().await;
        seed(&pool).await;
        let mut chain = ScriptedChain::authorized(10_000_000, 10_000_000);
        chain.confirm_rpc_fails = true;

        let err = claim(&pool, &chain, &settings(), "100", "DEST", "alice")
            .await
            .unwrap_err();
        match err {
            EngineError::ConfirmationTimeout { attempted_ref } => {
                assert_eq!(attempted_ref, "SIG_1")
            }
            other => panic!("expected ConfirmationTimeout, got {other:?}"),
        }
        // The attempted reference survives in the failure reason even
        // though the status check never answered.
        let rec = db::get_payment(&pool, "100").await.unwrap().unwrap();
        assert_eq!(rec.status, "failed");
        assert!(rec.failure_reason.unwrap().contains("SIG_1"));
        assert!(rec.settlement_ref.is_none());
        assert_eq!(chain.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_claim_is_retryable_to_completion() {
        let pool = test_pool().await;
        seed(&pool).await;

        let broke = ScriptedChain::authorized(10_000_000, 1_000_000);
        let err = claim(&pool, &broke, &settings(), "100", "DEST", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PaymentRequired { .. }));

        // Sender re-approves; the failed record can be claimed again.
        let funded = ScriptedChain::authorized(10_000_000, 10_000_000);
        let receipt = claim(&pool, &funded, &settings(), "100", "DEST", "alice")
            .await
            .unwrap();
        assert_eq!(receipt.settlement_ref, "SIG_1");
    }

    #[tokio::test]
    async fn manual_record_validates_and_suppresses_duplicates() {
        let pool = test_pool().await;
        let amount = rust_decimal::Decimal::from_str("2.5").unwrap();

        let rec = record_manual(&pool, "@Bob", "alice", amount, "900", 120 * 60)
            .await
            .unwrap();
        assert_eq!(rec.sender_handle, "bob");
        assert_eq!(rec.amount_minor, 2_500_000);

        // Exact replay.
        let err = record_manual(&pool, "bob", "alice", amount, "900", 120 * 60)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // Logical duplicate under a fresh id.
        let err = record_manual(&pool, "bob", "alice", amount, "901", 120 * 60)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // Self-payment.
        let err = record_manual(&pool, "carol", "@carol", amount, "902", 120 * 60)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
