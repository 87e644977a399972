//! End-to-end flow: ingest a command message from a mock feed, then settle
//! the claim against a mock chain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use paydrop::chain::{AccountStatus, ChainClient, ConfirmStatus};
use paydrop::claim::{self, ClaimSettings};
use paydrop::db;
use paydrop::errors::{EngineError, Result};
use paydrop::models::Candidate;
use paydrop::scanner;

const WINDOW: i64 = 120 * 60;

async fn pool() -> SqlitePool {
    // A single connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn settings() -> ClaimSettings {
    ClaimSettings {
        token_mint: "USDC_MINT".to_string(),
        vault_account: "VAULT".to_string(),
        confirm_timeout: Duration::from_secs(5),
    }
}

/// Mock chain: one funded sender (`bob`), counting transfer submissions.
struct MockChain {
    balance: i64,
    allowance: i64,
    submissions: AtomicUsize,
}

impl MockChain {
    fn funded(balance: i64, allowance: i64) -> Self {
        Self {
            balance,
            allowance,
            submissions: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn resolve_account(&self, handle: &str) -> Result<Option<String>> {
        Ok((handle == "bob").then(|| "BOB_USDC_ACCOUNT".to_string()))
    }

    async fn get_account_status(
        &self,
        account: &str,
        _mint: &str,
    ) -> Result<Option<AccountStatus>> {
        if account != "BOB_USDC_ACCOUNT" {
            return Ok(None);
        }
        Ok(Some(AccountStatus {
            balance: self.balance,
            delegated_allowance: self.allowance,
            delegate: Some("VAULT".to_string()),
        }))
    }

    async fn submit_transfer(
        &self,
        _source: &str,
        _destination: &str,
        _delegate_authority: &str,
        _amount_minor: i64,
    ) -> Result<String> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(format!("SIG_{n}"))
    }

    async fn confirm(&self, _settlement_ref: &str, _timeout: Duration) -> Result<ConfirmStatus> {
        Ok(ConfirmStatus::Confirmed)
    }
}

fn bob_message(id: &str, text: &str) -> Candidate {
    Candidate {
        external_id: id.to_string(),
        author_ref: "8844".to_string(),
        text: text.to_string(),
        is_retweet: false,
        is_quote: false,
    }
}

fn author_map() -> HashMap<String, String> {
    HashMap::from([("8844".to_string(), "Bob".to_string())])
}

#[tokio::test]
async fn ingest_then_claim_settles_exactly_once() {
    let pool = pool().await;
    let chain = MockChain::funded(10_000_000, 10_000_000);

    // Ingest: `{id:"100", author:"bob", text:"@bot send @alice $3"}`.
    let batch = vec![bob_message("100", "@bot send @alice $3")];
    let wm = scanner::ingest_batch(&pool, &batch, &author_map(), None, "bot", WINDOW, 1_000)
        .await
        .unwrap();
    assert_eq!(wm.as_deref(), Some("100"));

    let rec = db::get_payment(&pool, "100").await.unwrap().unwrap();
    assert_eq!(rec.sender_handle, "bob");
    assert_eq!(rec.recipient_handle, "alice");
    assert_eq!(rec.amount_minor, 3_000_000);
    assert_eq!(rec.status, "pending");

    // Alice lists her claims; the snapshot shows bob can cover it.
    let views = claim::list_claims(&pool, &chain, &settings(), "alice")
        .await
        .unwrap();
    assert_eq!(views.len(), 1);
    assert!(views[0].authorization.covers(3_000_000));

    // Claim settles exactly once.
    let receipt = claim::claim(&pool, &chain, &settings(), "100", "ALICE_USDC_ACCOUNT", "alice")
        .await
        .unwrap();
    assert!(!receipt.settlement_ref.is_empty());
    assert_eq!(receipt.amount_minor, 3_000_000);

    let rec = db::get_payment(&pool, "100").await.unwrap().unwrap();
    assert_eq!(rec.status, "completed");
    assert_eq!(rec.claimed_by.as_deref(), Some("ALICE_USDC_ACCOUNT"));
    assert_eq!(chain.submissions.load(Ordering::SeqCst), 1);

    // Re-ingesting the same message never disturbs the completed record.
    scanner::ingest_batch(&pool, &batch, &author_map(), None, "bot", WINDOW, 2_000)
        .await
        .unwrap();
    let rec = db::get_payment(&pool, "100").await.unwrap().unwrap();
    assert_eq!(rec.status, "completed");
}

#[tokio::test]
async fn concurrent_claims_have_one_winner_and_one_transfer() {
    let pool = pool().await;
    let chain = MockChain::funded(10_000_000, 10_000_000);

    db::insert_payment(&pool, "100", "bob", "alice", 3_000_000, 0)
        .await
        .unwrap();

    let s = settings();
    let (a, b) = tokio::join!(
        claim::claim(&pool, &chain, &s, "100", "DEST_A", "alice"),
        claim::claim(&pool, &chain, &s, "100", "DEST_B", "alice"),
    );

    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for r in [a, b] {
        if let Err(e) = r {
            assert!(matches!(e, EngineError::AlreadyClaimed));
        }
    }
    assert_eq!(chain.submissions.load(Ordering::SeqCst), 1);

    let rec = db::get_payment(&pool, "100").await.unwrap().unwrap();
    assert_eq!(rec.status, "completed");
}

#[tokio::test]
async fn underfunded_sender_blocks_the_claim() {
    let pool = pool().await;
    // Allowance below the payment amount.
    let chain = MockChain::funded(10_000_000, 1_000_000);

    let batch = vec![bob_message("100", "send @alice $3")];
    scanner::ingest_batch(&pool, &batch, &author_map(), None, "bot", WINDOW, 1_000)
        .await
        .unwrap();

    let err = claim::claim(&pool, &chain, &settings(), "100", "DEST", "alice")
        .await
        .unwrap_err();
    match err {
        EngineError::PaymentRequired {
            balance,
            allowance,
            required,
        } => {
            assert_eq!(balance, 10_000_000);
            assert_eq!(allowance, 1_000_000);
            assert_eq!(required, 3_000_000);
        }
        other => panic!("expected PaymentRequired, got {other:?}"),
    }

    let rec = db::get_payment(&pool, "100").await.unwrap().unwrap();
    assert_eq!(rec.status, "failed");
    assert_eq!(chain.submissions.load(Ordering::SeqCst), 0);
}
