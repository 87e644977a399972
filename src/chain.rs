//! Chain client — account status, delegated transfers, and confirmation.
//!
//! The [`ChainClient`] trait is the black-box boundary the settlement logic
//! depends on: submit a transfer, get a signature or an error. The HTTP
//! implementation speaks a small JSON-RPC dialect. The Authorization
//! Verifier lives here too since it is a thin read over the same client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{EngineError, Result};
use crate::models::AuthorizationSnapshot;

/// On-chain token-account state relevant to a delegated transfer.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountStatus {
    pub balance: i64,
    pub delegated_allowance: i64,
    pub delegate: Option<String>,
}

/// Outcome of waiting for a submitted transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmStatus {
    Confirmed,
    Failed(String),
    TimedOut,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Map a normalized handle to its settlement account, if the user has
    /// linked one. `None` is "never initialized", not an error.
    async fn resolve_account(&self, handle: &str) -> Result<Option<String>>;

    /// Current state of a token account. `None` when the account does not
    /// exist on chain.
    async fn get_account_status(
        &self,
        account: &str,
        mint: &str,
    ) -> Result<Option<AccountStatus>>;

    /// Submit a single delegated transfer of `amount_minor` minor units.
    /// Returns the settlement reference (transaction signature).
    async fn submit_transfer(
        &self,
        source: &str,
        destination: &str,
        delegate_authority: &str,
        amount_minor: i64,
    ) -> Result<String>;

    /// Wait for the transfer to land, bounded by `timeout`.
    async fn confirm(&self, settlement_ref: &str, timeout: Duration) -> Result<ConfirmStatus>;
}

/// Answer "can this sender currently cover this payment via the vault?".
///
/// Always queried fresh immediately before settlement — allowance can be
/// revoked or spent between claim request and execution, so the snapshot is
/// never cached across claims.
pub async fn verify_authorization(
    chain: &dyn ChainClient,
    sender_account: Option<&str>,
    mint: &str,
    vault_account: &str,
) -> Result<AuthorizationSnapshot> {
    let Some(account) = sender_account else {
        return Ok(AuthorizationSnapshot::none());
    };

    let Some(status) = chain.get_account_status(account, mint).await? else {
        return Ok(AuthorizationSnapshot::none());
    };

    let is_authorized = status.delegate.as_deref() == Some(vault_account)
        && status.delegated_allowance > 0;

    Ok(AuthorizationSnapshot {
        token_balance: status.balance,
        delegated_allowance: status.delegated_allowance,
        is_authorized,
    })
}

// ─────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────

pub struct HttpChain {
    client: Client,
    rpc_url: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl HttpChain {
    pub fn new(client: Client, rpc_url: impl Into<String>) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(format!("chain rpc: {e}")))?;

        let body: RpcResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::UpstreamUnavailable(format!("chain rpc: {e}")))?;

        if let Some(err) = body.error {
            return Err(EngineError::UpstreamUnavailable(format!(
                "chain rpc error {}: {}",
                err.code, err.message
            )));
        }

        body.result
            .ok_or_else(|| EngineError::UpstreamUnavailable(format!("empty result from {method}")))
    }
}

#[async_trait]
impl ChainClient for HttpChain {
    async fn resolve_account(&self, handle: &str) -> Result<Option<String>> {
        let result = self
            .call("resolveAccount", json!({ "handle": handle }))
            .await?;
        Ok(result
            .get("account")
            .and_then(|v| v.as_str())
            .map(String::from))
    }

    async fn get_account_status(
        &self,
        account: &str,
        mint: &str,
    ) -> Result<Option<AccountStatus>> {
        let result = self
            .call(
                "getAccountStatus",
                json!({ "account": account, "mint": mint }),
            )
            .await?;

        if result.is_null() {
            return Ok(None);
        }
        let status: AccountStatus = serde_json::from_value(result)?;
        Ok(Some(status))
    }

    async fn submit_transfer(
        &self,
        source: &str,
        destination: &str,
        delegate_authority: &str,
        amount_minor: i64,
    ) -> Result<String> {
        let result = self
            .call(
                "submitTransfer",
                json!({
                    "source": source,
                    "destination": destination,
                    "delegate": delegate_authority,
                    "amount": amount_minor,
                }),
            )
            .await?;

        result
            .get("signature")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                EngineError::UpstreamUnavailable("transfer submitted without signature".to_string())
            })
    }

    async fn confirm(&self, settlement_ref: &str, timeout: Duration) -> Result<ConfirmStatus> {
        // Poll until the deadline; one poll every two seconds.
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let result = self
                .call("getTransferStatus", json!({ "signature": settlement_ref }))
                .await?;

            match result.get("status").and_then(|v| v.as_str()) {
                Some("confirmed") => return Ok(ConfirmStatus::Confirmed),
                Some("failed") => {
                    let reason = result
                        .get("reason")
                        .and_then(|v| v.as_str())
                        .unwrap_or("on-chain failure")
                        .to_string();
                    return Ok(ConfirmStatus::Failed(reason));
                }
                _ => {
                    debug!("Transfer {settlement_ref} not yet confirmed");
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(ConfirmStatus::TimedOut);
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }
}
