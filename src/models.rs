//! Core domain types: payment lifecycle states, the ledger record, and the
//! shapes exchanged with the feed and chain clients.

use serde::{Deserialize, Serialize};

/// Lifecycle of a payment record.
///
/// `pending → claim_in_progress → completed`, or `→ failed`. A `failed`
/// record may be retried into a fresh claim attempt; `completed` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    ClaimInProgress,
    Completed,
    Failed,
}

impl PaymentStatus {
    /// Short identifier string as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ClaimInProgress => "claim_in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "claim_in_progress" => Some(Self::ClaimInProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A payment row as stored in / read from the database.
///
/// `amount_minor` is in token minor units (six decimals for USDC).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentRecord {
    pub external_id: String,
    pub sender_handle: String,
    pub recipient_handle: String,
    pub amount_minor: i64,
    pub status: String,
    pub claimed_by: Option<String>,
    pub settlement_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: i64,
    pub finalized_at: Option<i64>,
}

/// One raw candidate message from the feed, before command parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub external_id: String,
    /// Opaque author reference (numeric id or handle, feed-dependent).
    pub author_ref: String,
    pub text: String,
    #[serde(default)]
    pub is_retweet: bool,
    #[serde(default)]
    pub is_quote: bool,
}

/// Sender's current standing against the vault, fetched fresh before every
/// settlement attempt. Never cached across claims.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AuthorizationSnapshot {
    pub token_balance: i64,
    pub delegated_allowance: i64,
    pub is_authorized: bool,
}

impl AuthorizationSnapshot {
    /// The zero snapshot used for missing or never-initialized accounts.
    pub fn none() -> Self {
        Self {
            token_balance: 0,
            delegated_allowance: 0,
            is_authorized: false,
        }
    }

    /// Whether this snapshot covers a transfer of `amount_minor`.
    pub fn covers(&self, amount_minor: i64) -> bool {
        self.is_authorized
            && self.delegated_allowance >= amount_minor
            && self.token_balance >= amount_minor
    }
}

/// Normalize an identity string: lowercase, leading `@` stripped.
pub fn normalize_handle(raw: &str) -> String {
    raw.trim().trim_start_matches('@').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for s in [
            PaymentStatus::Pending,
            PaymentStatus::ClaimInProgress,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
        ] {
            assert_eq!(PaymentStatus::from_str(s.as_str()), Some(s));
        }
        assert_eq!(PaymentStatus::from_str("settled"), None);
    }

    #[test]
    fn handle_normalization() {
        assert_eq!(normalize_handle("@Alice"), "alice");
        assert_eq!(normalize_handle("  BOB "), "bob");
        assert_eq!(normalize_handle("carol"), "carol");
    }

    #[test]
    fn snapshot_coverage() {
        let snap = AuthorizationSnapshot {
            token_balance: 10_000_000,
            delegated_allowance: 5_000_000,
            is_authorized: true,
        };
        assert!(snap.covers(5_000_000));
        assert!(!snap.covers(5_000_001));
        assert!(!AuthorizationSnapshot::none().covers(1));
    }
}
