//! Application-wide error types.
//!
//! The claim-facing variants (`Validation` through `ConfirmationTimeout`)
//! form the taxonomy surfaced to API callers; the rest are ambient
//! infrastructure failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Payment not found")]
    NotFound,

    #[error("Requesting handle is not the payment recipient")]
    Forbidden,

    #[error("Payment already claimed or claim in progress")]
    AlreadyClaimed,

    /// Sender cannot currently cover the payment through the vault.
    /// Carries the fresh snapshot so the recipient can see why.
    #[error(
        "Payment requires authorization: balance={balance}, allowance={allowance}, required={required}"
    )]
    PaymentRequired {
        balance: i64,
        allowance: i64,
        required: i64,
    },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Transfer was submitted but confirmation never arrived. The attempted
    /// reference is preserved for manual reconciliation.
    #[error("Confirmation timed out for settlement attempt {attempted_ref}")]
    ConfirmationTimeout { attempted_ref: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
