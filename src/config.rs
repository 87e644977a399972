//! Application configuration loaded from environment variables.

use crate::errors::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Message feed API base URL (e.g. https://feed.example.com)
    pub feed_url: String,
    /// Chain RPC endpoint used for account status and transfers
    pub chain_url: String,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// How often (in seconds) to run an intake scan cycle
    pub scan_interval_secs: u64,
    /// Maximum number of candidate messages to fetch per cycle
    pub feed_page_size: u32,
    /// The bot's own handle, stripped from command text before parsing
    pub bot_handle: String,
    /// Settlement token mint address (USDC)
    pub token_mint: String,
    /// Custodial vault account acting as delegate and fee payer
    pub vault_account: String,
    /// Logical-duplicate suppression window, in minutes
    pub duplicate_window_mins: i64,
    /// How long (in seconds) to wait for on-chain confirmation of a transfer
    pub confirm_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            feed_url: env_var("FEED_URL").map_err(|_| {
                EngineError::Config("FEED_URL environment variable is required".to_string())
            })?,
            chain_url: env_var("CHAIN_URL").map_err(|_| {
                EngineError::Config("CHAIN_URL environment variable is required".to_string())
            })?,
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./paydrop.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| EngineError::Config("Invalid API_PORT".to_string()))?,
            scan_interval_secs: env_var("SCAN_INTERVAL_SECS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()
                .map_err(|_| EngineError::Config("Invalid SCAN_INTERVAL_SECS".to_string()))?,
            feed_page_size: env_var("FEED_PAGE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|_| EngineError::Config("Invalid FEED_PAGE_SIZE".to_string()))?,
            bot_handle: env_var("BOT_HANDLE").unwrap_or_else(|_| "paydrop".to_string()),
            token_mint: env_var("TOKEN_MINT").map_err(|_| {
                EngineError::Config("TOKEN_MINT environment variable is required".to_string())
            })?,
            vault_account: env_var("VAULT_ACCOUNT").map_err(|_| {
                EngineError::Config("VAULT_ACCOUNT environment variable is required".to_string())
            })?,
            duplicate_window_mins: env_var("DUPLICATE_WINDOW_MINS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .map_err(|_| EngineError::Config("Invalid DUPLICATE_WINDOW_MINS".to_string()))?,
            confirm_timeout_secs: env_var("CONFIRM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| EngineError::Config("Invalid CONFIRM_TIMEOUT_SECS".to_string()))?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| EngineError::Config(format!("Missing env var: {key}")))
}
