//! Message feed client — polls the social feed for candidate messages.
//!
//! The engine only depends on the [`MessageFeed`] trait; the HTTP
//! implementation here talks to the feed's REST API. Rate limiting is a
//! distinguished condition: the scanner skips the cycle instead of treating
//! it as a hard failure.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::models::Candidate;

#[derive(Debug, Error)]
pub enum FeedError {
    /// The feed asked us to back off; retry on the next cycle.
    #[error("Feed rate limited")]
    RateLimited,

    #[error("Feed unavailable: {0}")]
    Unavailable(String),
}

/// Abstract feed contract consumed by the intake scanner.
#[async_trait]
pub trait MessageFeed: Send + Sync {
    /// Fetch one page of candidate messages newer than `since`.
    async fn poll(
        &self,
        since: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Candidate>, FeedError>;

    /// Resolve opaque author references to handles. Unresolvable ids are
    /// simply absent from the map.
    async fn resolve_authors(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, String>, FeedError>;
}

// ─────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────

pub struct HttpFeed {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    messages: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    users: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    id: String,
    handle: String,
}

impl HttpFeed {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MessageFeed for HttpFeed {
    async fn poll(
        &self,
        since: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Candidate>, FeedError> {
        let mut req = self
            .client
            .get(format!("{}/messages", self.base_url))
            .query(&[("limit", limit.to_string())]);
        if let Some(since_id) = since {
            req = req.query(&[("since_id", since_id)]);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FeedError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(FeedError::Unavailable(format!(
                "feed returned {}",
                resp.status()
            )));
        }

        let body: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;

        debug!("Fetched {} candidate messages", body.messages.len());
        Ok(body.messages)
    }

    async fn resolve_authors(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, String>, FeedError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let resp = self
            .client
            .get(format!("{}/users", self.base_url))
            .query(&[("ids", ids.join(","))])
            .send()
            .await
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FeedError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(FeedError::Unavailable(format!(
                "user lookup returned {}",
                resp.status()
            )));
        }

        let body: UsersResponse = resp
            .json()
            .await
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;

        Ok(body
            .users
            .into_iter()
            .map(|u| (u.id, u.handle))
            .collect())
    }
}
