// src/ingest/providers/mod.rs
pub mod bluesky;
pub mod mastodon;
pub mod reddit;
pub mod scripted;

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::error::{HarvestError, Result};

pub const USER_AGENT: &str = concat!("election-harvester/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client for upstream calls. The fetcher enforces its own
/// per-attempt timeout; this one is a backstop for hung connections.
pub fn http_client(timeout: Duration, user_agent: Option<&str>) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout + Duration::from_secs(5))
        .user_agent(user_agent.unwrap_or(USER_AGENT))
        .build()
        .context("building upstream http client")
}

/// Send a request and return the body of a 2xx answer, mapping failures to
/// the taxonomy.
pub(crate) async fn send_text(req: reqwest::RequestBuilder, timeout: Duration) -> Result<String> {
    let resp = req
        .send()
        .await
        .map_err(|e| HarvestError::from_http(&e, timeout))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(HarvestError::from_status(status, &body));
    }
    resp.text()
        .await
        .map_err(|e| HarvestError::from_http(&e, timeout))
}

pub(crate) async fn send_json<T: DeserializeOwned>(
    req: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<T> {
    let text = send_text(req, timeout).await?;
    serde_json::from_str(&text).map_err(|e| HarvestError::Decode(e.to_string()))
}

/// RFC 3339 to UTC; unparseable input gives `None` (the filter skips it).
pub(crate) fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_variants() {
        assert!(parse_rfc3339("2025-04-01T10:00:00.000Z").is_some());
        assert!(parse_rfc3339("2025-04-01T20:00:00+10:00").is_some());
        assert_eq!(
            parse_rfc3339("2025-04-01T20:00:00+10:00"),
            parse_rfc3339("2025-04-01T10:00:00Z")
        );
        assert!(parse_rfc3339("yesterday").is_none());
    }
}
