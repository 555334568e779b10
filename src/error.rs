// src/error.rs
//! Typed failure taxonomy for the harvest pipeline.
//!
//! Per-record sink failures are not errors; they travel as data in
//! [`crate::ingest::sink::FlushReport`].

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HarvestError {
    #[error("upstream request timed out after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("upstream transient failure: {0}")]
    Transient(String),

    #[error("upstream unavailable after {attempts} attempt(s): {reason}")]
    UpstreamUnavailable { attempts: u32, reason: String },

    #[error("authentication failed after {attempts} attempt(s): {reason}")]
    Authentication { attempts: u32, reason: String },

    /// Returned by an upstream when a previously valid session token is rejected.
    #[error("session rejected by upstream: {0}")]
    SessionExpired(String),

    #[error("cursor persistence failed: {0}")]
    Persistence(String),

    #[error("stale cursor rejected: stored {stored}, offered {offered}")]
    StaleCursor { stored: String, offered: String },

    #[error("cursor moved against scan direction: {0}")]
    CursorDirection(String),

    #[error("could not decode upstream response: {0}")]
    Decode(String),
}

impl HarvestError {
    /// Whether the page fetcher may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamTimeout(_) | Self::Transient(_))
    }

    /// Map a `reqwest` failure to the taxonomy. Timeouts and connection
    /// problems are transient; everything else is a decode problem.
    pub fn from_http(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout(timeout)
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::Transient(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }

    /// Map a non-success HTTP status to the taxonomy.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        match status.as_u16() {
            401 => Self::SessionExpired(format!("{status}: {snippet}")),
            403 => Self::Authentication {
                attempts: 1,
                reason: format!("{status}: {snippet}"),
            },
            408 | 425 | 429 => Self::Transient(format!("{status}: {snippet}")),
            s if s >= 500 => Self::Transient(format!("{status}: {snippet}")),
            _ => Self::UpstreamUnavailable {
                attempts: 1,
                reason: format!("{status}: {snippet}"),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_and_transients_retry() {
        assert!(HarvestError::UpstreamTimeout(Duration::from_secs(1)).is_retryable());
        assert!(HarvestError::Transient("reset".into()).is_retryable());
        assert!(!HarvestError::Persistence("down".into()).is_retryable());
        assert!(!HarvestError::Authentication {
            attempts: 3,
            reason: "bad password".into()
        }
        .is_retryable());
    }

    #[test]
    fn status_mapping() {
        use reqwest::StatusCode;
        assert!(HarvestError::from_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(HarvestError::from_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(matches!(
            HarvestError::from_status(StatusCode::UNAUTHORIZED, ""),
            HarvestError::SessionExpired(_)
        ));
        assert!(matches!(
            HarvestError::from_status(StatusCode::NOT_FOUND, "no such tag"),
            HarvestError::UpstreamUnavailable { .. }
        ));
    }
}
