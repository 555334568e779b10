// src/ingest/fetcher.rs
//! Page fetcher: one upstream call with timeout, fixed-backoff retry,
//! session acquisition and an inter-page delay.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

use crate::error::{HarvestError, Result};
use crate::ingest::cursor::CursorPolicy;
use crate::ingest::types::{Page, PageRequest, UpstreamApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub request_timeout: Duration,
    /// Total attempts per page, including the first.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Wait before every page except the first.
    pub page_delay: Duration,
    pub auth_attempts: u32,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_delay: Duration::from_secs(3),
            page_delay: Duration::from_secs(1),
            auth_attempts: 3,
        }
    }
}

pub struct PageFetcher<A: UpstreamApi> {
    api: A,
    policy: FetchPolicy,
    pages: usize,
    session_open: bool,
}

impl<A: UpstreamApi> PageFetcher<A> {
    pub fn new(api: A, policy: FetchPolicy) -> Self {
        Self {
            api,
            policy,
            pages: 0,
            session_open: false,
        }
    }

    pub fn name(&self) -> &str {
        self.api.name()
    }

    pub fn cursor_policy(&self) -> CursorPolicy {
        self.api.cursor_policy()
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Acquire a session if the upstream needs one and none is open.
    pub async fn ensure_session(&mut self) -> Result<()> {
        if !self.api.needs_session() || self.session_open {
            return Ok(());
        }
        let attempts = self.policy.auth_attempts.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            match tokio::time::timeout(self.policy.request_timeout, self.api.open_session()).await
            {
                Ok(Ok(())) => {
                    self.session_open = true;
                    tracing::debug!(target: "harvest", upstream = self.api.name(), attempt, "session opened");
                    return Ok(());
                }
                Ok(Err(e)) => last = e.to_string(),
                Err(_) => last = HarvestError::UpstreamTimeout(self.policy.request_timeout).to_string(),
            }
            tracing::warn!(
                target: "harvest",
                upstream = self.api.name(),
                attempt,
                max = attempts,
                error = %last,
                "session attempt failed"
            );
            if attempt < attempts {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }
        Err(HarvestError::Authentication {
            attempts,
            reason: last,
        })
    }

    /// Fetch one page. An empty page is exhaustion, not an error.
    pub async fn fetch(&mut self, req: &PageRequest) -> Result<Page> {
        if self.pages > 0 && !self.policy.page_delay.is_zero() {
            tokio::time::sleep(self.policy.page_delay).await;
        }
        self.ensure_session().await?;

        let attempts = self.policy.max_attempts.max(1);
        let mut reauthenticated = false;
        let mut last: Option<HarvestError> = None;
        let mut attempt = 0u32;

        while attempt < attempts {
            attempt += 1;
            let t0 = Instant::now();
            let res =
                tokio::time::timeout(self.policy.request_timeout, self.api.fetch_page(req)).await;
            histogram!("harvest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

            let err = match res {
                Ok(Ok(page)) => {
                    self.pages += 1;
                    counter!("harvest_pages_total").increment(1);
                    return Ok(page);
                }
                Ok(Err(HarvestError::SessionExpired(reason))) if !reauthenticated => {
                    tracing::info!(target: "harvest", upstream = self.api.name(), %reason, "session expired, re-authenticating");
                    reauthenticated = true;
                    self.session_open = false;
                    self.api.drop_session();
                    self.ensure_session().await?;
                    attempt -= 1;
                    continue;
                }
                Ok(Err(HarvestError::SessionExpired(reason))) => {
                    return Err(HarvestError::Authentication {
                        attempts: self.policy.auth_attempts,
                        reason,
                    })
                }
                Ok(Err(e)) if e.is_retryable() => e,
                Ok(Err(e)) => return Err(e),
                Err(_) => HarvestError::UpstreamTimeout(self.policy.request_timeout),
            };

            tracing::warn!(
                target: "harvest",
                upstream = self.api.name(),
                attempt,
                max = attempts,
                error = %err,
                "page fetch failed"
            );
            last = Some(err);
            if attempt < attempts {
                counter!("harvest_retries_total").increment(1);
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        Err(HarvestError::UpstreamUnavailable {
            attempts,
            reason: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::cursor::{CursorVariant, FeedOrder, HarvestCursor, ScanDirection};
    use crate::ingest::providers::scripted::ScriptedApi;

    const POLICY: CursorPolicy = CursorPolicy::new(
        CursorVariant::MaxSeenId,
        ScanDirection::Forward,
        FeedOrder::NewestFirst,
    );

    fn quick(max_attempts: u32) -> FetchPolicy {
        FetchPolicy {
            request_timeout: Duration::from_millis(200),
            max_attempts,
            retry_delay: Duration::ZERO,
            page_delay: Duration::ZERO,
            auth_attempts: 2,
        }
    }

    fn req() -> PageRequest {
        PageRequest {
            resume: HarvestCursor::Empty,
            page: None,
            limit: 10,
        }
    }

    #[tokio::test]
    async fn transient_then_page() {
        let api = ScriptedApi::new("s", POLICY)
            .fail(HarvestError::Transient("503".into()))
            .page(Vec::new(), None);
        let requests = api.requests.clone();
        let mut f = PageFetcher::new(api, quick(3));
        let page = f.fetch(&req()).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn non_retryable_fails_fast() {
        let api = ScriptedApi::new("s", POLICY).fail(HarvestError::Decode("bad json".into()));
        let requests = api.requests.clone();
        let mut f = PageFetcher::new(api, quick(3));
        let err = f.fetch(&req()).await.unwrap_err();
        assert!(matches!(err, HarvestError::Decode(_)));
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn timeouts_exhaust_into_unavailable() {
        let api = ScriptedApi::new("s", POLICY)
            .hang(Duration::from_secs(5))
            .hang(Duration::from_secs(5));
        let mut f = PageFetcher::new(api, quick(2));
        let err = f.fetch(&req()).await.unwrap_err();
        assert!(matches!(
            err,
            HarvestError::UpstreamUnavailable { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn session_failures_become_authentication() {
        let api = ScriptedApi::new("s", POLICY).with_sessions(vec![
            Err(HarvestError::Transient("login 502".into())),
            Err(HarvestError::Transient("login 502".into())),
        ]);
        let calls = api.session_calls.clone();
        let requests = api.requests.clone();
        let mut f = PageFetcher::new(api, quick(3));
        let err = f.fetch(&req()).await.unwrap_err();
        assert!(matches!(err, HarvestError::Authentication { attempts: 2, .. }));
        assert_eq!(*calls.lock().unwrap(), 2);
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_is_opened_once_across_pages() {
        let api = ScriptedApi::new("s", POLICY)
            .with_sessions(Vec::new())
            .page(Vec::new(), None)
            .page(Vec::new(), None);
        let calls = api.session_calls.clone();
        let mut f = PageFetcher::new(api, quick(1));
        f.fetch(&req()).await.unwrap();
        f.fetch(&req()).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
