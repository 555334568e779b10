// src/ingest/providers/bluesky.rs
//! Bluesky post search (`app.bsky.feed.searchPosts`) behind an app-password
//! session (`com.atproto.server.createSession`).
//!
//! The opaque `cursor` walks back through history, so the stored token moves
//! backward; page sequence numbers keep successive tokens ordered.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{HarvestError, Result};
use crate::ingest::cursor::{CursorPolicy, CursorVariant, FeedOrder, ScanDirection};
use crate::ingest::providers::{parse_rfc3339, send_json, send_text};
use crate::ingest::types::{Page, PageParam, PageRequest, RawItem, UpstreamApi};

pub const POLICY: CursorPolicy = CursorPolicy::new(
    CursorVariant::PageToken,
    ScanDirection::Backward,
    FeedOrder::NewestFirst,
);

const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    posts: Vec<PostView>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostView {
    uri: String,
    #[serde(default)]
    author: Author,
    #[serde(default)]
    record: PostRecord,
    #[serde(default)]
    like_count: Option<u64>,
    #[serde(default)]
    repost_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct Author {
    #[serde(default)]
    handle: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostRecord {
    #[serde(default)]
    text: String,
    #[serde(default)]
    created_at: Option<String>,
}

/// Public web link for an `at://did/app.bsky.feed.post/rkey` uri.
pub fn web_url(uri: &str, handle: &str) -> Option<String> {
    let rkey = uri.rsplit('/').next().filter(|k| !k.is_empty())?;
    if handle.is_empty() || !uri.starts_with("at://") {
        return None;
    }
    Some(format!("https://bsky.app/profile/{handle}/post/{rkey}"))
}

/// Decode a search response into a page; an empty cursor ends the scan.
pub fn parse_search(body: &str) -> Result<Page> {
    let resp: SearchResponse =
        serde_json::from_str(body).map_err(|e| HarvestError::Decode(format!("bluesky: {e}")))?;
    let items = resp
        .posts
        .into_iter()
        .map(|p| RawItem {
            url: web_url(&p.uri, &p.author.handle),
            id: p.uri,
            created_at: p.record.created_at.as_deref().and_then(parse_rfc3339),
            body: p.record.text,
            author: p.author.handle,
            declared_location: None,
            shares: p.repost_count,
            likes: p.like_count,
        })
        .collect();
    let next = resp
        .cursor
        .filter(|c| !c.trim().is_empty())
        .map(PageParam::Token);
    Ok(Page { items, next })
}

/// Pull the access token out of a `createSession` answer. Some proxies wrap
/// it in `data` or use snake_case.
pub fn extract_jwt(v: &Value) -> Option<String> {
    let data = v.get("data").unwrap_or(v);
    ["accessJwt", "access_jwt", "jwt", "encodedJwt"]
        .iter()
        .find_map(|k| data.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlueskySettings {
    /// Host for `createSession` (the PDS).
    pub service_url: String,
    /// Host for `searchPosts` (the AppView).
    pub api_url: String,
    pub handle: String,
    pub app_password: String,
    pub query: String,
    pub timeout: Duration,
}

pub struct BlueskyApi {
    name: String,
    settings: BlueskySettings,
    http: reqwest::Client,
    jwt: Option<String>,
}

impl BlueskyApi {
    pub fn new(name: impl Into<String>, settings: BlueskySettings, http: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            settings,
            http,
            jwt: None,
        }
    }
}

#[async_trait]
impl UpstreamApi for BlueskyApi {
    fn name(&self) -> &str {
        &self.name
    }

    fn cursor_policy(&self) -> CursorPolicy {
        POLICY
    }

    fn needs_session(&self) -> bool {
        true
    }

    async fn open_session(&mut self) -> Result<()> {
        let url = format!(
            "{}/xrpc/com.atproto.server.createSession",
            self.settings.service_url.trim_end_matches('/')
        );
        let rb = self.http.post(url).json(&json!({
            "identifier": self.settings.handle,
            "password": self.settings.app_password,
        }));
        let v: Value = send_json(rb, self.settings.timeout).await?;
        match extract_jwt(&v) {
            Some(jwt) => {
                self.jwt = Some(jwt);
                Ok(())
            }
            None => Err(HarvestError::Decode("createSession answer has no access token".into())),
        }
    }

    fn drop_session(&mut self) {
        self.jwt = None;
    }

    async fn fetch_page(&mut self, req: &PageRequest) -> Result<Page> {
        let Some(jwt) = self.jwt.as_deref() else {
            return Err(HarvestError::SessionExpired("no session".into()));
        };
        let url = format!(
            "{}/xrpc/app.bsky.feed.searchPosts",
            self.settings.api_url.trim_end_matches('/')
        );
        let mut query: Vec<(&str, String)> = vec![
            ("q", self.settings.query.clone()),
            ("limit", req.limit.clamp(1, MAX_LIMIT).to_string()),
        ];
        if let Some(PageParam::Token(cursor)) = &req.page {
            query.push(("cursor", cursor.clone()));
        }
        let rb = self
            .http
            .get(url)
            .query(&query)
            .bearer_auth(jwt)
            .header("Origin", "https://bsky.app");
        let body = send_text(rb, self.settings.timeout).await?;
        let page = parse_search(&body)?;
        tracing::debug!(target: "harvest", upstream = %self.name, items = page.items.len(), more = page.next.is_some(), "bluesky page");
        Ok(page)
    }
}
