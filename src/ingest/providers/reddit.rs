// src/ingest/providers/reddit.rs
//! Reddit search listing (`/r/:sub/search.json?sort=new`).
//!
//! Newest first, paged with the listing's `after` fullname. The stored cursor
//! is the newest `created_utc` seen.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{HarvestError, Result};
use crate::ingest::cursor::{CursorPolicy, CursorVariant, FeedOrder, ScanDirection};
use crate::ingest::providers::send_text;
use crate::ingest::types::{Page, PageParam, PageRequest, RawItem, UpstreamApi};

pub const POLICY: CursorPolicy = CursorPolicy::new(
    CursorVariant::MaxSeenTimestamp,
    ScanDirection::Forward,
    FeedOrder::NewestFirst,
);

const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    #[serde(default)]
    created_utc: Option<f64>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    num_comments: Option<u64>,
    #[serde(default)]
    score: Option<i64>,
}

fn is_tombstone(s: &str) -> bool {
    matches!(s.trim(), "[deleted]" | "[removed]")
}

fn from_epoch(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp(secs.trunc() as i64, 0)
}

/// Decode a listing. Posts with no text, or whose body was deleted or removed
/// by moderators, are dropped here.
pub fn parse_listing(body: &str) -> Result<Page> {
    let listing: Listing =
        serde_json::from_str(body).map_err(|e| HarvestError::Decode(format!("reddit: {e}")))?;
    let mut items = Vec::with_capacity(listing.data.children.len());
    for Child { data: p } in listing.data.children {
        if is_tombstone(&p.selftext) {
            continue;
        }
        if p.title.trim().is_empty() && p.selftext.trim().is_empty() {
            continue;
        }
        let text = format!("{}\n{}", p.title, p.selftext).trim().to_string();
        items.push(RawItem {
            id: p.id,
            created_at: p.created_utc.and_then(from_epoch),
            body: text,
            author: p.author,
            declared_location: None,
            url: p.permalink.map(|l| format!("https://www.reddit.com{l}")),
            shares: p.num_comments,
            likes: p.score.map(|s| s.max(0) as u64),
        });
    }
    let next = listing
        .data
        .after
        .filter(|a| !a.is_empty())
        .map(PageParam::Token);
    Ok(Page { items, next })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedditSettings {
    pub base_url: String,
    pub subreddit: String,
    pub query: String,
    /// Reddit throttles generic agents hard; identify the harvester.
    pub user_agent: Option<String>,
    pub timeout: Duration,
}

pub struct RedditApi {
    name: String,
    settings: RedditSettings,
    http: reqwest::Client,
}

impl RedditApi {
    pub fn new(name: impl Into<String>, settings: RedditSettings, http: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            settings,
            http,
        }
    }
}

#[async_trait]
impl UpstreamApi for RedditApi {
    fn name(&self) -> &str {
        &self.name
    }

    fn cursor_policy(&self) -> CursorPolicy {
        POLICY
    }

    async fn fetch_page(&mut self, req: &PageRequest) -> Result<Page> {
        let url = format!(
            "{}/r/{}/search.json",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.subreddit
        );
        let mut query: Vec<(&str, String)> = vec![
            ("q", self.settings.query.clone()),
            ("sort", "new".into()),
            ("restrict_sr", "false".into()),
            ("raw_json", "1".into()),
            ("limit", req.limit.clamp(1, MAX_LIMIT).to_string()),
        ];
        if let Some(PageParam::Token(after)) = &req.page {
            query.push(("after", after.clone()));
        }
        let mut rb = self.http.get(url).query(&query);
        if let Some(ua) = self.settings.user_agent.as_deref() {
            rb = rb.header(reqwest::header::USER_AGENT, ua);
        }
        let body = send_text(rb, self.settings.timeout).await?;
        let page = parse_listing(&body)?;
        tracing::debug!(target: "harvest", upstream = %self.name, items = page.items.len(), more = page.next.is_some(), "reddit page");
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstones_and_empty_posts_are_dropped() {
        let body = r#"{"data":{"after":null,"children":[
          {"data":{"id":"a","created_utc":1743500000.0,"title":"Vote","selftext":"[removed]"}},
          {"data":{"id":"b","created_utc":1743500000.0,"title":"","selftext":"  "}},
          {"data":{"id":"c","created_utc":1743500000.0,"title":"Dutton","selftext":"debate","score":-3}}
        ]}}"#;
        let page = parse_listing(body).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].body, "Dutton\ndebate");
        assert_eq!(page.items[0].likes, Some(0));
        assert!(page.next.is_none());
    }
}
