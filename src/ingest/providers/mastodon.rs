// src/ingest/providers/mastodon.rs
//! Mastodon hashtag timeline (`/api/v1/timelines/tag/:tag`).
//!
//! Newest first; `since_id` bounds the scan by the stored cursor and `max_id`
//! walks to older pages.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{HarvestError, Result};
use crate::ingest::cursor::{CursorPolicy, CursorVariant, FeedOrder, HarvestCursor, ScanDirection};
use crate::ingest::providers::{parse_rfc3339, send_text};
use crate::ingest::types::{Page, PageParam, PageRequest, RawItem, UpstreamApi};

pub const POLICY: CursorPolicy = CursorPolicy::new(
    CursorVariant::MaxSeenId,
    ScanDirection::Forward,
    FeedOrder::NewestFirst,
);

/// Mastodon caps hashtag timelines at 40 per page.
const MAX_LIMIT: usize = 40;

#[derive(Debug, Deserialize)]
struct Status {
    id: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    reblogs_count: Option<u64>,
    #[serde(default)]
    favourites_count: Option<u64>,
    #[serde(default)]
    account: Account,
}

#[derive(Debug, Default, Deserialize)]
struct Account {
    #[serde(default)]
    acct: String,
    #[serde(default)]
    fields: Vec<ProfileField>,
}

#[derive(Debug, Deserialize)]
struct ProfileField {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

/// Decode a timeline response body into raw items, in upstream order.
pub fn parse_statuses(body: &str) -> Result<Vec<RawItem>> {
    let statuses: Vec<Status> =
        serde_json::from_str(body).map_err(|e| HarvestError::Decode(format!("mastodon: {e}")))?;
    Ok(statuses.into_iter().map(into_item).collect())
}

fn into_item(s: Status) -> RawItem {
    // profile field named like "Location" / "📍 location"
    let declared_location = s
        .account
        .fields
        .iter()
        .find(|f| f.name.to_lowercase().contains("location") && !f.value.trim().is_empty())
        .map(|f| f.value.clone());
    RawItem {
        id: s.id,
        created_at: s.created_at.as_deref().and_then(parse_rfc3339),
        body: s.content,
        author: s.account.acct,
        declared_location,
        url: s.url,
        shares: s.reblogs_count,
        likes: s.favourites_count,
    }
}

/// Continue below the oldest id on the page. Instances may return fewer
/// than `limit` statuses mid-timeline (filtered or deleted), so only an
/// empty page ends the walk.
pub fn next_page(items: &[RawItem]) -> Option<PageParam> {
    items
        .iter()
        .filter_map(RawItem::numeric_id)
        .min()
        .map(PageParam::OlderThan)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MastodonSettings {
    pub base_url: String,
    pub hashtag: String,
    pub access_token: Option<String>,
    pub timeout: Duration,
}

pub struct MastodonApi {
    name: String,
    settings: MastodonSettings,
    http: reqwest::Client,
}

impl MastodonApi {
    pub fn new(name: impl Into<String>, settings: MastodonSettings, http: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            settings,
            http,
        }
    }

    fn timeline_url(&self) -> String {
        format!(
            "{}/api/v1/timelines/tag/{}",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.hashtag.trim_start_matches('#')
        )
    }
}

#[async_trait]
impl UpstreamApi for MastodonApi {
    fn name(&self) -> &str {
        &self.name
    }

    fn cursor_policy(&self) -> CursorPolicy {
        POLICY
    }

    async fn fetch_page(&mut self, req: &PageRequest) -> Result<Page> {
        let limit = req.limit.clamp(1, MAX_LIMIT);
        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let HarvestCursor::MaxSeenId { id } = &req.resume {
            query.push(("since_id", id.to_string()));
        }
        if let Some(PageParam::OlderThan(max_id)) = &req.page {
            query.push(("max_id", max_id.to_string()));
        }

        let mut rb = self.http.get(self.timeline_url()).query(&query);
        if let Some(token) = self.settings.access_token.as_deref() {
            rb = rb.bearer_auth(token);
        }
        let body = send_text(rb, self.settings.timeout).await?;
        let items = parse_statuses(&body)?;
        let next = next_page(&items);
        tracing::debug!(target: "harvest", upstream = %self.name, items = items.len(), ?next, "mastodon page");
        Ok(Page { items, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"[
      {"id":"114","created_at":"2025-04-01T10:00:00.000Z","content":"<p>#auspol</p>",
       "url":"https://aus.social/@a/114","reblogs_count":2,"favourites_count":5,
       "account":{"acct":"a","fields":[{"name":"Location","value":"Melbourne, Australia"}]}},
      {"id":"113","created_at":"2025-04-01T09:00:00.000Z","content":"x",
       "account":{"acct":"b"}}
    ]"#;

    #[test]
    fn decodes_statuses_and_location_field() {
        let items = parse_statuses(BODY).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].declared_location.as_deref(), Some("Melbourne, Australia"));
        assert_eq!(items[0].likes, Some(5));
        assert_eq!(items[1].declared_location, None);
        assert_eq!(items[1].shares, None);
    }

    #[test]
    fn short_page_still_continues() {
        let items = parse_statuses(BODY).unwrap();
        // two statuses against a limit of 40 is not the end of the timeline
        assert_eq!(next_page(&items), Some(PageParam::OlderThan(113)));
        assert_eq!(next_page(&items[..1]), Some(PageParam::OlderThan(114)));
        assert_eq!(next_page(&[]), None);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(parse_statuses("{}"), Err(HarvestError::Decode(_))));
    }
}
