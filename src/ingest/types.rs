// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ingest::cursor::{CursorPolicy, HarvestCursor};

/// One upstream post/status, as fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub id: String,                          // unique within the source
    pub created_at: Option<DateTime<Utc>>,   // normalized to UTC
    pub body: String,                        // raw text or HTML
    pub author: String,
    pub declared_location: Option<String>,
    pub url: Option<String>,
    pub shares: Option<u64>,                 // reblogs / reposts / comments
    pub likes: Option<u64>,                  // favourites / likes / score
}

impl RawItem {
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.trim().parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Night,
    Morning,
    Afternoon,
    Evening,
}

/// How the record's location was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    Declared,
    Sampled,
    Unresolved,
}

/// Elasticsearch accepts `{ "lat": .., "lon": .. }` for `geo_point` fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Document written to the sink, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub id: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub sentiment_score: f64,
    pub sentiment_label: String,
    pub time_of_day: TimeOfDay,
    pub day_of_week: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geolocation: Option<GeoPoint>,
    pub location_source: LocationSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likes: Option<u64>,
}

/// Where the next page starts, as understood by the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageParam {
    /// Opaque continuation token, sent verbatim.
    Token(String),
    /// Items strictly older than this numeric id.
    OlderThan(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// Cursor stored by the previous run (the "since" bound for key cursors).
    pub resume: HarvestCursor,
    /// `None` on the first page of a scan.
    pub page: Option<PageParam>,
    pub limit: usize,
}

/// One page of results. Empty `items` means the upstream has no more data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<RawItem>,
    pub next: Option<PageParam>,
}

impl Page {
    pub fn exhausted() -> Self {
        Self::default()
    }
}

/// Paginated upstream source (Mastodon, Bluesky, Reddit, fakes in tests).
#[async_trait::async_trait]
pub trait UpstreamApi: Send {
    fn name(&self) -> &str;

    fn cursor_policy(&self) -> CursorPolicy;

    /// Sources that need a session token before the first page.
    fn needs_session(&self) -> bool {
        false
    }

    async fn open_session(&mut self) -> Result<()> {
        Ok(())
    }

    /// Forget the current session so the next call re-authenticates.
    fn drop_session(&mut self) {}

    async fn fetch_page(&mut self, req: &PageRequest) -> Result<Page>;
}

#[async_trait::async_trait]
impl<T: UpstreamApi + ?Sized> UpstreamApi for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn cursor_policy(&self) -> CursorPolicy {
        (**self).cursor_policy()
    }

    fn needs_session(&self) -> bool {
        (**self).needs_session()
    }

    async fn open_session(&mut self) -> Result<()> {
        (**self).open_session().await
    }

    fn drop_session(&mut self) {
        (**self).drop_session()
    }

    async fn fetch_page(&mut self, req: &PageRequest) -> Result<Page> {
        (**self).fetch_page(req).await
    }
}
