// src/config/harvest.rs
//! Typed configuration for one harvest invocation.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::enrich::{DayPartition, LocationFallback};
use crate::ingest::fetcher::FetchPolicy;
use crate::ingest::filter::TimeWindow;
use crate::sentiment::SentimentThresholds;

fn yes() -> bool {
    true
}
fn default_es_url() -> String {
    "https://localhost:9200".to_string()
}
fn default_state_index() -> String {
    "harvest_state".to_string()
}
fn default_es_timeout_secs() -> u64 {
    30
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_time_budget_secs() -> Option<u64> {
    Some(40)
}
fn default_batch_size() -> usize {
    200
}
fn default_page_size() -> usize {
    40
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    3_000
}
fn default_page_delay_ms() -> u64 {
    1_000
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_positive() -> f64 {
    0.05
}
fn default_negative() -> f64 {
    -0.05
}
fn default_neutral_label() -> String {
    "neutral".to_string()
}
fn default_bsky_service() -> String {
    "https://bsky.social".to_string()
}
fn default_bsky_api() -> String {
    "https://api.bsky.social".to_string()
}
fn default_reddit_url() -> String {
    "https://www.reddit.com".to_string()
}
fn default_subreddit() -> String {
    "all".to_string()
}
fn env_marker() -> String {
    "ENV".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Match terms shared by every harvester unless it overrides them.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub elastic: ElasticConfig,
    #[serde(default)]
    pub cursor_store: CursorStoreConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub enrich: EnrichConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub harvesters: Vec<HarvesterConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElasticConfig {
    #[serde(default = "default_es_url")]
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    /// "ENV" reads `ES_PASSWORD`.
    #[serde(default)]
    pub password: Option<String>,
    /// Index holding one cursor-state document per harvester.
    #[serde(default = "default_state_index")]
    pub state_index: String,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_es_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            url: default_es_url(),
            user: None,
            password: None,
            state_index: default_state_index(),
            accept_invalid_certs: false,
            timeout_secs: default_es_timeout_secs(),
        }
    }
}

/// Where cursors live between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CursorStoreConfig {
    /// One JSON file per harvester.
    File {
        #[serde(default = "default_state_dir")]
        dir: PathBuf,
    },
    /// State documents in `elastic.state_index`.
    Elastic,
    /// Newest document already in the harvester's data index.
    LatestDocument,
}

impl Default for CursorStoreConfig {
    fn default() -> Self {
        Self::File {
            dir: default_state_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Wall-clock budget per harvester; `None` runs until exhaustion.
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: Option<u64>,
    #[serde(default)]
    pub record_target: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Prometheus exposition written here at exit, for a textfile collector.
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            time_budget_secs: default_time_budget_secs(),
            record_target: None,
            batch_size: default_batch_size(),
            page_size: default_page_size(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            page_delay_ms: default_page_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            metrics_textfile: None,
        }
    }
}

impl RuntimeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            request_timeout: self.request_timeout(),
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            page_delay: Duration::from_millis(self.page_delay_ms),
            auth_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichConfig {
    #[serde(default = "default_positive")]
    pub positive_threshold: f64,
    #[serde(default = "default_negative")]
    pub negative_threshold: f64,
    #[serde(default = "default_neutral_label")]
    pub neutral_label: String,
    #[serde(default)]
    pub partition: DayPartition,
    #[serde(default)]
    pub location_fallback: LocationFallback,
    /// Fixed seed for the location sampler; random per run when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            positive_threshold: default_positive(),
            negative_threshold: default_negative(),
            neutral_label: default_neutral_label(),
            partition: DayPartition::default(),
            location_fallback: LocationFallback::default(),
            seed: None,
        }
    }
}

impl EnrichConfig {
    pub fn thresholds(&self) -> SentimentThresholds {
        SentimentThresholds {
            positive: self.positive_threshold,
            negative: self.negative_threshold,
            neutral_label: self.neutral_label.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    /// Lower bound relative to now, used when `since` is absent.
    #[serde(default)]
    pub lookback_days: Option<i64>,
}

/// Upper bound on `window.lookback_days`, roughly a century.
pub const MAX_LOOKBACK_DAYS: i64 = 36_500;

impl WindowConfig {
    pub fn resolve(&self, now: DateTime<Utc>) -> TimeWindow {
        // out-of-range lookbacks are rejected by validate(); here they mean no bound
        let since = self.since.or_else(|| {
            self.lookback_days
                .and_then(TimeDelta::try_days)
                .and_then(|d| now.checked_sub_signed(d))
        });
        TimeWindow {
            since,
            until: self.until,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Mastodon {
        base_url: String,
        hashtag: String,
        /// "ENV" reads `MASTODON_ACCESS_TOKEN`.
        #[serde(default)]
        access_token: Option<String>,
    },
    Bluesky {
        #[serde(default = "default_bsky_service")]
        service_url: String,
        #[serde(default = "default_bsky_api")]
        api_url: String,
        handle: String,
        /// "ENV" reads `BLUESKY_APP_PASSWORD`.
        #[serde(default = "env_marker")]
        app_password: String,
        query: String,
    },
    Reddit {
        #[serde(default = "default_reddit_url")]
        base_url: String,
        #[serde(default = "default_subreddit")]
        subreddit: String,
        query: String,
        #[serde(default)]
        user_agent: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvesterConfig {
    /// Cursor key, also used in logs and the run summary.
    pub name: String,
    /// Data index the enriched records are upserted into.
    pub index: String,
    #[serde(flatten)]
    pub source: SourceConfig,
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub record_target: Option<usize>,
    #[serde(default)]
    pub time_budget_secs: Option<u64>,
}

impl HarvestConfig {
    /// Keywords for `h`: its own list if set, else the shared one.
    pub fn keywords_for<'a>(&'a self, h: &'a HarvesterConfig) -> &'a [String] {
        h.keywords.as_deref().unwrap_or(&self.keywords)
    }

    /// Reject settings the harvest loop cannot honour.
    pub fn validate(&self) -> anyhow::Result<()> {
        let p = &self.enrich.partition;
        if !p.is_valid() {
            anyhow::bail!(
                "enrich.partition must be strictly ascending within 0..24, got {}/{}/{}",
                p.morning_start,
                p.afternoon_start,
                p.evening_start
            );
        }
        if !(self.enrich.positive_threshold.is_finite()
            && self.enrich.negative_threshold.is_finite())
        {
            anyhow::bail!("enrich thresholds must be finite numbers");
        }
        if self.enrich.positive_threshold < self.enrich.negative_threshold {
            anyhow::bail!(
                "enrich.positive_threshold ({}) must be >= negative_threshold ({})",
                self.enrich.positive_threshold,
                self.enrich.negative_threshold
            );
        }
        if self.runtime.batch_size == 0 {
            anyhow::bail!("runtime.batch_size must be > 0");
        }
        if self.runtime.page_size == 0 {
            anyhow::bail!("runtime.page_size must be > 0");
        }
        if self.runtime.max_attempts == 0 {
            anyhow::bail!("runtime.max_attempts must be > 0");
        }
        if let (Some(s), Some(u)) = (self.window.since, self.window.until) {
            if s > u {
                anyhow::bail!("window.since ({s}) is after window.until ({u})");
            }
        }
        if let Some(d) = self.window.lookback_days {
            if !(0..=MAX_LOOKBACK_DAYS).contains(&d) {
                anyhow::bail!("window.lookback_days must be within 0..={MAX_LOOKBACK_DAYS}, got {d}");
            }
        }

        let mut names = HashSet::new();
        for h in &self.harvesters {
            let ok_name = !h.name.is_empty()
                && h
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
            if !ok_name {
                anyhow::bail!(
                    "harvester name `{}` must be non-empty [A-Za-z0-9._-]",
                    h.name
                );
            }
            if !names.insert(h.name.as_str()) {
                anyhow::bail!("duplicate harvester name `{}`", h.name);
            }
            if h.index.trim().is_empty() {
                anyhow::bail!("harvester `{}` has an empty index", h.name);
            }
            if h.page_size == Some(0) {
                anyhow::bail!("harvester `{}`: page_size must be > 0", h.name);
            }
            // a page token cannot be recovered from the newest stored document
            if self.cursor_store == CursorStoreConfig::LatestDocument
                && matches!(h.source, SourceConfig::Bluesky { .. })
            {
                anyhow::bail!(
                    "harvester `{}`: cursor_store kind `latest_document` cannot resume a bluesky page token; use `file` or `elastic`",
                    h.name
                );
            }
        }
        Ok(())
    }
}
