// src/runner.rs
//! Wires configured harvesters to their upstream, sink and cursor store and
//! runs them one after another.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;

use crate::config::{CursorStoreConfig, HarvestConfig, HarvesterConfig, SourceConfig};
use crate::ingest::elastic::{
    ElasticClient, ElasticCursorStore, ElasticIndex, ElasticSettings, LatestDocumentStore,
};
use crate::ingest::enrich::Enricher;
use crate::ingest::fetcher::PageFetcher;
use crate::ingest::filter::Filter;
use crate::ingest::harvest::{HarvestLimits, HarvestReport, Harvester};
use crate::ingest::providers::bluesky::{BlueskyApi, BlueskySettings};
use crate::ingest::providers::http_client;
use crate::ingest::providers::mastodon::{MastodonApi, MastodonSettings};
use crate::ingest::providers::reddit::{RedditApi, RedditSettings};
use crate::ingest::sink::BatchSink;
use crate::ingest::store::{CursorStore, FileCursorStore};
use crate::ingest::types::UpstreamApi;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Overrides `runtime.record_target` for every harvester.
    pub record_target: Option<usize>,
    /// Run only the harvester with this name.
    pub only: Option<String>,
}

/// Enabled harvesters, narrowed to `only` when given.
pub fn select<'a>(cfg: &'a HarvestConfig, only: Option<&str>) -> Result<Vec<&'a HarvesterConfig>> {
    let picked: Vec<&HarvesterConfig> = cfg
        .harvesters
        .iter()
        .filter(|h| match only {
            Some(name) => h.name == name,
            None => h.enabled,
        })
        .collect();
    if let Some(name) = only {
        if picked.is_empty() {
            return Err(anyhow!("no harvester named `{name}` in config"));
        }
    }
    Ok(picked)
}

pub fn elastic_settings(cfg: &HarvestConfig) -> ElasticSettings {
    ElasticSettings {
        url: cfg.elastic.url.clone(),
        user: cfg.elastic.user.clone(),
        password: cfg.elastic.password.clone(),
        accept_invalid_certs: cfg.elastic.accept_invalid_certs,
        timeout: Duration::from_secs(cfg.elastic.timeout_secs),
    }
}

/// Upstream client for one harvester.
pub fn build_upstream(cfg: &HarvestConfig, h: &HarvesterConfig) -> Result<Box<dyn UpstreamApi>> {
    let timeout = cfg.runtime.request_timeout();
    let api: Box<dyn UpstreamApi> = match &h.source {
        SourceConfig::Mastodon {
            base_url,
            hashtag,
            access_token,
        } => Box::new(MastodonApi::new(
            &h.name,
            MastodonSettings {
                base_url: base_url.clone(),
                hashtag: hashtag.clone(),
                access_token: access_token.clone(),
                timeout,
            },
            http_client(timeout, None)?,
        )),
        SourceConfig::Bluesky {
            service_url,
            api_url,
            handle,
            app_password,
            query,
        } => Box::new(BlueskyApi::new(
            &h.name,
            BlueskySettings {
                service_url: service_url.clone(),
                api_url: api_url.clone(),
                handle: handle.clone(),
                app_password: app_password.clone(),
                query: query.clone(),
                timeout,
            },
            http_client(timeout, None)?,
        )),
        SourceConfig::Reddit {
            base_url,
            subreddit,
            query,
            user_agent,
        } => Box::new(RedditApi::new(
            &h.name,
            RedditSettings {
                base_url: base_url.clone(),
                subreddit: subreddit.clone(),
                query: query.clone(),
                user_agent: user_agent.clone(),
                timeout,
            },
            http_client(timeout, user_agent.as_deref())?,
        )),
    };
    Ok(api)
}

fn build_store(
    cfg: &HarvestConfig,
    h: &HarvesterConfig,
    api: &dyn UpstreamApi,
    es: &ElasticClient,
) -> Arc<dyn CursorStore> {
    match &cfg.cursor_store {
        CursorStoreConfig::File { dir } => Arc::new(FileCursorStore::new(dir.clone())),
        CursorStoreConfig::Elastic => Arc::new(ElasticCursorStore::new(
            es.clone(),
            cfg.elastic.state_index.clone(),
        )),
        CursorStoreConfig::LatestDocument => {
            tracing::warn!(target: "harvest", harvester = %h.name, "latest_document cursor store ignores the watermark; unflushed records and interrupted scans may be skipped next run");
            Arc::new(LatestDocumentStore::new(
                es.clone(),
                h.index.clone(),
                api.cursor_policy().variant,
            ))
        }
    }
}

pub fn limits_for(cfg: &HarvestConfig, h: &HarvesterConfig, opts: &RunOptions) -> HarvestLimits {
    HarvestLimits {
        time_budget: h
            .time_budget_secs
            .or(cfg.runtime.time_budget_secs)
            .map(Duration::from_secs),
        record_target: opts
            .record_target
            .or(h.record_target)
            .or(cfg.runtime.record_target),
        page_size: h.page_size.unwrap_or(cfg.runtime.page_size),
    }
}

fn build_enricher(cfg: &HarvestConfig, source: &str) -> Enricher {
    let e = &cfg.enrich;
    let enricher = Enricher::new(source)
        .with_thresholds(e.thresholds())
        .with_partition(e.partition)
        .with_fallback(e.location_fallback);
    match e.seed {
        Some(seed) => enricher.with_seed(seed),
        None => enricher,
    }
}

fn source_label(h: &HarvesterConfig) -> &'static str {
    match h.source {
        SourceConfig::Mastodon { .. } => "mastodon",
        SourceConfig::Bluesky { .. } => "bluesky",
        SourceConfig::Reddit { .. } => "reddit",
    }
}

/// Run every selected harvester in config order. A harvester that fails
/// internally still yields a report; only wiring errors abort the run.
pub async fn run_all(cfg: &HarvestConfig, opts: &RunOptions) -> Result<Vec<HarvestReport>> {
    let harvesters = select(cfg, opts.only.as_deref())?;
    let es = ElasticClient::new(&elastic_settings(cfg)).context("elasticsearch client")?;
    let window = cfg.window.resolve(Utc::now());
    tracing::info!(target: "harvest", harvesters = harvesters.len(), ?window, "run start");

    let mut reports = Vec::with_capacity(harvesters.len());
    for h in harvesters {
        let api = build_upstream(cfg, h).with_context(|| format!("harvester `{}`", h.name))?;
        let policy = api.cursor_policy();
        let store = build_store(cfg, h, api.as_ref(), &es);
        let filter = Filter::new(window, cfg.keywords_for(h), policy);
        let index = ElasticIndex::new(es.clone());
        if let Err(e) = index.ensure_index(&h.index).await {
            tracing::warn!(target: "harvest", harvester = %h.name, index = %h.index, error = %e, "index setup failed, relying on dynamic mapping");
        }
        let sink = BatchSink::new(index, &h.index, cfg.runtime.batch_size);

        let mut harvester = Harvester::new(
            &h.name,
            PageFetcher::new(api, cfg.runtime.fetch_policy()),
            filter,
            build_enricher(cfg, source_label(h)),
            sink,
            store,
            limits_for(cfg, h, opts),
        );
        reports.push(harvester.run().await);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::from_toml_str;
    use crate::ingest::cursor::CursorVariant;

    const CFG: &str = r#"
        keywords = ["auspol"]

        [runtime]
        record_target = 500
        page_size = 20

        [[harvesters]]
        name = "masto"
        kind = "mastodon"
        index = "masto_posts"
        base_url = "https://aus.social"
        hashtag = "auspol"
        page_size = 40

        [[harvesters]]
        name = "sky"
        kind = "bluesky"
        index = "bsky_posts"
        handle = "someone.bsky.social"
        app_password = "secret"
        query = "ausvotes"
        enabled = false
    "#;

    #[test]
    fn only_overrides_enabled_flag() {
        let cfg = from_toml_str(CFG).unwrap();
        let all: Vec<&str> = select(&cfg, None).unwrap().iter().map(|h| h.name.as_str()).collect();
        assert_eq!(all, vec!["masto"]);
        assert_eq!(select(&cfg, Some("sky")).unwrap().len(), 1);
        assert!(select(&cfg, Some("nope")).is_err());
    }

    #[test]
    fn cli_target_wins_over_config() {
        let cfg = from_toml_str(CFG).unwrap();
        let h = &cfg.harvesters[0];
        let l = limits_for(&cfg, h, &RunOptions::default());
        assert_eq!(l.record_target, Some(500));
        assert_eq!(l.page_size, 40);
        let l = limits_for(
            &cfg,
            h,
            &RunOptions {
                record_target: Some(7),
                only: None,
            },
        );
        assert_eq!(l.record_target, Some(7));
    }

    #[test]
    fn upstreams_carry_their_cursor_policy() {
        let cfg = from_toml_str(CFG).unwrap();
        let masto = build_upstream(&cfg, &cfg.harvesters[0]).unwrap();
        assert_eq!(masto.cursor_policy().variant, CursorVariant::MaxSeenId);
        let sky = build_upstream(&cfg, &cfg.harvesters[1]).unwrap();
        assert_eq!(sky.cursor_policy().variant, CursorVariant::PageToken);
        assert!(sky.needs_session());
    }
}
