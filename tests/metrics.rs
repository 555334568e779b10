// tests/metrics.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use election_harvester::ingest::cursor::{CursorPolicy, CursorVariant, FeedOrder, ScanDirection};
use election_harvester::ingest::enrich::Enricher;
use election_harvester::ingest::fetcher::{FetchPolicy, PageFetcher};
use election_harvester::ingest::filter::{Filter, TimeWindow};
use election_harvester::ingest::harvest::{HarvestLimits, Harvester};
use election_harvester::ingest::providers::scripted::ScriptedApi;
use election_harvester::ingest::sink::{BatchSink, MemoryIndex};
use election_harvester::ingest::store::MemoryCursorStore;
use election_harvester::ingest::types::RawItem;
use election_harvester::metrics::Metrics;
use election_harvester::HarvestError;

fn item(id: u64, body: &str) -> RawItem {
    RawItem {
        id: id.to_string(),
        created_at: Some(Utc.timestamp_opt(1_743_500_000 + id as i64, 0).unwrap()),
        body: body.into(),
        ..RawItem::default()
    }
}

fn line_value(text: &str, series: &str) -> Option<f64> {
    text.lines()
        .find(|l| l.split_whitespace().next() == Some(series))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}

// One test per binary: the recorder is process-global.
#[tokio::test]
async fn harvest_run_is_visible_in_exposition_and_textfile() {
    let metrics = Metrics::init().expect("recorder installs once per process");

    let policy = CursorPolicy::new(
        CursorVariant::MaxSeenId,
        ScanDirection::Forward,
        FeedOrder::OldestFirst,
    );
    let api = ScriptedApi::new("scripted", policy)
        .fail(HarvestError::Transient("502 Bad Gateway".into()))
        .page(
            vec![
                item(1, "#auspol one"),
                item(2, "no keyword here"),
                item(3, "#auspol three"),
            ],
            None,
        );
    let fetch = FetchPolicy {
        request_timeout: Duration::from_secs(2),
        max_attempts: 3,
        retry_delay: Duration::ZERO,
        page_delay: Duration::ZERO,
        auth_attempts: 3,
    };
    let mut h = Harvester::new(
        "metrics-test",
        PageFetcher::new(api, fetch),
        Filter::new(TimeWindow::default(), &["auspol".to_string()], policy),
        Enricher::new("scripted").with_seed(1),
        BatchSink::new(Arc::new(MemoryIndex::new()), "posts", 10),
        Arc::new(MemoryCursorStore::new()),
        HarvestLimits {
            time_budget: None,
            record_target: None,
            page_size: 10,
        },
    );
    let report = h.run().await;
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.indexed, 2);

    let text = metrics.render();
    for needle in [
        "harvest_pages_total",
        "harvest_fetched_total",
        "harvest_filtered_total",
        "harvest_indexed_total",
        "harvest_retries_total",
        "harvest_fetch_ms",
        "harvest_last_run_ts",
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }
    assert_eq!(line_value(&text, "harvest_fetched_total"), Some(3.0));
    assert_eq!(line_value(&text, "harvest_filtered_total"), Some(1.0));
    assert_eq!(line_value(&text, "harvest_indexed_total"), Some(2.0));
    assert_eq!(line_value(&text, "harvest_retries_total"), Some(1.0));
    assert!(line_value(&text, "harvest_last_run_ts").is_some_and(|ts| ts > 1.7e9));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("textfile/harvest.prom");
    metrics.write_textfile(&path).expect("textfile written");
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("harvest_indexed_total"));
    assert!(!path.with_extension("prom.tmp").exists());
}
