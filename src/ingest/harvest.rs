// src/ingest/harvest.rs
//! # Harvest Loop
//! Drives fetch → filter → enrich → buffer across pages, then flushes and
//! persists the watermark cursor.
//!
//! Stages: `Init → Fetching → Filtering → Enriching → Buffering → (loop) →
//! FlushingFinal → PersistingCursor → Done`, with `TimeBudgetExceeded` as a
//! clean early stop and `Aborted` for unrecoverable upstream failures. Every
//! failure is folded into the returned [`HarvestReport`]; nothing is raised to
//! the caller.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, gauge};
use serde::Serialize;

use crate::error::HarvestError;
use crate::ingest::cursor::{CursorPolicy, CursorVariant, HarvestCursor};
use crate::ingest::enrich::Enricher;
use crate::ingest::ensure_metrics_described;
use crate::ingest::fetcher::PageFetcher;
use crate::ingest::filter::{Filter, Rejection, Verdict};
use crate::ingest::sink::{BatchSink, BulkIndex, FlushReport};
use crate::ingest::store::{CursorState, CursorStore};
use crate::ingest::types::{PageParam, PageRequest, UpstreamApi};
use crate::ingest::watermark::Watermark;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Fetching,
    Filtering,
    Enriching,
    Buffering,
    FlushingFinal,
    PersistingCursor,
    Done,
    Aborted,
    TimeBudgetExceeded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Upstream returned no continuation.
    #[default]
    Exhausted,
    /// Reached an item older than the window lower bound.
    WindowLowerBound,
    /// Reached items the stored cursor already covers.
    ReachedCursor,
    RecordTarget,
    TimeBudget,
    Aborted,
}

impl StopReason {
    /// Whether the scan covered everything between the old cursor and the
    /// newest item.
    fn completes_scan(self) -> bool {
        matches!(
            self,
            Self::Exhausted | Self::WindowLowerBound | Self::ReachedCursor
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterCounts {
    pub duplicate: usize,
    pub missing_timestamp: usize,
    pub before_window: usize,
    pub after_window: usize,
    pub behind_cursor: usize,
    pub no_keyword: usize,
}

impl FilterCounts {
    fn bump(&mut self, r: Rejection) {
        match r {
            Rejection::Duplicate => self.duplicate += 1,
            Rejection::MissingTimestamp => self.missing_timestamp += 1,
            Rejection::BeforeWindow => self.before_window += 1,
            Rejection::AfterWindow => self.after_window += 1,
            Rejection::BehindCursor => self.behind_cursor += 1,
            Rejection::NoKeyword => self.no_keyword += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.duplicate
            + self.missing_timestamp
            + self.before_window
            + self.after_window
            + self.behind_cursor
            + self.no_keyword
    }
}

/// Structured outcome of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub harvester: String,
    pub pages: usize,
    pub fetched: usize,
    pub filtered: FilterCounts,
    pub enriched: usize,
    pub indexed: usize,
    pub failed: usize,
    pub failed_ids: Vec<String>,
    pub stop: StopReason,
    pub final_stage: Stage,
    pub cursor_before: HarvestCursor,
    pub cursor_after: HarvestCursor,
    pub cursor_persisted: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl HarvestReport {
    fn new(harvester: &str) -> Self {
        Self {
            harvester: harvester.to_string(),
            pages: 0,
            fetched: 0,
            filtered: FilterCounts::default(),
            enriched: 0,
            indexed: 0,
            failed: 0,
            failed_ids: Vec::new(),
            stop: StopReason::Exhausted,
            final_stage: Stage::Init,
            cursor_before: HarvestCursor::Empty,
            cursor_after: HarvestCursor::Empty,
            cursor_persisted: false,
            error: None,
            elapsed_ms: 0,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.failed == 0
    }
}

/// Per-invocation limits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestLimits {
    /// Wall-clock budget; checked before every page.
    pub time_budget: Option<Duration>,
    /// Stop after this many records were enriched.
    pub record_target: Option<usize>,
    pub page_size: usize,
}

pub struct Harvester<A: UpstreamApi, I: BulkIndex, S: CursorStore> {
    key: String,
    fetcher: PageFetcher<A>,
    filter: Filter,
    enricher: Enricher,
    sink: BatchSink<I>,
    store: S,
    limits: HarvestLimits,
    stage: Stage,
}

impl<A: UpstreamApi, I: BulkIndex, S: CursorStore> Harvester<A, I, S> {
    /// `key` names the cursor in the store.
    pub fn new(
        key: impl Into<String>,
        fetcher: PageFetcher<A>,
        filter: Filter,
        enricher: Enricher,
        sink: BatchSink<I>,
        store: S,
        limits: HarvestLimits,
    ) -> Self {
        Self {
            key: key.into(),
            fetcher,
            filter,
            enricher,
            sink,
            store,
            limits,
            stage: Stage::Init,
        }
    }

    fn enter(&mut self, stage: Stage) {
        if self.stage != stage {
            tracing::info!(target: "harvest", harvester = %self.key, from = ?self.stage, to = ?stage, "stage");
        }
        self.stage = stage;
    }

    /// Fold one flush into the report and the watermark.
    fn absorb(&self, flush: FlushReport, watermark: &mut Watermark, report: &mut HarvestReport) {
        report.indexed += flush.accepted;
        report.failed += flush.failed_ids.len();
        counter!("harvest_indexed_total").increment(flush.accepted as u64);
        if !flush.failed_ids.is_empty() {
            counter!("harvest_failed_total").increment(flush.failed_ids.len() as u64);
            let sample: Vec<&String> = flush.failed_ids.iter().take(3).collect();
            tracing::warn!(
                target: "harvest",
                harvester = %self.key,
                failed = flush.failed_ids.len(),
                ?sample,
                "records rejected by sink"
            );
        }
        if let Err(e) = watermark.settle(&flush.failed_ids) {
            tracing::error!(target: "harvest", harvester = %self.key, error = %e, "watermark settle failed");
            report.error.get_or_insert_with(|| e.to_string());
        }
        report.failed_ids.extend(flush.failed_ids);
    }

    /// Run one invocation to completion.
    pub async fn run(&mut self) -> HarvestReport {
        ensure_metrics_described();
        let started = Instant::now();
        let mut report = HarvestReport::new(&self.key);

        self.stage = Stage::Init;
        tracing::info!(target: "harvest", harvester = %self.key, upstream = self.fetcher.name(), "harvest start");

        let policy: CursorPolicy = self.fetcher.cursor_policy();
        let before = self.store.load(&self.key).await;
        let start = before.cursor.clone();
        report.cursor_before = start.clone();
        tracing::info!(target: "harvest", harvester = %self.key, cursor = %start.label(), "resume");

        let mut watermark = Watermark::new(start.clone(), policy.direction);
        let mut seen: HashSet<String> = HashSet::new();
        let mut furthest_key = start.clone();
        let (mut page_param, mut page_seq) = match &start {
            HarvestCursor::PageToken { token, page } => {
                (Some(PageParam::Token(token.clone())), *page)
            }
            _ => (None, 0),
        };
        let mut abort: Option<HarvestError> = None;

        let stop = 'pages: loop {
            if let Some(budget) = self.limits.time_budget {
                if started.elapsed() >= budget {
                    self.enter(Stage::TimeBudgetExceeded);
                    break StopReason::TimeBudget;
                }
            }
            if self.target_reached(&report) {
                break StopReason::RecordTarget;
            }

            self.enter(Stage::Fetching);
            let req = PageRequest {
                resume: start.clone(),
                page: page_param.clone(),
                limit: self.limits.page_size,
            };
            let page = match self.fetcher.fetch(&req).await {
                Ok(p) => p,
                Err(e) => {
                    self.enter(Stage::Aborted);
                    tracing::error!(target: "harvest", harvester = %self.key, error = %e, "fetch failed, aborting");
                    abort = Some(e);
                    break StopReason::Aborted;
                }
            };
            // A page can come back empty after upstream-side dropping and still
            // carry a continuation; only an empty page without one ends the scan.
            if page.items.is_empty() && page.next.is_none() {
                tracing::info!(target: "harvest", harvester = %self.key, pages = report.pages, "no more data");
                break StopReason::Exhausted;
            }
            report.pages += 1;
            report.fetched += page.items.len();
            counter!("harvest_fetched_total").increment(page.items.len() as u64);

            self.enter(Stage::Filtering);
            let mut halted: Option<Rejection> = None;
            let mut cut_short = false;
            for item in &page.items {
                let created_at = match self.filter.accept(item, &start, &seen) {
                    Verdict::Accept { created_at } => created_at,
                    Verdict::Skip(r) => {
                        report.filtered.bump(r);
                        counter!("harvest_filtered_total").increment(1);
                        continue;
                    }
                    Verdict::Halt(r) => {
                        report.filtered.bump(r);
                        counter!("harvest_filtered_total").increment(1);
                        halted = Some(r);
                        break;
                    }
                };

                self.enter(Stage::Enriching);
                let record = self.enricher.enrich(item, created_at);
                report.enriched += 1;
                seen.insert(item.id.clone());

                self.enter(Stage::Buffering);
                watermark.record(item.id.clone());
                if let Some(key) = HarvestCursor::from_item(policy.variant, item) {
                    match furthest_key.clone().furthest(key.clone(), policy.direction) {
                        Ok(f) => furthest_key = f,
                        Err(e) => {
                            abort = Some(e);
                            break;
                        }
                    }
                    if policy.checkpoints_per_record() {
                        if let Err(e) = watermark.checkpoint(furthest_key.clone()) {
                            abort = Some(e);
                            break;
                        }
                    }
                }
                if let Some(flush) = self.sink.add(record).await {
                    self.absorb(flush, &mut watermark, &mut report);
                }

                if self.target_reached(&report) {
                    cut_short = page.items.last().is_some_and(|last| last.id != item.id);
                    break;
                }
                self.enter(Stage::Filtering);
            }

            if let Some(e) = abort.as_ref() {
                self.enter(Stage::Aborted);
                tracing::error!(target: "harvest", harvester = %self.key, error = %e, "cursor error, aborting");
                break 'pages StopReason::Aborted;
            }

            // The next-page token is only safe once this page was fully consumed.
            if policy.variant == CursorVariant::PageToken && !cut_short {
                if let Some(PageParam::Token(t)) = &page.next {
                    page_seq += 1;
                    let cp = HarvestCursor::PageToken {
                        token: t.clone(),
                        page: page_seq,
                    };
                    if let Err(e) = watermark.checkpoint(cp) {
                        abort = Some(e);
                        self.enter(Stage::Aborted);
                        break 'pages StopReason::Aborted;
                    }
                }
            }

            if let Some(r) = halted {
                break match r {
                    Rejection::BehindCursor => StopReason::ReachedCursor,
                    _ => StopReason::WindowLowerBound,
                };
            }
            if self.target_reached(&report) {
                break StopReason::RecordTarget;
            }
            match page.next {
                Some(next) => page_param = Some(next),
                None => {
                    tracing::info!(target: "harvest", harvester = %self.key, page = report.pages, "no continuation");
                    break StopReason::Exhausted;
                }
            }
        };
        report.stop = stop;

        // A newest-first key scan only covers the gap once it completes.
        if stop.completes_scan() && policy.checkpoints_on_completion() {
            if let Err(e) = watermark.checkpoint(furthest_key.clone()) {
                report.error.get_or_insert_with(|| e.to_string());
            }
        }

        self.enter(Stage::FlushingFinal);
        let flush = self.sink.flush().await;
        self.absorb(flush, &mut watermark, &mut report);
        if let Some(id) = watermark.blocked_by() {
            tracing::warn!(target: "harvest", harvester = %self.key, %id, "watermark held before failed record");
        }

        let auth_failed = matches!(abort, Some(HarvestError::Authentication { .. }));
        if let Some(e) = abort {
            report.error = Some(e.to_string());
        }

        let safe = watermark.safe().clone();
        report.cursor_after = start.clone();
        if auth_failed && report.enriched == 0 {
            tracing::warn!(target: "harvest", harvester = %self.key, "authentication failed before any item; cursor untouched");
        } else {
            self.enter(Stage::PersistingCursor);
            let advanced = safe.is_ahead_of(&start, policy.direction).unwrap_or(false);
            if advanced {
                let state = CursorState {
                    cursor: safe.clone(),
                    direction: policy.direction,
                    processed_count: before.processed_count + report.indexed as u64,
                    last_run: Some(Utc::now()),
                };
                match self.store.save(&self.key, &state).await {
                    Ok(()) => {
                        report.cursor_after = safe;
                        report.cursor_persisted = true;
                    }
                    Err(HarvestError::StaleCursor { stored, offered }) => {
                        // another run got further; ours is simply superseded
                        tracing::warn!(target: "harvest", harvester = %self.key, %stored, %offered, "cursor save rejected as stale");
                    }
                    Err(e) => {
                        tracing::error!(target: "harvest", harvester = %self.key, error = %e, "cursor save failed; next run will overlap");
                        report.error.get_or_insert_with(|| e.to_string());
                    }
                }
            } else {
                tracing::info!(target: "harvest", harvester = %self.key, cursor = %start.label(), "cursor unchanged");
            }
        }

        report.final_stage = if report.stop == StopReason::Aborted {
            Stage::Aborted
        } else {
            Stage::Done
        };
        self.enter(report.final_stage);
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        gauge!("harvest_last_run_ts").set(Utc::now().timestamp() as f64);

        tracing::info!(
            target: "harvest",
            harvester = %report.harvester,
            pages = report.pages,
            fetched = report.fetched,
            filtered = report.filtered.total(),
            enriched = report.enriched,
            indexed = report.indexed,
            failed = report.failed,
            stop = ?report.stop,
            cursor = %report.cursor_after.label(),
            persisted = report.cursor_persisted,
            elapsed_ms = report.elapsed_ms,
            "harvest summary"
        );
        report
    }

    fn target_reached(&self, report: &HarvestReport) -> bool {
        self.limits
            .record_target
            .is_some_and(|t| report.enriched >= t)
    }
}
