// src/ingest/filter.rs
//! Dedup & filter: decides per item whether to keep it, skip it, or stop the scan.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::clean_content;
use crate::ingest::cursor::{CursorPolicy, FeedOrder, HarvestCursor};
use crate::ingest::types::RawItem;

/// Inclusive lower bound, inclusive upper bound. Either may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    Duplicate,
    MissingTimestamp,
    BeforeWindow,
    AfterWindow,
    BehindCursor,
    NoKeyword,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept { created_at: DateTime<Utc> },
    /// Drop this item, keep paging.
    Skip(Rejection),
    /// Drop this item and end the scan: everything after it is older still.
    Halt(Rejection),
}

#[derive(Debug, Clone)]
pub struct Filter {
    window: TimeWindow,
    keywords: Vec<String>,
    policy: CursorPolicy,
}

impl Filter {
    /// Keywords are matched lower-cased, without a leading `#`.
    pub fn new(window: TimeWindow, keywords: &[String], policy: CursorPolicy) -> Self {
        let keywords = keywords
            .iter()
            .map(|k| k.trim().trim_start_matches('#').to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            window,
            keywords,
            policy,
        }
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    /// Case-insensitive substring match; an empty keyword list matches everything.
    pub fn matches_keywords(&self, cleaned: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let low = cleaned.to_lowercase();
        self.keywords.iter().any(|k| low.contains(k.as_str()))
    }

    pub fn accept(&self, item: &RawItem, cursor: &HarvestCursor, seen: &HashSet<String>) -> Verdict {
        if seen.contains(&item.id) {
            return Verdict::Skip(Rejection::Duplicate);
        }
        let Some(created_at) = item.created_at else {
            return Verdict::Skip(Rejection::MissingTimestamp);
        };
        if let Some(since) = self.window.since {
            if created_at < since {
                return Verdict::Halt(Rejection::BeforeWindow);
            }
        }
        if let Some(until) = self.window.until {
            if created_at > until {
                return Verdict::Skip(Rejection::AfterWindow);
            }
        }
        if cursor.covers(item, self.policy.direction) {
            return match self.policy.order {
                FeedOrder::NewestFirst => Verdict::Halt(Rejection::BehindCursor),
                FeedOrder::OldestFirst => Verdict::Skip(Rejection::BehindCursor),
            };
        }
        if !self.matches_keywords(&clean_content(&item.body)) {
            return Verdict::Skip(Rejection::NoKeyword);
        }
        Verdict::Accept { created_at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::cursor::{CursorVariant, ScanDirection};
    use chrono::TimeZone;

    fn policy(order: FeedOrder) -> CursorPolicy {
        CursorPolicy::new(CursorVariant::MaxSeenId, ScanDirection::Forward, order)
    }

    fn item(id: &str, secs: i64, body: &str) -> RawItem {
        RawItem {
            id: id.into(),
            created_at: Utc.timestamp_opt(secs, 0).single(),
            body: body.into(),
            ..RawItem::default()
        }
    }

    #[test]
    fn keywords_are_case_insensitive_and_hash_agnostic() {
        let f = Filter::new(
            TimeWindow::default(),
            &["#AusVotes".to_string(), "Albanese".to_string()],
            policy(FeedOrder::NewestFirst),
        );
        assert!(f.matches_keywords("big day for #ausvotes2025"));
        assert!(f.matches_keywords("ALBANESE speaks"));
        assert!(!f.matches_keywords("football scores"));
    }

    #[test]
    fn empty_keywords_accept_everything() {
        let f = Filter::new(TimeWindow::default(), &[], policy(FeedOrder::NewestFirst));
        assert!(f.matches_keywords("anything at all"));
    }

    #[test]
    fn checks_run_in_order() {
        let f = Filter::new(
            TimeWindow {
                since: Utc.timestamp_opt(100, 0).single(),
                until: Utc.timestamp_opt(200, 0).single(),
            },
            &["vote".to_string()],
            policy(FeedOrder::NewestFirst),
        );
        let cursor = HarvestCursor::MaxSeenId { id: 10 };
        let mut seen = HashSet::new();
        seen.insert("50".to_string());

        assert_eq!(
            f.accept(&item("50", 150, "vote"), &cursor, &seen),
            Verdict::Skip(Rejection::Duplicate)
        );
        let mut no_ts = item("51", 0, "vote");
        no_ts.created_at = None;
        assert_eq!(
            f.accept(&no_ts, &cursor, &seen),
            Verdict::Skip(Rejection::MissingTimestamp)
        );
        assert_eq!(
            f.accept(&item("52", 99, "vote"), &cursor, &seen),
            Verdict::Halt(Rejection::BeforeWindow)
        );
        assert_eq!(
            f.accept(&item("53", 201, "vote"), &cursor, &seen),
            Verdict::Skip(Rejection::AfterWindow)
        );
        assert_eq!(
            f.accept(&item("9", 150, "vote"), &cursor, &seen),
            Verdict::Halt(Rejection::BehindCursor)
        );
        assert_eq!(
            f.accept(&item("54", 150, "weather"), &cursor, &seen),
            Verdict::Skip(Rejection::NoKeyword)
        );
        assert!(matches!(
            f.accept(&item("55", 200, "<p>Go <b>vote</b></p>"), &cursor, &seen),
            Verdict::Accept { .. }
        ));
    }

    #[test]
    fn oldest_first_feeds_skip_covered_items() {
        let f = Filter::new(TimeWindow::default(), &[], policy(FeedOrder::OldestFirst));
        let cursor = HarvestCursor::MaxSeenId { id: 10 };
        assert_eq!(
            f.accept(&item("10", 1, "x"), &cursor, &HashSet::new()),
            Verdict::Skip(Rejection::BehindCursor)
        );
    }
}
