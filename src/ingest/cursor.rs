// src/ingest/cursor.rs
//! Resume state shared by every harvester.
//!
//! A cursor only ever moves forward along its [`ScanDirection`]. Comparing two
//! cursors of different variants is an error, never a silent reset.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};
use crate::ingest::types::RawItem;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HarvestCursor {
    #[default]
    Empty,
    /// Opaque upstream token. `page` counts pages travelled since the first
    /// run so two tokens can be ordered.
    PageToken { token: String, page: u64 },
    MaxSeenId { id: u64 },
    MaxSeenTimestamp { at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    /// The stored bound only increases (incremental "since" harvesting).
    #[default]
    Forward,
    /// The stored bound only decreases (backfill into history).
    Backward,
}

/// Which cursor variant a feed persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorVariant {
    PageToken,
    MaxSeenId,
    MaxSeenTimestamp,
}

/// Order in which an upstream returns items inside one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedOrder {
    NewestFirst,
    OldestFirst,
}

/// How a feed checkpoints: cursor variant, direction and item order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPolicy {
    pub variant: CursorVariant,
    pub direction: ScanDirection,
    pub order: FeedOrder,
}

impl CursorPolicy {
    pub const fn new(variant: CursorVariant, direction: ScanDirection, order: FeedOrder) -> Self {
        Self {
            variant,
            direction,
            order,
        }
    }

    /// Key cursors on an oldest-first feed are safe after every record.
    pub fn checkpoints_per_record(&self) -> bool {
        self.variant != CursorVariant::PageToken && self.order == FeedOrder::OldestFirst
    }

    /// Key cursors on a newest-first feed are only safe once the scan reached
    /// the old bound.
    pub fn checkpoints_on_completion(&self) -> bool {
        self.variant != CursorVariant::PageToken && self.order == FeedOrder::NewestFirst
    }
}

impl HarvestCursor {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn variant(&self) -> Option<CursorVariant> {
        match self {
            Self::Empty => None,
            Self::PageToken { .. } => Some(CursorVariant::PageToken),
            Self::MaxSeenId { .. } => Some(CursorVariant::MaxSeenId),
            Self::MaxSeenTimestamp { .. } => Some(CursorVariant::MaxSeenTimestamp),
        }
    }

    /// Short form for log lines; page tokens are truncated.
    pub fn label(&self) -> String {
        match self {
            Self::Empty => "empty".to_string(),
            Self::PageToken { token, page } => {
                let short: String = token.chars().take(16).collect();
                format!("page#{page}:{short}")
            }
            Self::MaxSeenId { id } => format!("id:{id}"),
            Self::MaxSeenTimestamp { at } => format!("ts:{}", at.to_rfc3339()),
        }
    }

    /// Key cursor derived from one item, for the variants that have one.
    pub fn from_item(variant: CursorVariant, item: &RawItem) -> Option<Self> {
        match variant {
            CursorVariant::PageToken => None,
            CursorVariant::MaxSeenId => item.numeric_id().map(|id| Self::MaxSeenId { id }),
            CursorVariant::MaxSeenTimestamp => {
                item.created_at.map(|at| Self::MaxSeenTimestamp { at })
            }
        }
    }

    /// `Greater` when `self` is further along `direction` than `other`.
    /// An empty cursor is behind everything.
    pub fn progress_cmp(&self, other: &Self, direction: ScanDirection) -> Result<Ordering> {
        let along = |o: Ordering| match direction {
            ScanDirection::Forward => o,
            ScanDirection::Backward => o.reverse(),
        };
        match (self, other) {
            (Self::Empty, Self::Empty) => Ok(Ordering::Equal),
            (_, Self::Empty) => Ok(Ordering::Greater),
            (Self::Empty, _) => Ok(Ordering::Less),
            // page sequence grows whichever way the token walks
            (Self::PageToken { page: a, .. }, Self::PageToken { page: b, .. }) => Ok(a.cmp(b)),
            (Self::MaxSeenId { id: a }, Self::MaxSeenId { id: b }) => Ok(along(a.cmp(b))),
            (Self::MaxSeenTimestamp { at: a }, Self::MaxSeenTimestamp { at: b }) => {
                Ok(along(a.cmp(b)))
            }
            (a, b) => Err(HarvestError::CursorDirection(format!(
                "cannot compare {} with {}",
                a.label(),
                b.label()
            ))),
        }
    }

    pub fn is_behind(&self, other: &Self, direction: ScanDirection) -> Result<bool> {
        Ok(self.progress_cmp(other, direction)? == Ordering::Less)
    }

    pub fn is_ahead_of(&self, other: &Self, direction: ScanDirection) -> Result<bool> {
        Ok(self.progress_cmp(other, direction)? == Ordering::Greater)
    }

    /// Keep whichever of the two is further along.
    pub fn furthest(self, other: Self, direction: ScanDirection) -> Result<Self> {
        if other.is_ahead_of(&self, direction)? {
            Ok(other)
        } else {
            Ok(self)
        }
    }

    /// Whether `item` is already covered by this cursor, i.e. not beyond it.
    /// Items whose key cannot be read are never covered.
    pub fn covers(&self, item: &RawItem, direction: ScanDirection) -> bool {
        let key = match self.variant() {
            Some(v) => match Self::from_item(v, item) {
                Some(k) => k,
                None => return false,
            },
            None => return false,
        };
        matches!(key.progress_cmp(self, direction), Ok(o) if o != Ordering::Greater)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(id: &str, secs: i64) -> RawItem {
        RawItem {
            id: id.into(),
            created_at: Utc.timestamp_opt(secs, 0).single(),
            ..RawItem::default()
        }
    }

    #[test]
    fn forward_ids_only_grow() {
        let a = HarvestCursor::MaxSeenId { id: 10 };
        let b = HarvestCursor::MaxSeenId { id: 12 };
        assert!(a.is_behind(&b, ScanDirection::Forward).unwrap());
        assert!(b.is_behind(&a, ScanDirection::Backward).unwrap());
        assert!(HarvestCursor::Empty
            .is_behind(&a, ScanDirection::Backward)
            .unwrap());
    }

    #[test]
    fn mixed_variants_are_an_error() {
        let a = HarvestCursor::MaxSeenId { id: 10 };
        let b = HarvestCursor::PageToken {
            token: "abc".into(),
            page: 3,
        };
        assert!(matches!(
            a.progress_cmp(&b, ScanDirection::Forward),
            Err(HarvestError::CursorDirection(_))
        ));
    }

    #[test]
    fn page_tokens_order_by_sequence() {
        let a = HarvestCursor::PageToken {
            token: "zzz".into(),
            page: 1,
        };
        let b = HarvestCursor::PageToken {
            token: "aaa".into(),
            page: 2,
        };
        assert!(b.is_ahead_of(&a, ScanDirection::Backward).unwrap());
    }

    #[test]
    fn covers_items_at_or_before_the_bound() {
        let c = HarvestCursor::MaxSeenId { id: 100 };
        assert!(c.covers(&item("100", 0), ScanDirection::Forward));
        assert!(c.covers(&item("99", 0), ScanDirection::Forward));
        assert!(!c.covers(&item("101", 0), ScanDirection::Forward));
        assert!(!c.covers(&item("not-a-number", 0), ScanDirection::Forward));

        let t = HarvestCursor::MaxSeenTimestamp {
            at: Utc.timestamp_opt(1_000, 0).unwrap(),
        };
        assert!(t.covers(&item("x", 1_000), ScanDirection::Forward));
        assert!(!t.covers(&item("x", 1_001), ScanDirection::Forward));
        assert!(!HarvestCursor::Empty.covers(&item("1", 1), ScanDirection::Forward));
    }

    #[test]
    fn serde_shape_is_tagged() {
        let c = HarvestCursor::MaxSeenId { id: 7 };
        let s = serde_json::to_string(&c).unwrap();
        assert_eq!(s, r#"{"kind":"max_seen_id","id":7}"#);
        let back: HarvestCursor = serde_json::from_str(&s).unwrap();
        assert_eq!(back, c);
    }
}
