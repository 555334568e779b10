// src/ingest/store.rs
//! Cursor stores. `load` never fails; `save` refuses to move a cursor backward.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};
use crate::ingest::cursor::{HarvestCursor, ScanDirection};

/// Persisted resume state for one harvester.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CursorState {
    pub cursor: HarvestCursor,
    #[serde(default)]
    pub direction: ScanDirection,
    /// Records indexed across all runs that advanced this cursor.
    #[serde(default)]
    pub processed_count: u64,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

impl CursorState {
    pub fn new(cursor: HarvestCursor, direction: ScanDirection) -> Self {
        Self {
            cursor,
            direction,
            processed_count: 0,
            last_run: None,
        }
    }
}

#[async_trait::async_trait]
pub trait CursorStore: Send + Sync {
    /// Stored state, or the empty default when none exists or it is unreadable.
    async fn load(&self, key: &str) -> CursorState;

    /// Persist `state` unless it is behind what is already stored.
    async fn save(&self, key: &str, state: &CursorState) -> Result<()>;
}

#[async_trait::async_trait]
impl<T: CursorStore + ?Sized> CursorStore for Arc<T> {
    async fn load(&self, key: &str) -> CursorState {
        (**self).load(key).await
    }

    async fn save(&self, key: &str, state: &CursorState) -> Result<()> {
        (**self).save(key, state).await
    }
}

/// Reject `offered` when it would move the stored cursor backward or switch
/// direction/variant.
pub fn check_advance(stored: &CursorState, offered: &CursorState) -> Result<()> {
    if stored.cursor.is_empty() {
        return Ok(());
    }
    if stored.direction != offered.direction {
        return Err(HarvestError::CursorDirection(format!(
            "stored direction {:?}, offered {:?}",
            stored.direction, offered.direction
        )));
    }
    if offered.cursor.is_behind(&stored.cursor, offered.direction)? {
        return Err(HarvestError::StaleCursor {
            stored: stored.cursor.label(),
            offered: offered.cursor.label(),
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    states: Mutex<HashMap<String, CursorState>>,
    /// When set, every `save` fails with `Persistence`.
    pub unreachable: Mutex<bool>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(key: &str, state: CursorState) -> Self {
        let me = Self::default();
        me.states.lock().unwrap().insert(key.to_string(), state);
        me
    }

    pub fn get(&self, key: &str) -> Option<CursorState> {
        self.states.lock().unwrap().get(key).cloned()
    }
}

#[async_trait::async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, key: &str) -> CursorState {
        self.get(key).unwrap_or_default()
    }

    async fn save(&self, key: &str, state: &CursorState) -> Result<()> {
        if *self.unreachable.lock().unwrap() {
            return Err(HarvestError::Persistence("memory store marked unreachable".into()));
        }
        let mut states = self.states.lock().unwrap();
        if let Some(stored) = states.get(key) {
            check_advance(stored, state)?;
        }
        states.insert(key.to_string(), state.clone());
        Ok(())
    }
}

/// One JSON document per key under `dir`, replaced atomically via rename.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    dir: PathBuf,
}

impl FileCursorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    async fn read(path: &Path) -> Option<CursorState> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(target: "harvest", path = %path.display(), error = %e, "cursor file unreadable, starting empty");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(target: "harvest", path = %path.display(), error = %e, "cursor file corrupt, starting empty");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self, key: &str) -> CursorState {
        Self::read(&self.path_for(key)).await.unwrap_or_default()
    }

    async fn save(&self, key: &str, state: &CursorState) -> Result<()> {
        let path = self.path_for(key);
        if let Some(stored) = Self::read(&path).await {
            check_advance(&stored, state)?;
        }
        let body = serde_json::to_string_pretty(state)
            .map_err(|e| HarvestError::Persistence(e.to_string()))?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| HarvestError::Persistence(format!("{}: {e}", self.dir.display())))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| HarvestError::Persistence(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| HarvestError::Persistence(format!("{}: {e}", path.display())))?;
        Ok(())
    }
}
