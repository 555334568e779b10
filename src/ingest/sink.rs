// src/ingest/sink.rs
//! Batch sink: buffers enriched records and upserts them by id.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::ingest::types::EnrichedRecord;

/// One document for the bulk call; `id` is the upsert key.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDoc {
    pub id: String,
    pub body: Value,
}

/// Outcome of one flush. Failed records do not fail the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub accepted: usize,
    pub failed_ids: BTreeSet<String>,
}

impl FlushReport {
    pub fn all_failed<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            accepted: 0,
            failed_ids: ids.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn merge(&mut self, other: FlushReport) {
        self.accepted += other.accepted;
        self.failed_ids.extend(other.failed_ids);
    }
}

/// Datastore bulk upsert. Implementations report per-id failures instead of
/// erroring; a transport failure marks the whole batch as failed.
#[async_trait::async_trait]
pub trait BulkIndex: Send + Sync {
    async fn bulk_upsert(&self, index: &str, docs: Vec<IndexDoc>) -> FlushReport;
}

#[async_trait::async_trait]
impl<T: BulkIndex + ?Sized> BulkIndex for Arc<T> {
    async fn bulk_upsert(&self, index: &str, docs: Vec<IndexDoc>) -> FlushReport {
        (**self).bulk_upsert(index, docs).await
    }
}

pub struct BatchSink<I: BulkIndex> {
    backend: I,
    index: String,
    batch_size: usize,
    buffer: Vec<EnrichedRecord>,
}

impl<I: BulkIndex> BatchSink<I> {
    pub fn new(backend: I, index: impl Into<String>, batch_size: usize) -> Self {
        Self {
            backend,
            index: index.into(),
            batch_size: batch_size.max(1),
            buffer: Vec::with_capacity(batch_size.max(1)),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer a record; flushes automatically when the batch is full.
    pub async fn add(&mut self, record: EnrichedRecord) -> Option<FlushReport> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Flush whatever is buffered (possibly nothing).
    pub async fn flush(&mut self) -> FlushReport {
        if self.buffer.is_empty() {
            return FlushReport::default();
        }
        let records = std::mem::take(&mut self.buffer);
        let mut report = FlushReport::default();
        let mut docs = Vec::with_capacity(records.len());
        for rec in records {
            match serde_json::to_value(&rec) {
                Ok(body) => docs.push(IndexDoc { id: rec.id, body }),
                Err(e) => {
                    tracing::warn!(target: "harvest", id = %rec.id, error = %e, "record not serializable");
                    report.failed_ids.insert(rec.id);
                }
            }
        }
        if !docs.is_empty() {
            report.merge(self.backend.bulk_upsert(&self.index, docs).await);
        }
        report
    }
}

/// In-memory index keyed by `(index, id)`. Ids listed in `fail_ids` are
/// rejected on every upsert.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    pub docs: Mutex<BTreeMap<(String, String), Value>>,
    pub fail_ids: Mutex<HashSet<String>>,
    /// Size of every bulk call, in order.
    pub calls: Mutex<Vec<usize>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(ids: &[&str]) -> Self {
        let me = Self::default();
        me.fail_ids
            .lock()
            .unwrap()
            .extend(ids.iter().map(|s| s.to_string()));
        me
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: &str, id: &str) -> Option<Value> {
        self.docs
            .lock()
            .unwrap()
            .get(&(index.to_string(), id.to_string()))
            .cloned()
    }
}

#[async_trait::async_trait]
impl BulkIndex for MemoryIndex {
    async fn bulk_upsert(&self, index: &str, docs: Vec<IndexDoc>) -> FlushReport {
        self.calls.lock().unwrap().push(docs.len());
        let fail = self.fail_ids.lock().unwrap().clone();
        let mut store = self.docs.lock().unwrap();
        let mut report = FlushReport::default();
        for doc in docs {
            if fail.contains(&doc.id) {
                report.failed_ids.insert(doc.id);
                continue;
            }
            store.insert((index.to_string(), doc.id), doc.body);
            report.accepted += 1;
        }
        report
    }
}
