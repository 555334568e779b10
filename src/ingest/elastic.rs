// src/ingest/elastic.rs
//! Elasticsearch over plain HTTP: bulk upsert sink, state-document cursor
//! store and the latest-document cursor store.

use std::time::Duration;

use anyhow::Context;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use crate::error::{HarvestError, Result};
use crate::ingest::cursor::{CursorVariant, HarvestCursor, ScanDirection};
use crate::ingest::providers::parse_rfc3339;
use crate::ingest::sink::{BulkIndex, FlushReport, IndexDoc};
use crate::ingest::store::{check_advance, CursorState, CursorStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticSettings {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Cluster-internal endpoints often run self-signed certificates.
    pub accept_invalid_certs: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ElasticClient {
    base: String,
    user: Option<String>,
    password: Option<String>,
    timeout: Duration,
    http: reqwest::Client,
}

impl ElasticClient {
    pub fn new(settings: &ElasticSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()
            .context("building elasticsearch http client")?;
        Ok(Self {
            base: settings.url.trim_end_matches('/').to_string(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            timeout: settings.timeout,
            http,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let rb = self.http.request(method, format!("{}/{}", self.base, path));
        match &self.user {
            Some(user) => rb.basic_auth(user, self.password.as_deref()),
            None => rb,
        }
    }

    /// Send and return status plus parsed JSON body (`Null` when not JSON).
    async fn call(&self, rb: reqwest::RequestBuilder) -> Result<(StatusCode, Value)> {
        let resp = rb
            .send()
            .await
            .map_err(|e| HarvestError::from_http(&e, self.timeout))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| HarvestError::from_http(&e, self.timeout))?;
        Ok((status, serde_json::from_str(&text).unwrap_or(Value::Null)))
    }
}

/// NDJSON body for `_bulk`: one `index` action per document, so a re-sent id
/// replaces the stored document.
pub fn bulk_body(index: &str, docs: &[IndexDoc]) -> String {
    let mut out = String::new();
    for d in docs {
        out.push_str(&json!({ "index": { "_index": index, "_id": d.id } }).to_string());
        out.push('\n');
        out.push_str(&d.body.to_string());
        out.push('\n');
    }
    out
}

/// Per-item outcome of a `_bulk` answer. Ids the answer does not mention
/// count as failed.
pub fn parse_bulk_response(resp: &Value, docs: &[IndexDoc]) -> FlushReport {
    let Some(items) = resp.get("items").and_then(Value::as_array) else {
        return FlushReport::all_failed(docs.iter().map(|d| d.id.as_str()));
    };
    let mut report = FlushReport::default();
    let mut answered = std::collections::HashSet::new();
    for item in items {
        let Some(action) = item.as_object().and_then(|o| o.values().next()) else {
            continue;
        };
        let Some(id) = action.get("_id").and_then(Value::as_str) else {
            continue;
        };
        answered.insert(id.to_string());
        let status = action.get("status").and_then(Value::as_u64).unwrap_or(0);
        if (200..300).contains(&status) {
            report.accepted += 1;
        } else {
            let reason = action
                .pointer("/error/reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            tracing::debug!(target: "harvest", %id, status, reason, "bulk item rejected");
            report.failed_ids.insert(id.to_string());
        }
    }
    for d in docs {
        if !answered.contains(&d.id) {
            report.failed_ids.insert(d.id.clone());
        }
    }
    report
}

/// Explicit mapping for a data index. Without it dynamic mapping turns
/// `geolocation` into two floats and `id` into analysed text.
pub fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "id": { "type": "keyword" },
                "source": { "type": "keyword" },
                "created_at": { "type": "date" },
                "content": { "type": "text" },
                "author": { "type": "keyword" },
                "url": { "type": "keyword" },
                "sentiment_score": { "type": "float" },
                "sentiment_label": { "type": "keyword" },
                "time_of_day": { "type": "keyword" },
                "day_of_week": { "type": "keyword" },
                "location": { "type": "keyword" },
                "geolocation": { "type": "geo_point" },
                "location_source": { "type": "keyword" },
                "shares": { "type": "long" },
                "likes": { "type": "long" }
            }
        }
    })
}

/// `_bulk` sink.
pub struct ElasticIndex {
    client: ElasticClient,
}

impl ElasticIndex {
    pub fn new(client: ElasticClient) -> Self {
        Self { client }
    }

    /// Create `index` with [`index_mapping`] unless it already exists.
    /// An existing index is left as is.
    pub async fn ensure_index(&self, index: &str) -> Result<()> {
        let (status, _) = self
            .client
            .call(self.client.request(Method::HEAD, index))
            .await?;
        if status.is_success() {
            return Ok(());
        }
        if status != StatusCode::NOT_FOUND {
            return Err(HarvestError::Persistence(format!("check index {index}: {status}")));
        }

        let rb = self
            .client
            .request(Method::PUT, index)
            .json(&index_mapping());
        let (status, body) = self.client.call(rb).await?;
        if status.is_success() {
            tracing::info!(target: "harvest", %index, "index created with mapping");
            return Ok(());
        }
        // lost a race with another writer creating the same index
        if body.pointer("/error/type").and_then(Value::as_str)
            == Some("resource_already_exists_exception")
        {
            return Ok(());
        }
        Err(HarvestError::Persistence(format!("create index {index}: {status}")))
    }
}

#[async_trait::async_trait]
impl BulkIndex for ElasticIndex {
    async fn bulk_upsert(&self, index: &str, docs: Vec<IndexDoc>) -> FlushReport {
        let rb = self
            .client
            .request(Method::POST, "_bulk")
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(bulk_body(index, &docs));
        match self.client.call(rb).await {
            Ok((status, body)) if status.is_success() => parse_bulk_response(&body, &docs),
            Ok((status, _)) => {
                tracing::warn!(target: "harvest", %index, %status, docs = docs.len(), "bulk request rejected");
                FlushReport::all_failed(docs.iter().map(|d| d.id.as_str()))
            }
            Err(e) => {
                tracing::warn!(target: "harvest", %index, error = %e, docs = docs.len(), "bulk request failed");
                FlushReport::all_failed(docs.iter().map(|d| d.id.as_str()))
            }
        }
    }
}

/// Cursor state as one document per harvester in a state index, written with
/// optimistic concurrency (`if_seq_no` / `if_primary_term`).
pub struct ElasticCursorStore {
    client: ElasticClient,
    index: String,
}

struct Versioned {
    state: CursorState,
    seq_no: u64,
    primary_term: u64,
}

impl ElasticCursorStore {
    pub fn new(client: ElasticClient, index: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
        }
    }

    async fn read(&self, key: &str) -> Result<Option<Versioned>> {
        let rb = self
            .client
            .request(Method::GET, &format!("{}/_doc/{}", self.index, key));
        let (status, body) = self.client.call(rb).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(HarvestError::Persistence(format!("read {key}: {status}")));
        }
        let source = body.get("_source").cloned().unwrap_or(Value::Null);
        let state: CursorState = serde_json::from_value(source)
            .map_err(|e| HarvestError::Persistence(format!("decode {key}: {e}")))?;
        Ok(Some(Versioned {
            state,
            seq_no: body.get("_seq_no").and_then(Value::as_u64).unwrap_or(0),
            primary_term: body.get("_primary_term").and_then(Value::as_u64).unwrap_or(1),
        }))
    }
}

#[async_trait::async_trait]
impl CursorStore for ElasticCursorStore {
    async fn load(&self, key: &str) -> CursorState {
        match self.read(key).await {
            Ok(Some(v)) => v.state,
            Ok(None) => CursorState::default(),
            Err(e) => {
                tracing::warn!(target: "harvest", %key, error = %e, "cursor state unreadable, starting empty");
                CursorState::default()
            }
        }
    }

    async fn save(&self, key: &str, state: &CursorState) -> Result<()> {
        let body =
            serde_json::to_value(state).map_err(|e| HarvestError::Persistence(e.to_string()))?;
        // one retry when a concurrent writer bumped the version
        for attempt in 1..=2 {
            let current = self
                .read(key)
                .await
                .map_err(|e| HarvestError::Persistence(e.to_string()))?;
            let path = match &current {
                Some(v) => {
                    check_advance(&v.state, state)?;
                    format!(
                        "{}/_doc/{}?if_seq_no={}&if_primary_term={}&refresh=true",
                        self.index, key, v.seq_no, v.primary_term
                    )
                }
                None => format!("{}/_doc/{}?op_type=create&refresh=true", self.index, key),
            };
            let rb = self.client.request(Method::PUT, &path).json(&body);
            let (status, _) = self
                .client
                .call(rb)
                .await
                .map_err(|e| HarvestError::Persistence(e.to_string()))?;
            if status.is_success() {
                return Ok(());
            }
            if status == StatusCode::CONFLICT && attempt == 1 {
                tracing::info!(target: "harvest", %key, "cursor state changed concurrently, re-checking");
                continue;
            }
            return Err(HarvestError::Persistence(format!("write {key}: {status}")));
        }
        Err(HarvestError::Persistence(format!("write {key}: version conflict")))
    }
}

/// Derives the cursor from the newest document already in the data index
/// (sorted by `created_at`). Saving is a no-op: the indexed data is the state.
pub struct LatestDocumentStore {
    client: ElasticClient,
    index: String,
    variant: CursorVariant,
}

impl LatestDocumentStore {
    pub fn new(client: ElasticClient, index: impl Into<String>, variant: CursorVariant) -> Self {
        Self {
            client,
            index: index.into(),
            variant,
        }
    }
}

/// Cursor from a `_search` answer's first hit.
pub fn cursor_from_hits(variant: CursorVariant, resp: &Value) -> Option<HarvestCursor> {
    let source = resp.pointer("/hits/hits/0/_source")?;
    match variant {
        CursorVariant::MaxSeenId => {
            let id = match source.get("id")? {
                Value::String(s) => s.trim().parse().ok()?,
                Value::Number(n) => n.as_u64()?,
                _ => return None,
            };
            Some(HarvestCursor::MaxSeenId { id })
        }
        CursorVariant::MaxSeenTimestamp => source
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(parse_rfc3339)
            .map(|at| HarvestCursor::MaxSeenTimestamp { at }),
        CursorVariant::PageToken => None,
    }
}

#[async_trait::async_trait]
impl CursorStore for LatestDocumentStore {
    async fn load(&self, _key: &str) -> CursorState {
        let query = json!({
            "size": 1,
            "sort": [{ "created_at": { "order": "desc" } }],
            "_source": ["id", "created_at"],
        });
        let rb = self
            .client
            .request(Method::POST, &format!("{}/_search", self.index))
            .json(&query);
        match self.client.call(rb).await {
            Ok((status, body)) if status.is_success() => {
                let cursor = cursor_from_hits(self.variant, &body).unwrap_or_default();
                CursorState::new(cursor, ScanDirection::Forward)
            }
            Ok((status, _)) => {
                if status != StatusCode::NOT_FOUND {
                    tracing::warn!(target: "harvest", index = %self.index, %status, "latest-document lookup failed, starting empty");
                }
                CursorState::default()
            }
            Err(e) => {
                tracing::warn!(target: "harvest", index = %self.index, error = %e, "latest-document lookup failed, starting empty");
                CursorState::default()
            }
        }
    }

    async fn save(&self, _key: &str, _state: &CursorState) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str) -> IndexDoc {
        IndexDoc {
            id: id.into(),
            body: json!({ "id": id }),
        }
    }

    #[test]
    fn bulk_body_is_ndjson_pairs() {
        let body = bulk_body("posts", &[doc("1"), doc("2")]);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], r#"{"index":{"_id":"1","_index":"posts"}}"#);
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn bulk_response_splits_failures() {
        let resp = json!({
            "errors": true,
            "items": [
                { "index": { "_id": "1", "status": 201 } },
                { "index": { "_id": "2", "status": 400, "error": { "reason": "mapper_parsing_exception" } } }
            ]
        });
        let docs = [doc("1"), doc("2"), doc("3")];
        let rep = parse_bulk_response(&resp, &docs);
        assert_eq!(rep.accepted, 1);
        assert_eq!(
            rep.failed_ids.into_iter().collect::<Vec<_>>(),
            vec!["2".to_string(), "3".to_string()]
        );
    }

    #[test]
    fn mapping_types_the_enriched_fields() {
        let m = index_mapping();
        let props = m.pointer("/mappings/properties").unwrap();
        assert_eq!(props["geolocation"]["type"], "geo_point");
        assert_eq!(props["id"]["type"], "keyword");
        assert_eq!(props["created_at"]["type"], "date");
        assert_eq!(props["content"]["type"], "text");
        for field in ["location", "sentiment_label", "time_of_day", "day_of_week"] {
            assert_eq!(props[field]["type"], "keyword", "{field}");
        }
    }

    #[test]
    fn latest_document_reads_id_or_timestamp() {
        let resp = json!({ "hits": { "hits": [
            { "_source": { "id": "114", "created_at": "2025-04-01T10:00:00+00:00" } }
        ]}});
        assert_eq!(
            cursor_from_hits(CursorVariant::MaxSeenId, &resp),
            Some(HarvestCursor::MaxSeenId { id: 114 })
        );
        assert!(matches!(
            cursor_from_hits(CursorVariant::MaxSeenTimestamp, &resp),
            Some(HarvestCursor::MaxSeenTimestamp { .. })
        ));
        assert_eq!(
            cursor_from_hits(CursorVariant::MaxSeenId, &json!({ "hits": { "hits": [] } })),
            None
        );
    }
}
