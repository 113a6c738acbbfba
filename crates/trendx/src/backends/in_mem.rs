//! # Previously, on Trendx...
//!
//! 🎬 The warehouse was down for maintenance. The cluster was "being upgraded".
//! The tests still had to run. Someone had to pretend to be both.
//!
//! That someone was this module.
//!
//! `in_mem` provides an in-memory [`MetricsSource`] and [`SearchIndex`] for tests and
//! local development. The [`InMemorySource`] hands back whatever records it was built
//! with (or whatever error it was told to throw). The [`InMemoryIndex`] keeps documents
//! in a `BTreeMap` behind an `Arc<Mutex<...>>` so tests can inspect what landed, and it
//! can be told to reject specific documents or blow up whole chunks.
//!
//! 🦆
//!
//! ⚠️ This is NOT for production. If you're deploying this to prod, please also deploy a
//! therapist.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backends::{MetricsSource, SearchIndex};
use crate::bulk::UpsertAction;
use crate::common::{
    BulkReport, ClusterHealth, FailedItem, FieldStats, MetricRecord, RangeBucket, RangeSpec,
    RankedDocument, SortOrder,
};
use crate::error::SyncError;

/// 📦 The world's most cooperative metrics source.
///
/// Clone-able; clones share the fetch counter, so a test can hand one copy to the
/// pipeline and keep another to check whether the warehouse was "called".
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    records: Vec<MetricRecord>,
    failure: Option<SyncError>,
    fetch_calls: Arc<AtomicUsize>,
}

impl InMemorySource {
    pub fn new(records: Vec<MetricRecord>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    /// 💀 A source that fails every fetch with `error`. For testing the sad path.
    pub fn failing(error: SyncError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    /// 🔢 How many times `fetch_eligible_metrics` has been called, across all clones.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for InMemorySource {
    async fn fetch_eligible_metrics(&self) -> Result<Vec<MetricRecord>, SyncError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        // -- same rule as the real adapters: no id, no key, no document
        let (keyed, unkeyed): (Vec<_>, Vec<_>) = self
            .records
            .iter()
            .cloned()
            .partition(|r| !r.item_id.trim().is_empty());
        if !unkeyed.is_empty() {
            warn!("⚠️ Skipped {} in-memory records with an empty item_id", unkeyed.len());
        }
        debug!("📦 In-memory source handing over {} records", keyed.len());
        Ok(keyed)
    }

    async fn lookup_item(&self, item_id: &str) -> Result<Option<MetricRecord>, SyncError> {
        Ok(self.records.iter().find(|r| r.item_id == item_id).cloned())
    }
}

/// 🧪 Knobs for the in-memory index when it's picked from config.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct InMemoryIndexConfig {
    /// when true, updates for unknown ids create the document
    #[serde(default = "default_accept_new_documents")]
    pub accept_new_documents: bool,
}

fn default_accept_new_documents() -> bool {
    true
}

impl Default for InMemoryIndexConfig {
    fn default() -> Self {
        Self {
            accept_new_documents: default_accept_new_documents(),
        }
    }
}

/// 🗄️ The guts of the in-memory index. One lock, one truth.
#[derive(Debug, Default)]
struct IndexState {
    documents: BTreeMap<String, Map<String, Value>>,
    /// when false, updating a missing document fails like Elasticsearch's `update` does
    create_missing: bool,
    /// per-document rejections: item_id -> error detail
    rejections: HashMap<String, String>,
    /// any chunk containing one of these ids fails as a whole: item_id -> error
    poisoned: HashMap<String, String>,
    unreachable: Option<String>,
    bulk_calls: usize,
}

/// 🧠 An index that lives in RAM and forgets everything on drop.
///
/// Clone-able. The `Arc` means every clone sees the same documents.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIndex {
    state: Arc<Mutex<IndexState>>,
}

impl InMemoryIndex {
    /// 🏗️ Strict mode: updating a document that doesn't exist is a per-document failure.
    pub fn new() -> Self {
        Self::default()
    }

    /// 🏗️ Lenient mode: updates for unknown ids create the document.
    pub fn accepting_new_documents() -> Self {
        let state = IndexState {
            create_missing: true,
            ..IndexState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn from_config(config: &InMemoryIndexConfig) -> Self {
        if config.accept_new_documents {
            Self::accepting_new_documents()
        } else {
            Self::new()
        }
    }

    /// 🌱 Seed documents, each with whatever fields the caller provides.
    pub async fn seed(&self, documents: impl IntoIterator<Item = (String, Value)>) {
        let mut state = self.state.lock().await;
        for (id, doc) in documents {
            let fields = match doc {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            state.documents.insert(id, fields);
        }
    }

    /// 🙅 Make every update of `item_id` fail with `reason`.
    pub async fn reject(&self, item_id: impl Into<String>, reason: impl Into<String>) {
        self.state
            .lock()
            .await
            .rejections
            .insert(item_id.into(), reason.into());
    }

    /// 💣 Make any chunk containing `item_id` fail as a whole, like a timed-out request.
    pub async fn fail_chunks_containing(&self, item_id: impl Into<String>, reason: impl Into<String>) {
        self.state
            .lock()
            .await
            .poisoned
            .insert(item_id.into(), reason.into());
    }

    /// 🔌 Make the pre-flight check fail.
    pub async fn set_unreachable(&self, reason: impl Into<String>) {
        self.state.lock().await.unreachable = Some(reason.into());
    }

    /// 🔢 How many bulk requests have been received.
    pub async fn bulk_calls(&self) -> usize {
        self.state.lock().await.bulk_calls
    }

    /// 📸 A snapshot of every document, for assertions.
    pub async fn documents(&self) -> BTreeMap<String, Value> {
        self.state
            .lock()
            .await
            .documents
            .iter()
            .map(|(id, fields)| (id.clone(), Value::Object(fields.clone())))
            .collect()
    }

    fn numeric(doc: &Map<String, Value>, field: &str) -> Option<f64> {
        doc.get(field).and_then(Value::as_f64)
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn prepare(&self, index: &str) -> Result<()> {
        if let Some(reason) = &self.state.lock().await.unreachable {
            bail!("💀 In-memory index '{index}' is playing dead: {reason}");
        }
        Ok(())
    }

    async fn bulk_upsert(&self, index: &str, chunk: &[UpsertAction]) -> Result<BulkReport> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.bulk_calls += 1;

        if let Some(reason) = chunk.iter().find_map(|a| state.poisoned.get(&a.item_id)) {
            bail!("💀 In-memory bulk request to '{index}' failed: {reason}");
        }

        let mut report = BulkReport::default();
        for action in chunk {
            if let Some(reason) = state.rejections.get(&action.item_id) {
                report.failures.push(FailedItem::new(&action.item_id, reason));
                continue;
            }
            let Value::Object(partial) = action.doc() else {
                continue;
            };
            match state.documents.get_mut(&action.item_id) {
                Some(existing) => {
                    existing.extend(partial);
                    report.success_count += 1;
                }
                None if state.create_missing => {
                    state.documents.insert(action.item_id.clone(), partial);
                    report.success_count += 1;
                }
                None => report.failures.push(FailedItem::new(
                    &action.item_id,
                    format!(
                        "document_missing_exception: [{}]: document missing",
                        action.item_id
                    ),
                )),
            }
        }
        Ok(report)
    }

    async fn get_document(&self, _index: &str, id: &str) -> Result<Option<Value>> {
        Ok(self
            .state
            .lock()
            .await
            .documents
            .get(id)
            .map(|fields| Value::Object(fields.clone())))
    }

    async fn field_stats(&self, _index: &str, field: &str) -> Result<FieldStats> {
        let state = self.state.lock().await;
        let values: Vec<f64> = state
            .documents
            .values()
            .filter_map(|doc| Self::numeric(doc, field))
            .collect();
        if values.is_empty() {
            return Ok(FieldStats::default());
        }
        let sum: f64 = values.iter().sum();
        Ok(FieldStats {
            count: values.len() as u64,
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            avg: Some(sum / values.len() as f64),
        })
    }

    async fn range_buckets(
        &self,
        _index: &str,
        field: &str,
        ranges: &[RangeSpec],
        avg_field: Option<&str>,
    ) -> Result<Vec<RangeBucket>> {
        let state = self.state.lock().await;
        Ok(ranges
            .iter()
            .map(|range| {
                let members: Vec<&Map<String, Value>> = state
                    .documents
                    .values()
                    .filter(|doc| Self::numeric(doc, field).is_some_and(|v| range.contains(v)))
                    .collect();
                let avg = avg_field.and_then(|avg_field| {
                    let values: Vec<f64> = members
                        .iter()
                        .filter_map(|doc| Self::numeric(doc, avg_field))
                        .collect();
                    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
                });
                RangeBucket {
                    key: range.key.clone(),
                    doc_count: members.len() as u64,
                    avg,
                }
            })
            .collect())
    }

    async fn ranked(
        &self,
        _index: &str,
        field: &str,
        order: SortOrder,
        limit: usize,
        source_fields: &[&str],
    ) -> Result<Vec<RankedDocument>> {
        let state = self.state.lock().await;
        let mut scored: Vec<(&String, &Map<String, Value>, f64)> = state
            .documents
            .iter()
            .filter_map(|(id, doc)| Self::numeric(doc, field).map(|v| (id, doc, v)))
            .collect();
        scored.sort_by(|a, b| {
            let ordering = a.2.total_cmp(&b.2);
            match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(id, doc, _)| {
                let source: Map<String, Value> = if source_fields.is_empty() {
                    doc.clone()
                } else {
                    doc.iter()
                        .filter(|(k, _)| source_fields.contains(&k.as_str()))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                };
                RankedDocument {
                    id: id.clone(),
                    source: Value::Object(source),
                }
            })
            .collect())
    }

    async fn health(&self) -> Result<ClusterHealth> {
        Ok(ClusterHealth {
            cluster_name: "in-memory".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(id: &str, score: f64) -> UpsertAction {
        UpsertAction {
            item_id: id.to_string(),
            trending_score: score,
            views_count: None,
        }
    }

    #[tokio::test]
    async fn the_one_where_strict_mode_refuses_strangers() -> Result<()> {
        let index = InMemoryIndex::new();
        index
            .seed([("known".to_string(), json!({"name": "Lamp", "trending_score": 1.0}))])
            .await;
        let report = index
            .bulk_upsert("products", &[action("known", 80.0), action("stranger", 90.0)])
            .await?;
        assert_eq!(report.success_count, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].item_id, "stranger");
        assert!(report.failures[0].error.starts_with("document_missing_exception"));

        // -- partial update: the name survives, the score moves
        let docs = index.documents().await;
        assert_eq!(docs["known"], json!({"name": "Lamp", "trending_score": 80.0}));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_poisoned_chunk_takes_everyone_down_with_it() {
        let index = InMemoryIndex::accepting_new_documents();
        index.fail_chunks_containing("B", "request timed out").await;
        let err = index
            .bulk_upsert("products", &[action("A", 1.0), action("B", 2.0)])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("request timed out"));
        assert!(index.documents().await.is_empty());
        assert_eq!(index.bulk_calls().await, 1);
    }

    #[tokio::test]
    async fn the_one_where_the_reporting_reads_add_up() -> Result<()> {
        let index = InMemoryIndex::accepting_new_documents();
        index
            .seed([
                ("A".to_string(), json!({"trending_score": 100.0, "views_count": 0})),
                ("B".to_string(), json!({"trending_score": 50.0, "views_count": 99})),
                ("C".to_string(), json!({"trending_score": 0.0, "views_count": 9999})),
            ])
            .await;

        let stats = index.field_stats("products", "trending_score").await?;
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Some(0.0));
        assert_eq!(stats.max, Some(100.0));
        assert_eq!(stats.avg, Some(50.0));

        let buckets = index
            .range_buckets(
                "products",
                "views_count",
                &[
                    RangeSpec::new("0-100", Some(0.0), Some(100.0)),
                    RangeSpec::new("100+", Some(100.0), None),
                ],
                Some("trending_score"),
            )
            .await?;
        assert_eq!(buckets[0].doc_count, 2);
        assert_eq!(buckets[0].avg, Some(75.0));
        assert_eq!(buckets[1].doc_count, 1);

        let top = index
            .ranked("products", "trending_score", SortOrder::Desc, 2, &["trending_score"])
            .await?;
        let ids: Vec<&str> = top.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(top[0].source, json!({"trending_score": 100.0}));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_source_counts_its_callers() {
        let source = InMemorySource::new(vec![
            MetricRecord::new("A", 1),
            MetricRecord::new("  ", 5),
        ]);
        let spy = source.clone();
        let records = source.fetch_eligible_metrics().await.unwrap();
        assert_eq!(records, vec![MetricRecord::new("A", 1)]);
        assert_eq!(spy.fetch_calls(), 1);
    }
}
