//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 Sources pour view counts in. Indexes soak trending scores up.
//! And in between, the pipeline does one line of math and a lot of bookkeeping.
//!
//! 🎭 This module is the casting agency. Need view counts from the warehouse?
//! From an NDJSON export someone left in a bucket? From the in-memory void, for a test?
//! We've got a source for that. Need to write scores into Elasticsearch? Or into a
//! `BTreeMap` pretending to be Elasticsearch? We've got an index for that too.
//!
//! 🧠 Knowledge graph:
//! - Pattern: trait → concrete impls → backend enum that dispatches by `match`.
//! - Configs live next to the backend that reads them (`WarehouseSourceConfig` in
//!   `warehouse.rs`, and so on). `app_config` just stitches them together.
//! - Adapters are built once per process and injected. Nobody constructs a client mid-run.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::Result;
use async_trait::async_trait;

use crate::app_config::{IndexConfig, SourceConfig};
use crate::bulk::UpsertAction;
use crate::common::{
    BulkReport, ClusterHealth, FieldStats, MetricRecord, RangeBucket, RangeSpec, RankedDocument,
    SortOrder,
};
use crate::error::SyncError;

pub mod elasticsearch;
pub mod file;
pub mod in_mem;
pub mod warehouse;

pub use elasticsearch::{ElasticsearchIndex, ElasticsearchIndexConfig};
pub use file::{FileFormat, FileSource, FileSourceConfig};
pub use in_mem::{InMemoryIndex, InMemoryIndexConfig, InMemorySource};
pub use warehouse::{WarehouseSource, WarehouseSourceConfig};

// ===== Source Trait and Backend Enum =====

/// 🚰 Where view counts come from.
///
/// # Contract 📜
/// - `fetch_eligible_metrics` is called exactly once per run. No retries in here; if the
///   adapter wants retries it does them itself, quietly, before answering.
/// - Connection-level trouble is `SyncError::SourceUnavailable`. A query that ran and came
///   back angry is `SyncError::QueryFailed`. Both are fatal for the run.
/// - Every returned record has a non-empty `item_id` and an already-coerced view count.
#[async_trait]
pub trait MetricsSource: std::fmt::Debug + Send + Sync {
    /// 📥 Every eligible item, with its view count, in source order.
    async fn fetch_eligible_metrics(&self) -> Result<Vec<MetricRecord>, SyncError>;

    /// 🔎 One item's metrics, for the reporting side. Sources that can't do point lookups say `None`.
    async fn lookup_item(&self, _item_id: &str) -> Result<Option<MetricRecord>, SyncError> {
        Ok(None)
    }
}

/// 🎭 The many faces of a metrics source. Callers never need to know which one they got.
#[derive(Debug)]
pub enum SourceBackend {
    Warehouse(WarehouseSource),
    File(FileSource),
    InMemory(InMemorySource),
}

impl SourceBackend {
    /// 🏗️ Build the configured source. No network traffic happens here.
    pub fn from_config(config: &SourceConfig) -> Self {
        match config {
            SourceConfig::Warehouse(c) => SourceBackend::Warehouse(WarehouseSource::new(c.clone())),
            SourceConfig::File(c) => SourceBackend::File(FileSource::new(c.clone())),
            SourceConfig::InMemory(records) => {
                SourceBackend::InMemory(InMemorySource::new(records.clone()))
            }
        }
    }
}

#[async_trait]
impl MetricsSource for SourceBackend {
    async fn fetch_eligible_metrics(&self) -> Result<Vec<MetricRecord>, SyncError> {
        match self {
            SourceBackend::Warehouse(w) => w.fetch_eligible_metrics().await,
            SourceBackend::File(f) => f.fetch_eligible_metrics().await,
            SourceBackend::InMemory(i) => i.fetch_eligible_metrics().await,
        }
    }

    async fn lookup_item(&self, item_id: &str) -> Result<Option<MetricRecord>, SyncError> {
        match self {
            SourceBackend::Warehouse(w) => w.lookup_item(item_id).await,
            SourceBackend::File(f) => f.lookup_item(item_id).await,
            SourceBackend::InMemory(i) => i.lookup_item(item_id).await,
        }
    }
}

// ===== Index Trait and Backend Enum =====

/// 🕳️ The search index: one write path for the pipeline, a handful of reads for reporting.
///
/// # Contract 📜
/// - `bulk_upsert` receives one chunk. `Ok` means the request round-tripped, and the
///   `BulkReport` accounts for every document in the chunk (success or per-doc failure).
///   `Err` means the whole chunk is in limbo (transport error, timeout, non-2xx). The
///   pipeline marks every doc in it failed. Either way, no retries in here.
/// - `prepare` is the pre-flight check before the first write of an applied run.
/// - Everything else is read-only and never called by the pipeline.
#[async_trait]
pub trait SearchIndex: std::fmt::Debug + Send + Sync {
    /// 🛫 Ping the cluster and make sure `index` exists. Called once, before any chunk.
    async fn prepare(&self, index: &str) -> Result<()>;

    /// ✍️ Apply one chunk of partial-document updates keyed by `item_id`.
    async fn bulk_upsert(&self, index: &str, chunk: &[UpsertAction]) -> Result<BulkReport>;

    /// 🔎 `_source` of one document, or `None` if it isn't there.
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<serde_json::Value>>;

    /// 📊 count/min/max/avg of a numeric field.
    async fn field_stats(&self, index: &str, field: &str) -> Result<FieldStats>;

    /// 🪣 Range buckets over `field`, each optionally carrying the average of `avg_field`.
    async fn range_buckets(
        &self,
        index: &str,
        field: &str,
        ranges: &[RangeSpec],
        avg_field: Option<&str>,
    ) -> Result<Vec<RangeBucket>>;

    /// 🏆 Top `limit` documents sorted by `field`.
    async fn ranked(
        &self,
        index: &str,
        field: &str,
        order: SortOrder,
        limit: usize,
        source_fields: &[&str],
    ) -> Result<Vec<RankedDocument>>;

    /// 💓 Cluster name and version.
    async fn health(&self) -> Result<ClusterHealth>;
}

/// 🎭 Mirrors `SourceBackend` on the other end of the pipeline.
#[derive(Debug)]
pub enum IndexBackend {
    Elasticsearch(ElasticsearchIndex),
    InMemory(InMemoryIndex),
}

impl IndexBackend {
    /// 🏗️ Build the configured index adapter. Builds an HTTP client; sends nothing yet.
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        Ok(match config {
            IndexConfig::Elasticsearch(c) => {
                IndexBackend::Elasticsearch(ElasticsearchIndex::new(c.clone())?)
            }
            IndexConfig::InMemory(c) => IndexBackend::InMemory(InMemoryIndex::from_config(c)),
        })
    }
}

#[async_trait]
impl SearchIndex for IndexBackend {
    async fn prepare(&self, index: &str) -> Result<()> {
        match self {
            IndexBackend::Elasticsearch(es) => es.prepare(index).await,
            IndexBackend::InMemory(mem) => mem.prepare(index).await,
        }
    }

    async fn bulk_upsert(&self, index: &str, chunk: &[UpsertAction]) -> Result<BulkReport> {
        match self {
            IndexBackend::Elasticsearch(es) => es.bulk_upsert(index, chunk).await,
            IndexBackend::InMemory(mem) => mem.bulk_upsert(index, chunk).await,
        }
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<serde_json::Value>> {
        match self {
            IndexBackend::Elasticsearch(es) => es.get_document(index, id).await,
            IndexBackend::InMemory(mem) => mem.get_document(index, id).await,
        }
    }

    async fn field_stats(&self, index: &str, field: &str) -> Result<FieldStats> {
        match self {
            IndexBackend::Elasticsearch(es) => es.field_stats(index, field).await,
            IndexBackend::InMemory(mem) => mem.field_stats(index, field).await,
        }
    }

    async fn range_buckets(
        &self,
        index: &str,
        field: &str,
        ranges: &[RangeSpec],
        avg_field: Option<&str>,
    ) -> Result<Vec<RangeBucket>> {
        match self {
            IndexBackend::Elasticsearch(es) => es.range_buckets(index, field, ranges, avg_field).await,
            IndexBackend::InMemory(mem) => mem.range_buckets(index, field, ranges, avg_field).await,
        }
    }

    async fn ranked(
        &self,
        index: &str,
        field: &str,
        order: SortOrder,
        limit: usize,
        source_fields: &[&str],
    ) -> Result<Vec<RankedDocument>> {
        match self {
            IndexBackend::Elasticsearch(es) => {
                es.ranked(index, field, order, limit, source_fields).await
            }
            IndexBackend::InMemory(mem) => {
                mem.ranked(index, field, order, limit, source_fields).await
            }
        }
    }

    async fn health(&self) -> Result<ClusterHealth> {
        match self {
            IndexBackend::Elasticsearch(es) => es.health().await,
            IndexBackend::InMemory(mem) => mem.health().await,
        }
    }
}
