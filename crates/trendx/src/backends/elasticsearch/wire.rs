//! 📡 Elasticsearch wire format: request bodies out, response bodies in.
//!
//! No HTTP here. Just strings and `serde_json::Value`s, so every shape the cluster
//! sends back can be tested without a cluster.
//!
//! 🧠 Knowledge graph:
//! - `_bulk` body: two NDJSON lines per document, trailing newline REQUIRED.
//!   ```text
//!   {"update":{"_index":"skus","_id":"SKU-1"}}
//!   {"doc":{"trending_score":87.5}}
//!   ```
//! - `_bulk` response: `items` come back in request order, one per action. We match by
//!   position, not by `_id`, because duplicate ids in one chunk are legal and `_id` would lie.
//! - Aggregations (`stats`, `range`) and sorted searches feed the reporting side.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::bulk::UpsertAction;
use crate::common::{
    BulkReport, ClusterHealth, FailedItem, FieldStats, RangeBucket, RangeSpec, RankedDocument,
    SortOrder,
};

const STATS_AGG: &str = "field_stats";
const RANGE_AGG: &str = "buckets";
const AVG_AGG: &str = "avg_value";

// ===== _bulk =====

/// 📝 Render one chunk into a `_bulk` NDJSON payload.
pub(crate) fn bulk_body(index: &str, chunk: &[UpsertAction], doc_as_upsert: bool) -> Result<String> {
    let mut body = String::with_capacity(chunk.len() * 96);
    for action in chunk {
        let header = json!({"update": {"_index": index, "_id": action.item_id}});
        let mut update = json!({"doc": action.doc()});
        if doc_as_upsert {
            update["doc_as_upsert"] = Value::Bool(true);
        }
        body.push_str(&serde_json::to_string(&header)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&update)?);
        body.push('\n');
    }
    Ok(body)
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<serde_json::Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct BulkItemResult {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

/// 🔍 Turn a `_bulk` response body into per-document outcomes for `chunk`.
///
/// An item is a failure when it carries an `error` object or a non-2xx `status`.
/// Items the cluster forgot to mention are failures too, so the counts always add up.
pub(crate) fn parse_bulk_response(body: &str, chunk: &[UpsertAction]) -> Result<BulkReport> {
    let response: BulkResponse = serde_json::from_str(body)
        .context("💀 The _bulk response was not the JSON we were promised. The cluster answered in tongues.")?;

    let mut report = BulkReport::default();
    for (position, action) in chunk.iter().enumerate() {
        // -- each item is {"<op>": {...}}; the op name varies, so take whatever value is there
        let item = response
            .items
            .get(position)
            .and_then(|wrapper| wrapper.values().next())
            .map(|inner| serde_json::from_value::<BulkItemResult>(inner.clone()));

        match item {
            Some(Ok(result)) => match describe_item_error(&result) {
                None => report.success_count += 1,
                Some(detail) => report.failures.push(FailedItem::new(&action.item_id, detail)),
            },
            Some(Err(e)) => report.failures.push(FailedItem::new(
                &action.item_id,
                format!("unreadable bulk item: {e}"),
            )),
            None => report.failures.push(FailedItem::new(
                &action.item_id,
                "missing from bulk response",
            )),
        }
    }
    Ok(report)
}

fn describe_item_error(result: &BulkItemResult) -> Option<String> {
    match &result.error {
        Some(error) => Some(format_es_error(error)),
        None if !(200..300).contains(&result.status) => Some(format!("status {}", result.status)),
        None => None,
    }
}

/// 🧾 `{"type": "x", "reason": "y"}` becomes `"x: y"`. Anything weirder is passed through raw.
pub(crate) fn format_es_error(error: &Value) -> String {
    let kind = error.get("type").and_then(Value::as_str);
    let reason = error.get("reason").and_then(Value::as_str);
    match (kind, reason) {
        (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
        (Some(kind), None) => kind.to_string(),
        (None, Some(reason)) => reason.to_string(),
        (None, None) => match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

// ===== aggregations =====

pub(crate) fn stats_query(field: &str) -> Value {
    json!({
        "size": 0,
        "aggs": { STATS_AGG: { "stats": { "field": field } } }
    })
}

#[derive(Debug, Deserialize)]
struct StatsAgg {
    #[serde(default)]
    count: u64,
    min: Option<f64>,
    max: Option<f64>,
    avg: Option<f64>,
}

pub(crate) fn parse_stats(body: &Value) -> Result<FieldStats> {
    let agg = body
        .pointer(&format!("/aggregations/{STATS_AGG}"))
        .context("💀 The search response had no stats aggregation. We asked for numbers and got vibes.")?;
    let stats: StatsAgg = serde_json::from_value(agg.clone())?;
    Ok(FieldStats {
        count: stats.count,
        min: stats.min,
        max: stats.max,
        avg: stats.avg,
    })
}

pub(crate) fn range_query(field: &str, ranges: &[RangeSpec], avg_field: Option<&str>) -> Value {
    let ranges: Vec<Value> = ranges
        .iter()
        .map(|r| {
            let mut spec = json!({ "key": r.key });
            if let Some(from) = r.from {
                spec["from"] = json!(from);
            }
            if let Some(to) = r.to {
                spec["to"] = json!(to);
            }
            spec
        })
        .collect();

    let mut agg = json!({ "range": { "field": field, "ranges": ranges } });
    if let Some(avg_field) = avg_field {
        agg["aggs"] = json!({ AVG_AGG: { "avg": { "field": avg_field } } });
    }
    json!({ "size": 0, "aggs": { RANGE_AGG: agg } })
}

#[derive(Debug, Deserialize)]
struct RawRangeBucket {
    key: String,
    #[serde(default)]
    doc_count: u64,
    #[serde(default, rename = "avg_value")]
    avg: Option<ValueAgg>,
}

#[derive(Debug, Deserialize)]
struct ValueAgg {
    value: Option<f64>,
}

/// 🪣 Buckets come back in whatever order the cluster likes; we hand them back in `ranges` order.
pub(crate) fn parse_range_buckets(body: &Value, ranges: &[RangeSpec]) -> Result<Vec<RangeBucket>> {
    let raw = body
        .pointer(&format!("/aggregations/{RANGE_AGG}/buckets"))
        .context("💀 The search response had no range buckets. The buckets have kicked themselves.")?;
    let raw: Vec<RawRangeBucket> = serde_json::from_value(raw.clone())?;

    Ok(ranges
        .iter()
        .map(|spec| {
            let found = raw.iter().find(|b| b.key == spec.key);
            RangeBucket {
                key: spec.key.clone(),
                doc_count: found.map_or(0, |b| b.doc_count),
                avg: found.and_then(|b| b.avg.as_ref()).and_then(|a| a.value),
            }
        })
        .collect())
}

// ===== sorted search =====

pub(crate) fn ranked_query(field: &str, order: SortOrder, limit: usize, source_fields: &[&str]) -> Value {
    let mut query = json!({
        "size": limit,
        "sort": [ { field: { "order": order.as_str() } } ]
    });
    if !source_fields.is_empty() {
        query["_source"] = json!(source_fields);
    }
    query
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Value,
}

pub(crate) fn parse_ranked(body: &Value) -> Result<Vec<RankedDocument>> {
    let hits = body
        .pointer("/hits/hits")
        .context("💀 The search response had no hits array. Not even an empty one. Bold.")?;
    let hits: Vec<SearchHit> = serde_json::from_value(hits.clone())?;
    Ok(hits
        .into_iter()
        .map(|hit| RankedDocument {
            id: hit.id,
            source: hit.source,
        })
        .collect())
}

// ===== cluster root =====

#[derive(Debug, Deserialize)]
struct RootResponse {
    #[serde(default)]
    cluster_name: String,
    version: Option<RootVersion>,
}

#[derive(Debug, Deserialize)]
struct RootVersion {
    number: String,
}

pub(crate) fn parse_health(body: &str) -> Result<ClusterHealth> {
    let root: RootResponse = serde_json::from_str(body)
        .context("💀 The cluster root answered, but not in any JSON we recognize. Is this even Elasticsearch?")?;
    Ok(ClusterHealth {
        cluster_name: root.cluster_name,
        version: root.version.map(|v| v.number).unwrap_or_default(),
    })
}
