//! 🔭 Reporting: read-only questions about what the index looks like after a run.
//!
//! "Did the rerank work?" is a question people ask at 9am with coffee in hand. This module
//! answers it: score and view statistics, bucketed distributions, a summary, the top and
//! bottom of the ranking, a single item next to its warehouse numbers, and cluster health.
//!
//! 🧠 Knowledge graph:
//! - Never writes. Never called by the pipeline. Only `SearchIndex` reads + `MetricsSource::lookup_item`.
//! - Percentages are relative to the number of documents that HAVE the bucketed field,
//!   rounded to 2 decimals. An empty index is all zeros, not a division by zero.
//! - The top score bucket has no upper edge, so a perfect score lands in it whatever
//!   `max_score` the run used (every other range is half-open).

use anyhow::Result;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::backends::{MetricsSource, SearchIndex};
use crate::common::{
    ClusterHealth, FieldStats, MetricRecord, RangeBucket, RangeSpec, SortOrder, round2,
    serialize_round2,
};
use crate::progress::format_number;
use crate::scoring::{FormulaParameters, coerce_view_count};

pub const SCORE_FIELD: &str = "trending_score";
pub const VIEWS_FIELD: &str = "views_count";

/// 🏆 top/bottom listing size when nobody says otherwise
pub const DEFAULT_RANK_LIMIT: usize = 20;
/// 🧱 and the most anybody gets, whatever they say
pub const MAX_RANK_LIMIT: usize = 100;

const LISTING_FIELDS: [&str; 6] = ["sk", "name", SCORE_FIELD, VIEWS_FIELD, "price", "category"];

/// 🪣 View-count buckets, from "nobody" to "everybody".
pub fn view_ranges() -> Vec<RangeSpec> {
    let edges = [0.0, 100.0, 200.0, 500.0, 1_000.0, 2_000.0, 5_000.0, 10_000.0];
    let mut ranges: Vec<RangeSpec> = edges
        .windows(2)
        .map(|w| RangeSpec::new(format!("{}-{}", w[0], w[1]), Some(w[0]), Some(w[1])))
        .collect();
    ranges.push(RangeSpec::new("10000+", Some(10_000.0), None));
    ranges
}

/// 🪣 Fine-grained score buckets.
pub fn score_ranges() -> Vec<RangeSpec> {
    vec![
        RangeSpec::new("0-10 (Very Low)", Some(0.0), Some(10.0)),
        RangeSpec::new("10-25 (Low)", Some(10.0), Some(25.0)),
        RangeSpec::new("25-50 (Medium-Low)", Some(25.0), Some(50.0)),
        RangeSpec::new("50-75 (Medium-High)", Some(50.0), Some(75.0)),
        RangeSpec::new("75-90 (High)", Some(75.0), Some(90.0)),
        RangeSpec::new("90-100 (Very High)", Some(90.0), None),
    ]
}

/// 🪣 Coarse score buckets for the summary.
pub fn summary_score_ranges() -> Vec<RangeSpec> {
    vec![
        RangeSpec::new("0-25 (Low)", Some(0.0), Some(25.0)),
        RangeSpec::new("25-50 (Medium-Low)", Some(25.0), Some(50.0)),
        RangeSpec::new("50-75 (Medium-High)", Some(50.0), Some(75.0)),
        RangeSpec::new("75-100 (High)", Some(75.0), None),
    ]
}

/// 📊 min/max/avg, rounded, with 0 standing in for "no data".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSummary {
    #[serde(serialize_with = "serialize_round2")]
    pub min: f64,
    #[serde(serialize_with = "serialize_round2")]
    pub max: f64,
    #[serde(serialize_with = "serialize_round2")]
    pub avg: f64,
}

impl From<&FieldStats> for FieldSummary {
    fn from(stats: &FieldStats) -> Self {
        Self {
            min: stats.min.unwrap_or_default(),
            max: stats.max.unwrap_or_default(),
            avg: stats.avg.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub index: String,
    pub total_products: u64,
    pub trending_score: FieldSummary,
    pub views_count: FieldSummary,
}

/// 🪣 One bucket, ready for humans.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionRow {
    pub range: String,
    pub count: u64,
    pub percentage: f64,
    /// average of the *other* field inside this bucket, if it was asked for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    pub index: String,
    pub field: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_of: Option<&'static str>,
    pub total_products: u64,
    pub distribution: Vec<DistributionRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub index: String,
    pub total_products: u64,
    pub trending_score: FieldSummary,
    pub by_views: Vec<DistributionRow>,
    pub by_score: Vec<DistributionRow>,
}

/// 🛍️ One product in a top/bottom listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductListing {
    pub sku: String,
    pub name: Option<Value>,
    #[serde(serialize_with = "serialize_round2")]
    pub trending_score: f64,
    pub views: u64,
    pub price: Option<Value>,
    pub category: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedProducts {
    pub index: String,
    pub order: &'static str,
    pub count: usize,
    pub products: Vec<ProductListing>,
}

/// 🔎 One item, as the index sees it and as the warehouse sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemDetails {
    pub index: String,
    pub item_id: String,
    pub document: Option<Value>,
    pub metrics: Option<MetricRecord>,
    /// what the next run would write, given the warehouse numbers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recomputed_score: Option<f64>,
}

fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(count as f64 / total as f64 * 100.0)
    }
}

fn rows(buckets: Vec<RangeBucket>, total: u64) -> Vec<DistributionRow> {
    buckets
        .into_iter()
        .map(|b| DistributionRow {
            percentage: percentage(b.doc_count, total),
            range: b.key,
            count: b.doc_count,
            average: b.avg.map(round2),
        })
        .collect()
}

/// 🔭 Read-only window onto one index.
#[derive(Debug)]
pub struct IndexReporter<'a, I> {
    index: &'a I,
    index_name: String,
}

impl<'a, I: SearchIndex> IndexReporter<'a, I> {
    pub fn new(index: &'a I, index_name: impl Into<String>) -> Self {
        Self {
            index,
            index_name: index_name.into(),
        }
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let scores = self.index.field_stats(&self.index_name, SCORE_FIELD).await?;
        let views = self.index.field_stats(&self.index_name, VIEWS_FIELD).await?;
        Ok(IndexStats {
            index: self.index_name.clone(),
            total_products: scores.count,
            trending_score: FieldSummary::from(&scores),
            views_count: FieldSummary::from(&views),
        })
    }

    async fn distribution(
        &self,
        field: &'static str,
        ranges: &[RangeSpec],
        average_of: Option<&'static str>,
    ) -> Result<Distribution> {
        let total = self.index.field_stats(&self.index_name, field).await?.count;
        let buckets = self
            .index
            .range_buckets(&self.index_name, field, ranges, average_of)
            .await?;
        debug!("🪣 {} buckets over {field} for {total} docs", buckets.len());
        Ok(Distribution {
            index: self.index_name.clone(),
            field,
            average_of,
            total_products: total,
            distribution: rows(buckets, total),
        })
    }

    /// 🪣 By view count, with the average trending score per bucket.
    pub async fn view_distribution(&self) -> Result<Distribution> {
        self.distribution(VIEWS_FIELD, &view_ranges(), Some(SCORE_FIELD))
            .await
    }

    /// 🪣 By trending score, with the average view count per bucket.
    pub async fn score_distribution(&self) -> Result<Distribution> {
        let mut distribution = self
            .distribution(SCORE_FIELD, &score_ranges(), Some(VIEWS_FIELD))
            .await?;
        // -- average views are whole views
        for row in &mut distribution.distribution {
            row.average = row.average.map(f64::trunc);
        }
        Ok(distribution)
    }

    pub async fn summary(&self) -> Result<Summary> {
        let scores = self.index.field_stats(&self.index_name, SCORE_FIELD).await?;
        let total = scores.count;
        let by_views = self
            .index
            .range_buckets(&self.index_name, VIEWS_FIELD, &view_ranges(), Some(SCORE_FIELD))
            .await?;
        let by_score = self
            .index
            .range_buckets(&self.index_name, SCORE_FIELD, &summary_score_ranges(), None)
            .await?;
        Ok(Summary {
            index: self.index_name.clone(),
            total_products: total,
            trending_score: FieldSummary::from(&scores),
            by_views: rows(by_views, total),
            by_score: rows(by_score, total),
        })
    }

    /// 🏆 Highest scores first. `limit` defaults to 20 and is capped at 100.
    pub async fn top(&self, limit: Option<usize>) -> Result<RankedProducts> {
        self.ranked(SortOrder::Desc, limit).await
    }

    /// 🐢 Lowest scores first. Same limits.
    pub async fn bottom(&self, limit: Option<usize>) -> Result<RankedProducts> {
        self.ranked(SortOrder::Asc, limit).await
    }

    async fn ranked(&self, order: SortOrder, limit: Option<usize>) -> Result<RankedProducts> {
        let limit = limit.unwrap_or(DEFAULT_RANK_LIMIT).min(MAX_RANK_LIMIT);
        let docs = self
            .index
            .ranked(&self.index_name, SCORE_FIELD, order, limit, &LISTING_FIELDS)
            .await?;
        let products: Vec<ProductListing> = docs
            .into_iter()
            .map(|doc| {
                let field = |name: &str| doc.source.get(name).filter(|v| !v.is_null()).cloned();
                let sku = match doc.source.get("sk") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => doc.id.clone(),
                };
                ProductListing {
                    sku,
                    name: field("name"),
                    trending_score: doc
                        .source
                        .get(SCORE_FIELD)
                        .and_then(Value::as_f64)
                        .unwrap_or_default(),
                    views: doc.source.get(VIEWS_FIELD).map_or(0, coerce_view_count),
                    price: field("price"),
                    category: field("category"),
                }
            })
            .collect();
        Ok(RankedProducts {
            index: self.index_name.clone(),
            order: order.as_str(),
            count: products.len(),
            products,
        })
    }

    /// 🔎 The index document plus, if a source is given, the warehouse row and the score
    /// the next run would write for it.
    pub async fn item<S: MetricsSource + ?Sized>(
        &self,
        item_id: &str,
        source: Option<&S>,
        params: &FormulaParameters,
    ) -> Result<ItemDetails> {
        let document = self.index.get_document(&self.index_name, item_id).await?;
        let metrics = match source {
            Some(source) => source.lookup_item(item_id).await?,
            None => None,
        };
        let recomputed_score = metrics.as_ref().map(|m| round2(params.score(m.view_count)));
        Ok(ItemDetails {
            index: self.index_name.clone(),
            item_id: item_id.to_string(),
            document,
            metrics,
            recomputed_score,
        })
    }

    pub async fn health(&self) -> Result<ClusterHealth> {
        self.index.health().await
    }
}

// ===== terminal rendering =====

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(header);
    table
}

fn right(text: impl Into<String>) -> Cell {
    Cell::new(text.into()).set_alignment(CellAlignment::Right)
}

fn value_text(value: &Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "-".to_string(),
    }
}

impl IndexStats {
    pub fn render(&self) -> String {
        let mut t = table(vec!["", "min", "max", "avg"]);
        for (name, s) in [(SCORE_FIELD, &self.trending_score), (VIEWS_FIELD, &self.views_count)] {
            t.add_row(vec![
                Cell::new(name),
                right(format!("{:.2}", s.min)),
                right(format!("{:.2}", s.max)),
                right(format!("{:.2}", s.avg)),
            ]);
        }
        format!(
            "index: {}   products: {}\n{t}",
            self.index,
            format_number(self.total_products)
        )
    }
}

fn render_rows(rows: &[DistributionRow], average_header: Option<&str>) -> Table {
    let mut header = vec!["range", "count", "%"];
    if let Some(h) = average_header {
        header.push(h);
    }
    let mut t = table(header);
    for row in rows {
        let mut cells = vec![
            Cell::new(&row.range),
            right(format_number(row.count)),
            right(format!("{:.2}", row.percentage)),
        ];
        if average_header.is_some() {
            cells.push(right(row.average.map_or("-".to_string(), |a| format!("{a:.2}"))));
        }
        t.add_row(cells);
    }
    t
}

impl Distribution {
    pub fn render(&self) -> String {
        let average_header = self.average_of.map(|f| format!("avg {f}"));
        format!(
            "index: {}   {} by {}\n{}",
            self.index,
            format_number(self.total_products),
            self.field,
            render_rows(&self.distribution, average_header.as_deref())
        )
    }
}

impl Summary {
    pub fn render(&self) -> String {
        format!(
            "index: {}   products: {}   score min/max/avg: {:.2} / {:.2} / {:.2}\n\n👀 by views\n{}\n\n📉 by score\n{}",
            self.index,
            format_number(self.total_products),
            self.trending_score.min,
            self.trending_score.max,
            self.trending_score.avg,
            render_rows(&self.by_views, Some("avg trending_score")),
            render_rows(&self.by_score, None)
        )
    }
}

impl RankedProducts {
    pub fn render(&self) -> String {
        let mut t = table(vec!["sku", "name", "trending_score", "views", "price", "category"]);
        for p in &self.products {
            t.add_row(vec![
                Cell::new(&p.sku),
                Cell::new(value_text(&p.name)),
                right(format!("{:.2}", p.trending_score)),
                right(format_number(p.views)),
                right(value_text(&p.price)),
                Cell::new(value_text(&p.category)),
            ]);
        }
        format!("index: {}   {} products ({})\n{t}", self.index, self.count, self.order)
    }
}

impl ItemDetails {
    pub fn render(&self) -> String {
        let mut out = format!("index: {}   item: {}\n", self.index, self.item_id);
        match &self.document {
            Some(doc) => out.push_str(&format!(
                "📄 document: {}\n",
                serde_json::to_string_pretty(doc).unwrap_or_else(|_| doc.to_string())
            )),
            None => out.push_str("📄 document: not in the index\n"),
        }
        match &self.metrics {
            Some(m) => out.push_str(&format!("🏭 warehouse views: {}\n", format_number(m.view_count))),
            None => out.push_str("🏭 warehouse: no row\n"),
        }
        if let Some(score) = self.recomputed_score {
            out.push_str(&format!("🎯 next run would write: {score:.2}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryIndex, InMemorySource};
    use serde_json::json;

    async fn seeded() -> InMemoryIndex {
        let index = InMemoryIndex::accepting_new_documents();
        index
            .seed([
                ("A".to_string(), json!({"sk": "A", "name": "Lamp", "trending_score": 100.0, "views_count": 0, "price": 19.99})),
                ("B".to_string(), json!({"sk": "B", "name": "Rug", "trending_score": 50.0, "views_count": 99})),
                ("C".to_string(), json!({"sk": "C", "name": "Sofa", "trending_score": 0.0, "views_count": 9_999})),
                ("D".to_string(), json!({"sk": "D", "name": "Mug", "trending_score": 24.99, "views_count": 1_000})),
            ])
            .await;
        index
    }

    #[test]
    fn the_one_where_the_view_buckets_cover_everything() {
        let keys: Vec<String> = view_ranges().into_iter().map(|r| r.key).collect();
        assert_eq!(
            keys,
            vec!["0-100", "100-200", "200-500", "500-1000", "1000-2000", "2000-5000", "5000-10000", "10000+"]
        );
    }

    #[tokio::test]
    async fn the_one_where_a_perfect_score_lands_in_the_top_bucket() -> Result<()> {
        let index = seeded().await;
        let reporter = IndexReporter::new(&index, "skus");
        let dist = reporter.score_distribution().await?;
        assert_eq!(dist.total_products, 4);
        let top = dist.distribution.last().expect("six buckets");
        assert_eq!(top.range, "90-100 (Very High)");
        assert_eq!(top.count, 1);
        assert_eq!(top.percentage, 25.0);
        assert_eq!(top.average, Some(0.0));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_generous_max_score_still_has_a_bucket() -> Result<()> {
        let index = InMemoryIndex::accepting_new_documents();
        index
            .seed([
                ("A".to_string(), json!({"trending_score": 150.0, "views_count": 0})),
                ("B".to_string(), json!({"trending_score": 101.0, "views_count": 3})),
            ])
            .await;
        let reporter = IndexReporter::new(&index, "skus");

        let fine = reporter.score_distribution().await?;
        let counted: u64 = fine.distribution.iter().map(|r| r.count).sum();
        assert_eq!(counted, 2);
        assert_eq!(fine.distribution.last().map(|r| r.count), Some(2));

        let summary = reporter.summary().await?;
        assert_eq!(summary.by_score.last().map(|r| (r.count, r.percentage)), Some((2, 100.0)));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_view_buckets_carry_the_average_score() -> Result<()> {
        let index = seeded().await;
        let dist = IndexReporter::new(&index, "skus").view_distribution().await?;
        let first = &dist.distribution[0];
        assert_eq!((first.range.as_str(), first.count), ("0-100", 2));
        assert_eq!(first.percentage, 50.0);
        assert_eq!(first.average, Some(75.0));
        assert!(dist.render().contains("avg trending_score"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_summary_uses_the_coarse_buckets() -> Result<()> {
        let index = seeded().await;
        let summary = IndexReporter::new(&index, "skus").summary().await?;
        let counts: Vec<u64> = summary.by_score.iter().map(|r| r.count).collect();
        assert_eq!(counts, vec![2, 0, 1, 1]);
        assert_eq!(summary.trending_score.max, 100.0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_top_is_capped_and_bottom_is_ascending() -> Result<()> {
        let index = seeded().await;
        let reporter = IndexReporter::new(&index, "skus");
        let top = reporter.top(Some(1_000)).await?;
        assert_eq!(top.count, 4);
        assert_eq!(top.products[0].sku, "A");
        assert_eq!(top.products[0].price, Some(json!(19.99)));
        assert_eq!(top.products[0].category, None);

        let bottom = reporter.bottom(Some(2)).await?;
        let skus: Vec<&str> = bottom.products.iter().map(|p| p.sku.as_str()).collect();
        assert_eq!(skus, vec!["C", "D"]);
        assert_eq!(bottom.products[0].views, 9_999);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_item_meets_its_warehouse_twin() -> Result<()> {
        let index = seeded().await;
        let source = InMemorySource::new(vec![MetricRecord::new("B", 9)]);
        let details = IndexReporter::new(&index, "skus")
            .item("B", Some(&source), &FormulaParameters::default())
            .await?;
        assert_eq!(details.document.as_ref().map(|d| d["name"].clone()), Some(json!("Rug")));
        assert_eq!(details.metrics, Some(MetricRecord::new("B", 9)));
        assert_eq!(details.recomputed_score, Some(75.0));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_index_is_empty_and_nobody_divides_by_zero() -> Result<()> {
        let index = InMemoryIndex::accepting_new_documents();
        let reporter = IndexReporter::new(&index, "skus");
        let dist = reporter.view_distribution().await?;
        assert!(dist.distribution.iter().all(|r| r.percentage == 0.0 && r.count == 0));
        let stats = reporter.stats().await?;
        assert_eq!(stats.total_products, 0);
        assert_eq!(stats.trending_score.avg, 0.0);
        Ok(())
    }
}
