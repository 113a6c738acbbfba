// ai
//! 📦 Bulk actions: turning scores into per-document update instructions, then into chunks.
//!
//! 🧠 Knowledge graph:
//! - `upsert_actions` is a lazy, restartable producer: call it again on the same slice and you
//!   get the same sequence. The pipeline leans on that to recover chunks a crashed worker lost.
//! - `chunked` slices any iterator into `Vec`s of at most `size`. It bounds request size and
//!   peak memory, and gives the progress bar something to count.
//! - Wire format (NDJSON, `_bulk`) is NOT here. That's the Elasticsearch backend's business.
//!   This module is format-agnostic, like a good intermediate representation should be.
//!
//! 🦆 Chunk size 500: chosen by the ancients, never questioned since.

use serde::Serialize;

use crate::common::ScoreResult;

/// 🔢 How many documents ride in one bulk request unless told otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// ✍️ One document's update: keyed by `item_id`, touching only the trending fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertAction {
    pub item_id: String,
    pub trending_score: f64,
    /// Only written when the run asked for `include_views_count`.
    pub views_count: Option<u64>,
}

impl UpsertAction {
    /// 📝 The partial document this action writes. Exactly these fields, nothing else.
    pub fn doc(&self) -> serde_json::Value {
        let mut doc = serde_json::Map::new();
        doc.insert(
            "trending_score".to_string(),
            serde_json::json!(self.trending_score),
        );
        if let Some(views) = self.views_count {
            doc.insert("views_count".to_string(), serde_json::json!(views));
        }
        serde_json::Value::Object(doc)
    }
}

/// 🔄 Lazy producer of `UpsertAction`s over a borrowed result set.
#[derive(Debug, Clone)]
pub struct UpsertActions<'a> {
    results: std::slice::Iter<'a, ScoreResult>,
    include_views_count: bool,
}

/// 🚀 Start producing actions for `results`, in fetch order.
pub fn upsert_actions(results: &[ScoreResult], include_views_count: bool) -> UpsertActions<'_> {
    UpsertActions {
        results: results.iter(),
        include_views_count,
    }
}

impl Iterator for UpsertActions<'_> {
    type Item = UpsertAction;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.results.next()?;
        Some(UpsertAction {
            item_id: result.item_id.clone(),
            trending_score: result.trending_score,
            views_count: self.include_views_count.then_some(result.view_count),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.results.size_hint()
    }
}

impl ExactSizeIterator for UpsertActions<'_> {}

/// 🧱 Fixed-size chunker. The last chunk may be short; no chunk is ever empty.
#[derive(Debug, Clone)]
pub struct Chunked<I> {
    inner: I,
    size: usize,
}

/// ✂️ Wrap an iterator so it yields `Vec`s of up to `size` items. A `size` of 0 is treated as 1.
pub fn chunked<I: Iterator>(inner: I, size: usize) -> Chunked<I> {
    Chunked {
        inner,
        size: size.max(1),
    }
}

impl<I: Iterator> Iterator for Chunked<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk: Vec<I::Item> = self.inner.by_ref().take(self.size).collect();
        if chunk.is_empty() { None } else { Some(chunk) }
    }
}

/// 🔢 How many chunks `total` items make at `size` per chunk.
pub fn chunk_count(total: usize, size: usize) -> usize {
    total.div_ceil(size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(n: usize) -> Vec<ScoreResult> {
        (0..n)
            .map(|i| ScoreResult {
                item_id: format!("SKU-{i}"),
                view_count: i as u64 * 10,
                trending_score: 100.0 - i as f64,
            })
            .collect()
    }

    #[test]
    fn the_one_where_every_result_becomes_exactly_one_action() {
        let results = results(7);
        let actions: Vec<UpsertAction> = upsert_actions(&results, false).collect();
        assert_eq!(actions.len(), 7);
        assert_eq!(actions[3].item_id, "SKU-3");
        assert_eq!(actions[3].trending_score, 97.0);
        assert_eq!(actions[3].views_count, None);
    }

    #[test]
    fn the_one_where_views_count_tags_along_when_invited() {
        let results = results(2);
        let action = upsert_actions(&results, true).nth(1).unwrap();
        assert_eq!(action.views_count, Some(10));
        assert_eq!(
            action.doc(),
            serde_json::json!({"trending_score": 99.0, "views_count": 10})
        );
    }

    #[test]
    fn the_one_where_the_doc_only_carries_the_score_by_default() {
        let results = results(1);
        let action = upsert_actions(&results, false).next().unwrap();
        assert_eq!(action.doc(), serde_json::json!({"trending_score": 100.0}));
    }

    #[test]
    fn the_one_where_1201_items_make_three_chunks() {
        let results = results(1_201);
        let sizes: Vec<usize> = chunked(upsert_actions(&results, false), 500)
            .map(|c| c.len())
            .collect();
        assert_eq!(sizes, vec![500, 500, 201]);
        assert_eq!(chunk_count(1_201, 500), 3);
    }

    #[test]
    fn the_one_where_the_producer_can_be_restarted() {
        let results = results(5);
        let first: Vec<Vec<UpsertAction>> = chunked(upsert_actions(&results, true), 2).collect();
        let second: Vec<Vec<UpsertAction>> = chunked(upsert_actions(&results, true), 2).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn the_one_where_nothing_chunks_into_nothing() {
        let results: Vec<ScoreResult> = Vec::new();
        assert_eq!(chunked(upsert_actions(&results, false), 500).count(), 0);
        assert_eq!(chunk_count(0, 500), 0);
    }
}
