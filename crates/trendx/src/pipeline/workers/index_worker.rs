//! 🎬 *[a channel fills with chunks. somewhere, a cluster waits.]*
//! *[the clock on the wall reads 4:03am.]*
//!
//! 🗑️ The IndexWorker: patient, tireless, and deeply unbothered by the chaos upstream.
//! It receives a chunk. It sends a `_bulk`. It reports back. It asks no questions.
//!
//! A chunk that blows up as a whole (timeout, connection reset, 5xx) is NOT a worker
//! failure: every document in it is reported failed with the error as its detail, and
//! the worker moves on to the next chunk. No retries. Tomorrow's run will try again.
//!
//! A report that doesn't add up to the chunk is reconciled before it leaves the worker:
//! documents the index never mentioned are failed with `not reported by index`, so the
//! pipeline's `updated + failed == total` holds no matter what the adapter says.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ChunkOutcome, Worker};
use crate::backends::SearchIndex;
use crate::bulk::UpsertAction;
use crate::common::{BulkReport, FailedItem};

pub(crate) const NOT_REPORTED: &str = "not reported by index";

/// ⚖️ Make `report` account for every document of `chunk`, exactly once.
///
/// Failures naming documents outside the chunk are dropped. Documents neither failed nor
/// covered by `success_count` (counted in chunk order) become failures.
pub(crate) fn reconcile(chunk: &[UpsertAction], mut report: BulkReport) -> BulkReport {
    if report.success_count + report.failures.len() == chunk.len()
        && report.failures.iter().all(|f| chunk.iter().any(|a| a.item_id == f.item_id))
    {
        return report;
    }

    let mut in_chunk: HashMap<&str, usize> = HashMap::new();
    for action in chunk {
        *in_chunk.entry(action.item_id.as_str()).or_default() += 1;
    }
    report.failures.retain(|f| match in_chunk.get_mut(f.item_id.as_str()) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    });

    let mut listed: HashMap<&str, usize> = HashMap::new();
    for failed in &report.failures {
        *listed.entry(failed.item_id.as_str()).or_default() += 1;
    }
    let unlisted: Vec<&str> = chunk
        .iter()
        .filter_map(|action| match listed.get_mut(action.item_id.as_str()) {
            Some(n) if *n > 0 => {
                *n -= 1;
                None
            }
            _ => Some(action.item_id.as_str()),
        })
        .collect();

    let successes = report.success_count.min(unlisted.len());
    let mut failures = report.failures;
    failures.extend(unlisted[successes..].iter().map(|id| FailedItem::new(*id, NOT_REPORTED)));
    BulkReport {
        success_count: successes,
        failures,
    }
}

/// 🗑️ Drains chunks, writes them, reports outcomes.
#[derive(Debug)]
pub(crate) struct IndexWorker<I> {
    worker_id: usize,
    rx: Receiver<(usize, Vec<UpsertAction>)>,
    tx: Sender<ChunkOutcome>,
    index: Arc<I>,
    index_name: String,
}

impl<I: SearchIndex + 'static> IndexWorker<I> {
    pub(crate) fn new(
        worker_id: usize,
        rx: Receiver<(usize, Vec<UpsertAction>)>,
        tx: Sender<ChunkOutcome>,
        index: Arc<I>,
        index_name: String,
    ) -> Self {
        Self {
            worker_id,
            rx,
            tx,
            index,
            index_name,
        }
    }

    /// ✍️ One chunk in, one fully accounted report out. Never fails.
    async fn write_chunk(&self, chunk_no: usize, chunk: &[UpsertAction]) -> BulkReport {
        match self.index.bulk_upsert(&self.index_name, chunk).await {
            Ok(report) => {
                let claimed = report.success_count + report.failures.len();
                let reconciled = reconcile(chunk, report);
                if claimed != chunk.len() {
                    warn!(
                        "⚠️ IndexWorker {}: chunk {chunk_no} has {} docs but the index accounted for {claimed}; {} marked '{NOT_REPORTED}'",
                        self.worker_id,
                        chunk.len(),
                        reconciled.failures.len()
                    );
                }
                reconciled
            }
            Err(e) => {
                let detail = format!("{e:#}");
                warn!(
                    "💀 IndexWorker {}: chunk {chunk_no} ({} docs) failed as a whole: {detail}",
                    self.worker_id,
                    chunk.len()
                );
                BulkReport {
                    success_count: 0,
                    failures: chunk
                        .iter()
                        .map(|action| FailedItem::new(&action.item_id, &detail))
                        .collect(),
                }
            }
        }
    }
}

impl<I: SearchIndex + 'static> Worker for IndexWorker<I> {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("📥 IndexWorker {} started draining chunks", self.worker_id);
            while let Ok((chunk_no, chunk)) = self.rx.recv().await {
                let report = self.write_chunk(chunk_no, &chunk).await;
                debug!(
                    "🪣 IndexWorker {}: chunk {chunk_no} done, {} updated, {} failed",
                    self.worker_id,
                    report.success_count,
                    report.failures.len()
                );
                self.tx
                    .send(ChunkOutcome { chunk_no, report })
                    .await
                    .context("💀 IndexWorker could not report a chunk outcome. Nobody is listening anymore.")?;
            }
            debug!("🏁 IndexWorker {}: channel closed. Shutting down.", self.worker_id);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryIndex;

    fn action(id: &str) -> UpsertAction {
        UpsertAction {
            item_id: id.to_string(),
            trending_score: 50.0,
            views_count: None,
        }
    }

    fn chunk(ids: &[&str]) -> Vec<UpsertAction> {
        ids.iter().map(|id| action(id)).collect()
    }

    #[test]
    fn the_one_where_an_honest_report_is_left_alone() {
        let report = BulkReport {
            success_count: 2,
            failures: vec![FailedItem::new("B", "version_conflict_engine_exception: nope")],
        };
        assert_eq!(reconcile(&chunk(&["A", "B", "C"]), report.clone()), report);
    }

    #[test]
    fn the_one_where_silence_counts_as_failure() {
        let report = BulkReport {
            success_count: 1,
            failures: vec![FailedItem::new("C", "mapper_parsing_exception: nope")],
        };
        let reconciled = reconcile(&chunk(&["A", "B", "C", "D"]), report);
        assert_eq!(reconciled.success_count, 1);
        let failed: Vec<(&str, &str)> = reconciled
            .failures
            .iter()
            .map(|f| (f.item_id.as_str(), f.error.as_str()))
            .collect();
        assert_eq!(
            failed,
            vec![
                ("C", "mapper_parsing_exception: nope"),
                ("B", NOT_REPORTED),
                ("D", NOT_REPORTED),
            ]
        );
    }

    #[test]
    fn the_one_where_the_index_brags_about_documents_it_never_got() {
        let report = BulkReport {
            success_count: 5,
            failures: vec![FailedItem::new("Z", "who is Z"), FailedItem::new("A", "nope")],
        };
        let reconciled = reconcile(&chunk(&["A", "B"]), report);
        assert_eq!(reconciled.success_count, 1);
        assert_eq!(reconciled.failures, vec![FailedItem::new("A", "nope")]);
    }

    #[tokio::test]
    async fn the_one_where_a_dead_chunk_still_gets_a_report() -> Result<()> {
        let index = Arc::new(InMemoryIndex::accepting_new_documents());
        index.fail_chunks_containing("B", "request timed out").await;

        let (chunk_tx, chunk_rx) = async_channel::bounded(2);
        let (outcome_tx, outcome_rx) = async_channel::unbounded();
        let handle = IndexWorker::new(0, chunk_rx, outcome_tx, Arc::clone(&index), "skus".into()).start();

        chunk_tx.send((0, vec![action("A")])).await?;
        chunk_tx.send((1, vec![action("B"), action("C")])).await?;
        drop(chunk_tx);
        handle.await??;

        let first = outcome_rx.recv().await?;
        assert_eq!((first.chunk_no, first.report.success_count), (0, 1));
        let second = outcome_rx.recv().await?;
        assert_eq!(second.chunk_no, 1);
        assert_eq!(second.report.success_count, 0);
        assert_eq!(second.report.failures.len(), 2);
        assert!(second.report.failures[1].error.contains("request timed out"));
        Ok(())
    }
}
