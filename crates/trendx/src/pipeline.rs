// ai
//! 🚂 The sync pipeline: fetch → transform → summarize → (preview | write).
//!
//! 🎬 COLD OPEN. INT. CRON CONTAINER, 4:00:00 AM
//!
//! The scheduler pokes us. We check the knobs. We ask the warehouse for every live item
//! exactly once. We run one line of math over all of them. We count things. Then, if and
//! only if somebody said `apply`, we carve the results into chunks and hand them to a pool
//! of index workers, and we keep score of every document that comes back bloodied.
//!
//! ```text
//!  Validating → Fetching → Transforming → Summarizing ─┬→ DryRunComplete
//!       │           │                                   └→ Writing → Applied
//!       └───────────┴──────────────→ Aborted
//! ```
//!
//! 🧠 Knowledge graph:
//! - Phases are strictly sequential: fetch finishes before transform, transform before any write.
//! - Writing: a producer feeds a bounded `async_channel` of `(chunk_no, chunk)`, N `IndexWorker`s
//!   drain it, and the pipeline collects one `ChunkOutcome` per chunk on a second channel.
//! - `updated + failed == total` always holds for an Applied run. Chunks nobody reported
//!   (a worker died) are regenerated from the restartable action producer and marked failed.
//! - No retries. No cancellation. No state kept between runs.
//!
//! 🦆

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::app_config::RunConfig;
use crate::backends::{MetricsSource, SearchIndex};
use crate::bulk::{DEFAULT_CHUNK_SIZE, chunk_count, chunked, upsert_actions};
use crate::common::{FailedItem, MetricRecord, RunMode, ScoreResult, SyncOutcome};
use crate::error::SyncError;
use crate::progress::ProgressMetrics;
use crate::report::RunReport;
use crate::scoring::FormulaParameters;
use crate::stats::{PREVIEW_SIZE, PreviewSamples, RunStatistics};

mod workers;
use workers::{ChunkOutcome, IndexWorker, Worker};

/// 🧵 Upper bound on concurrent index workers. Past this the cluster is the bottleneck anyway.
pub const MAX_INDEX_PARALLELISM: usize = 64;

/// 🚦 Where a run is. Used for logging; nothing is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Validating,
    Fetching,
    Transforming,
    Summarizing,
    Writing,
    DryRunComplete,
    Applied,
    Aborted,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunPhase::Validating => "validating",
            RunPhase::Fetching => "fetching",
            RunPhase::Transforming => "transforming",
            RunPhase::Summarizing => "summarizing",
            RunPhase::Writing => "writing",
            RunPhase::DryRunComplete => "dry_run_complete",
            RunPhase::Applied => "applied",
            RunPhase::Aborted => "aborted",
        })
    }
}

/// 🎛️ Everything one run needs to know. Built fresh per invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub params: FormulaParameters,
    pub mode: RunMode,
    pub index: String,
    pub chunk_size: usize,
    pub include_views_count: bool,
    pub index_parallelism: usize,
    pub show_progress: bool,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            params: FormulaParameters::default(),
            mode: RunMode::DryRun,
            index: crate::app_config::DEFAULT_INDEX.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            include_views_count: false,
            index_parallelism: 1,
            show_progress: false,
        }
    }
}

impl SyncRequest {
    /// 🏗️ From the config's run section. Fails on a mode nobody recognizes.
    pub fn from_run_config(run: &RunConfig) -> Result<Self, SyncError> {
        Ok(Self {
            params: FormulaParameters::new(run.max_score, run.decay_factor),
            mode: run.mode.parse()?,
            index: run.index.clone(),
            chunk_size: run.chunk_size,
            include_views_count: run.include_views_count,
            index_parallelism: run.index_parallelism,
            show_progress: run.show_progress,
        })
    }

    /// 🔒 Reject bad knobs before anybody talks to the warehouse.
    pub fn validate(&self) -> Result<(), SyncError> {
        self.params.validate()?;
        if self.chunk_size == 0 {
            return Err(SyncError::invalid("chunk_size must be at least 1"));
        }
        if self.index_parallelism == 0 {
            return Err(SyncError::invalid("index_parallelism must be at least 1"));
        }
        if self.index_parallelism > MAX_INDEX_PARALLELISM {
            return Err(SyncError::invalid(format!(
                "index_parallelism must be at most {MAX_INDEX_PARALLELISM}, got {}",
                self.index_parallelism
            )));
        }
        if self.index.trim().is_empty() {
            return Err(SyncError::invalid("index name must not be empty"));
        }
        Ok(())
    }
}

/// 📊 A scored batch and its summary, before anything is written.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredBatch {
    pub results: Vec<ScoreResult>,
    pub stats: RunStatistics,
    pub preview: PreviewSamples,
}

/// 🎯 Map every record to exactly one result, in fetch order. Cannot fail.
///
/// Duplicate item ids are kept (one result each) and logged; the index ends up with
/// whichever copy is written last.
pub fn transform(records: &[MetricRecord], params: &FormulaParameters) -> Vec<ScoreResult> {
    let mut seen = HashSet::with_capacity(records.len());
    let mut duplicates = 0usize;
    let results: Vec<ScoreResult> = records
        .iter()
        .map(|record| {
            if !seen.insert(record.item_id.as_str()) {
                duplicates += 1;
            }
            ScoreResult {
                item_id: record.item_id.clone(),
                view_count: record.view_count,
                trending_score: params.score(record.view_count),
            }
        })
        .collect();
    if duplicates > 0 {
        warn!("⚠️ {duplicates} duplicate item ids in this batch; each one is scored and written");
    }
    results
}

/// 🚂 The orchestrator. Adapters are injected once and reused for every run.
#[derive(Debug)]
pub struct SyncPipeline<S, I> {
    source: S,
    index: Arc<I>,
}

impl<S: MetricsSource, I: SearchIndex + 'static> SyncPipeline<S, I> {
    pub fn new(source: S, index: Arc<I>) -> Self {
        Self { source, index }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn index(&self) -> &Arc<I> {
        &self.index
    }

    /// 🏁 Run once and fold any fatal error into an `error` report.
    pub async fn run(&self, request: &SyncRequest) -> RunReport {
        match self.execute(request).await {
            Ok(report) => report,
            Err(err) => {
                error!(phase = %RunPhase::Aborted, "💀 Run aborted: {err}");
                RunReport::from_error(&request.index, request.params.describe(), &err)
            }
        }
    }

    /// 🚂 Run once. Fatal errors come back as `Err`; per-document failures ride inside the report.
    pub async fn execute(&self, request: &SyncRequest) -> Result<RunReport, SyncError> {
        let batch = self.score_all(request).await?;
        self.dispatch(request, batch).await
    }

    /// 🔀 Second half of a run: preview or write an already scored batch.
    pub async fn dispatch(&self, request: &SyncRequest, batch: ScoredBatch) -> Result<RunReport, SyncError> {
        let formula = request.params.describe();

        match request.mode {
            RunMode::DryRun => {
                info!(
                    phase = %RunPhase::DryRunComplete,
                    "👀 Dry run complete: {} items scored, nothing written",
                    batch.stats.total
                );
                Ok(RunReport::dry_run(&request.index, formula, batch.stats, batch.preview))
            }
            RunMode::Applied => {
                let outcome = self.write(request, &batch.results).await?;
                info!(
                    phase = %RunPhase::Applied,
                    "✅ Applied: {} updated, {} failed",
                    outcome.updated_count,
                    outcome.failed_count
                );
                Ok(RunReport::completed(
                    &request.index,
                    formula,
                    batch.stats,
                    batch.preview,
                    outcome,
                ))
            }
        }
    }

    /// 📊 Validate, fetch, transform, summarize. Everything but the write.
    pub async fn score_all(&self, request: &SyncRequest) -> Result<ScoredBatch, SyncError> {
        debug!(phase = %RunPhase::Validating, "🔒 Checking the knobs: {request:?}");
        request.validate()?;

        info!(phase = %RunPhase::Fetching, "📥 Asking the source for eligible items");
        let records = self.source.fetch_eligible_metrics().await?;
        if records.is_empty() {
            return Err(SyncError::NoRecords);
        }

        info!(
            phase = %RunPhase::Transforming,
            "📉 Scoring {} items with {}",
            records.len(),
            request.params.describe()
        );
        let results = transform(&records, &request.params);

        debug!(phase = %RunPhase::Summarizing, "📊 Summarizing {} results", results.len());
        let stats = RunStatistics::from_results(&results).ok_or(SyncError::NoRecords)?;
        let preview = PreviewSamples::from_results(&results, PREVIEW_SIZE);
        Ok(ScoredBatch {
            results,
            stats,
            preview,
        })
    }

    /// ✍️ Pre-flight the index, then fan chunks out to the workers and account for every doc.
    async fn write(&self, request: &SyncRequest, results: &[ScoreResult]) -> Result<SyncOutcome, SyncError> {
        self.index
            .prepare(&request.index)
            .await
            .map_err(|e| SyncError::IndexUnavailable {
                detail: format!("{e:#}"),
            })?;

        let total_chunks = chunk_count(results.len(), request.chunk_size);
        info!(
            phase = %RunPhase::Writing,
            "📡 Writing {} items to '{}' in {total_chunks} chunks of up to {} with {} workers",
            results.len(),
            request.index,
            request.chunk_size,
            request.index_parallelism
        );

        let (chunk_tx, chunk_rx) = async_channel::bounded(request.index_parallelism.saturating_mul(2));
        let (outcome_tx, outcome_rx) = async_channel::unbounded::<ChunkOutcome>();
        let handles: Vec<_> = (0..request.index_parallelism)
            .map(|worker_id| {
                IndexWorker::new(
                    worker_id,
                    chunk_rx.clone(),
                    outcome_tx.clone(),
                    Arc::clone(&self.index),
                    request.index.clone(),
                )
                .start()
            })
            .collect();
        // -- only the workers hold these now, so the channels close when the workers are gone
        drop(chunk_rx);
        drop(outcome_tx);

        let include_views_count = request.include_views_count;
        let chunk_size = request.chunk_size;
        let producer = async move {
            for (chunk_no, chunk) in chunked(upsert_actions(results, include_views_count), chunk_size).enumerate() {
                if chunk_tx.send((chunk_no, chunk)).await.is_err() {
                    warn!("⚠️ Every index worker is gone; chunk {chunk_no} onwards was never dispatched");
                    break;
                }
            }
        };

        let consumer = async {
            let mut progress = ProgressMetrics::new(&request.index, results.len() as u64, request.show_progress);
            let mut reported = vec![false; total_chunks];
            let mut updated = 0usize;
            let mut failures_by_chunk: Vec<(usize, Vec<FailedItem>)> = Vec::new();
            while let Ok(outcome) = outcome_rx.recv().await {
                if let Some(slot) = reported.get_mut(outcome.chunk_no) {
                    *slot = true;
                }
                progress.update(
                    outcome.report.success_count as u64,
                    outcome.report.failures.len() as u64,
                );
                updated += outcome.report.success_count;
                if !outcome.report.failures.is_empty() {
                    failures_by_chunk.push((outcome.chunk_no, outcome.report.failures));
                }
            }
            progress.finish();
            (reported, updated, failures_by_chunk)
        };

        let ((), (reported, updated, mut failures_by_chunk)) = tokio::join!(producer, consumer);

        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("💀 An index worker gave up: {e:#}"),
                Err(e) => error!("💀 An index worker panicked: {e}"),
            }
        }

        // -- regenerate whatever never came back so no document goes unaccounted for
        let lost: Vec<(usize, Vec<FailedItem>)> = chunked(upsert_actions(results, include_views_count), chunk_size)
            .enumerate()
            .filter(|(chunk_no, _)| !reported[*chunk_no])
            .map(|(chunk_no, chunk)| {
                let detail = format!("chunk {chunk_no} was never acknowledged by an index worker");
                let failed = chunk
                    .iter()
                    .map(|action| FailedItem::new(&action.item_id, &detail))
                    .collect();
                (chunk_no, failed)
            })
            .collect();
        if !lost.is_empty() {
            warn!("⚠️ {} chunks were lost in transit and are counted as failed", lost.len());
        }
        failures_by_chunk.extend(lost);

        // -- chunk order, not arrival order, so reports don't depend on worker scheduling
        failures_by_chunk.sort_by_key(|(chunk_no, _)| *chunk_no);
        let failed_items: Vec<FailedItem> = failures_by_chunk
            .into_iter()
            .flat_map(|(_, failed)| failed)
            .collect();

        let outcome = SyncOutcome::applied(updated, failed_items);
        if outcome.attempted() != results.len() {
            // -- an adapter returned a report that doesn't cover its chunk
            warn!(
                "⚠️ Accounting mismatch: {} attempted vs {} results. The index adapter under-reported a chunk.",
                outcome.attempted(),
                results.len()
            );
        }
        Ok(outcome)
    }
}
