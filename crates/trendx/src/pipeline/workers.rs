//! 👷 Workers: the little tasks that carry chunks to the index.
//!
//! 🧠 Knowledge graph:
//! - `Worker::start` consumes the worker and spawns it onto the tokio runtime.
//! - The pipeline owns the channels. Workers only drain one and feed the other.
//! - A worker that returns `Err` just stops; the pipeline notices the chunks it never
//!   reported and marks those documents failed. Nobody gets lost.
//!
//! 🦆 (the duck is also a worker. it is unclear what it works on.)

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::common::BulkReport;

mod index_worker;
pub(crate) use index_worker::IndexWorker;

/// 🏗️ Anything that can be sent off to do its job in the background.
pub(crate) trait Worker {
    fn start(self) -> JoinHandle<Result<()>>;
}

/// 📬 What a worker sends back for each chunk it handled.
#[derive(Debug)]
pub(crate) struct ChunkOutcome {
    pub(crate) chunk_no: usize,
    /// accounts for every document of the chunk, success or failure
    pub(crate) report: BulkReport,
}
