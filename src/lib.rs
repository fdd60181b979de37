//! Cloudfetch: concurrent object discovery and download pipeline for object-store backups.
//!
//! One discoverer thread enumerates buckets and objects, a pool of workers materializes each
//! changed object by size tier (in memory, temp file, or lazy stream), and the consumer pulls
//! ready tasks from the [`Orchestrator`].

pub mod consumer;
pub mod engine;
pub mod pipeline;
pub mod store;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use pipeline::{NextTask, Orchestrator, PipelineStatus, ShutdownReport};
pub use store::{LocalStore, MemoryStore, StoreConnector};

use anyhow::bail;
use log::debug;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Result alias used by public cloudfetch API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a [`fetch_all`] run.
#[derive(Clone, Debug, Default)]
pub struct FetchSummary {
    /// Tasks handed to the consumer callback.
    pub delivered: usize,
    pub by_type: HashMap<TaskType, usize>,
    /// Object-level errors reported (skipped objects).
    pub errors: usize,
    /// Stopped early because the cancel flag was raised.
    pub cancelled: bool,
    pub shutdown: ShutdownReport,
}

impl FetchSummary {
    pub fn count(&self, task_type: TaskType) -> usize {
        self.by_type.get(&task_type).copied().unwrap_or(0)
    }
}

/// Single entry point: run the whole pipeline and hand every download task to `on_task`.
///
/// Starts an [`Orchestrator`], pulls tasks until the pipeline finishes, and always shuts it
/// down before returning. Returns an error if a pipeline thread aborted or `on_task` failed.
/// Raising `cancel` stops the run early with `cancelled = true`.
///
/// ```ignore
/// let store = Arc::new(cloudfetch::LocalStore::new("/srv/buckets"));
/// let summary = cloudfetch::fetch_all(store, &Opts::default(), 0, &std::env::temp_dir(), None, |task| {
///     cloudfetch::consumer::copy_task(task, &mut std::io::sink())?;
///     Ok(())
/// })?;
/// ```
pub fn fetch_all<F>(
    connector: Arc<dyn StoreConnector>,
    opts: &Opts,
    last_run_ns: i64,
    tmp_dir: &Path,
    cancel: Option<&AtomicBool>,
    mut on_task: F,
) -> Result<FetchSummary>
where
    F: FnMut(Task) -> Result<()>,
{
    let start_time = Instant::now();
    let mut orchestrator = Orchestrator::start(opts.clone(), connector, last_run_ns, tmp_dir)?;
    let mut summary = FetchSummary::default();
    let result = drive(&mut orchestrator, cancel, &mut on_task, &mut summary);
    summary.errors = orchestrator.stats().errors;
    summary.shutdown = orchestrator.shutdown();
    debug!(
        "fetch_all: {} tasks in {:?}",
        summary.delivered,
        start_time.elapsed()
    );
    result.map(|()| summary)
}

fn drive<F>(
    orchestrator: &mut Orchestrator,
    cancel: Option<&AtomicBool>,
    on_task: &mut F,
    summary: &mut FetchSummary,
) -> Result<()>
where
    F: FnMut(Task) -> Result<()>,
{
    let poll = orchestrator.opts().poll_interval;
    let cancelled = || cancel.is_some_and(|c| c.load(Ordering::Relaxed));
    loop {
        if cancelled() {
            summary.cancelled = true;
            return Ok(());
        }
        if let PipelineStatus::Abort(text) = orchestrator.check_messages() {
            bail!("pipeline aborted: {}", text);
        }
        match orchestrator.next_task_timeout(poll) {
            NextTask::Task(task) => {
                *summary.by_type.entry(task.task_type()).or_default() += 1;
                summary.delivered += 1;
                on_task(task)?;
            }
            NextTask::Pending => {}
            NextTask::Finished => break,
        }
    }

    // Download queue is closed; wait for the remaining Ready (or Abort) messages.
    let deadline = Instant::now() + orchestrator.opts().shutdown_timeout;
    loop {
        match orchestrator.check_messages() {
            PipelineStatus::Success => return Ok(()),
            PipelineStatus::Abort(text) => bail!("pipeline aborted: {}", text),
            PipelineStatus::Continue if cancelled() => {
                summary.cancelled = true;
                return Ok(());
            }
            PipelineStatus::Continue if Instant::now() >= deadline => {
                bail!(
                    "pipeline threads did not report ready within {:?}",
                    orchestrator.opts().shutdown_timeout
                )
            }
            PipelineStatus::Continue => std::thread::sleep(poll),
        }
    }
}
