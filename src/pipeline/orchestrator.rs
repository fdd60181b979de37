use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::context::{PipelineChannels, PipelineContext, create_pipeline_channels};
use super::discoverer::run_discovery;
use super::messages::{Message, Role};
use super::queue::drain;
use super::signal::Signal;
use super::worker::run_worker;
use super::worker_base::{WorkerThread, spawn_worker};
use crate::store::StoreConnector;
use crate::utils::config::PackagePaths;
use crate::utils::fd_limit::cap_workers;
use crate::utils::tempfiles::{prepare_work_dir, remove_file_logged, remove_work_dir};
use crate::{DiscoveryTask, Opts, Task, TaskData};

/// Overall state reported by [`Orchestrator::check_messages`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineStatus {
    /// Threads are still working.
    Continue,
    /// Every thread reported ready and none aborted.
    Success,
    /// A thread aborted; carries the first abort text.
    Abort(String),
}

/// Result of pulling from the download queue.
#[derive(Debug)]
pub enum NextTask {
    Task(Task),
    /// Nothing available right now; more may come.
    Pending,
    /// Queue is empty and no worker will produce more.
    Finished,
}

/// Counters kept by the orchestrator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub delivered: usize,
    pub errors: usize,
    pub ready: usize,
    pub threads: usize,
}

/// What shutdown had to clean up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub discarded_discovery: usize,
    pub discarded_download: usize,
    /// Threads still running at the join deadline, left detached.
    pub detached_threads: usize,
    pub work_dir_removed: bool,
    /// Whether every thread reported ready before the shutdown ceiling.
    pub all_ready: bool,
}

/// Owns the queues, the message channel and the thread set of one pipeline run.
pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
    threads: Vec<WorkerThread>,
    message_rx: Receiver<Message>,
    discovery_rx: Receiver<DiscoveryTask>,
    download_rx: Receiver<Task>,
    stats: PipelineStats,
    abort: Option<String>,
    shut_down: bool,
}

impl Orchestrator {
    /// Create the work dir under `tmp_dir` and start the discoverer and the workers.
    /// On any failure the partially started pipeline is torn down before returning.
    pub fn start(
        opts: Opts,
        connector: Arc<dyn StoreConnector>,
        last_run_ns: i64,
        tmp_dir: &Path,
    ) -> Result<Self> {
        opts.validate().context("invalid pipeline options")?;
        let mut opts = opts;
        opts.nb_worker = cap_workers(opts.nb_worker);
        let work_dir = prepare_work_dir(tmp_dir)?;
        debug!(
            "{} CONFIG:{:#?}",
            PackagePaths::get().pkg_name().to_uppercase(),
            opts
        );

        let PipelineChannels {
            discovery_tx,
            discovery_rx,
            download_tx,
            download_rx,
            message_tx,
            message_rx,
        } = create_pipeline_channels(opts.queue_size);

        let ctx = Arc::new(PipelineContext {
            opts: Arc::new(opts),
            connector,
            last_run_ns,
            work_dir,
            queue_filled: Signal::new(),
            cancel: Signal::new(),
        });

        let mut orchestrator = Orchestrator {
            ctx,
            threads: Vec::new(),
            message_rx,
            discovery_rx,
            download_rx,
            stats: PipelineStats::default(),
            abort: None,
            shut_down: false,
        };
        if let Err(e) = orchestrator.spawn_threads(discovery_tx, download_tx, message_tx) {
            orchestrator.shutdown();
            return Err(e);
        }
        debug!(
            "Pipeline started: 1 discoverer, {} workers, queue size {}",
            orchestrator.ctx.opts.nb_worker, orchestrator.ctx.opts.queue_size
        );
        Ok(orchestrator)
    }

    fn spawn_threads(
        &mut self,
        discovery_tx: Sender<DiscoveryTask>,
        download_tx: Sender<Task>,
        message_tx: Sender<Message>,
    ) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let thread = spawn_worker(
            Role::Discoverer,
            0,
            message_tx.clone(),
            self.ctx.cancel.clone(),
            move |messenger, _cancel| run_discovery(ctx, discovery_tx, messenger),
        )?;
        self.track(thread);

        for id in 0..self.ctx.opts.nb_worker {
            let ctx = Arc::clone(&self.ctx);
            let discovery_rx = self.discovery_rx.clone();
            let download_tx = download_tx.clone();
            let thread = spawn_worker(
                Role::Worker,
                id,
                message_tx.clone(),
                self.ctx.cancel.clone(),
                move |messenger, _cancel| run_worker(ctx, discovery_rx, download_tx, messenger),
            )?;
            self.track(thread);
        }
        Ok(())
    }

    fn track(&mut self, thread: WorkerThread) {
        self.threads.push(thread);
        self.stats.threads += 1;
    }

    pub fn opts(&self) -> &Opts {
        &self.ctx.opts
    }

    /// Private directory holding `TempFile` downloads.
    pub fn work_dir(&self) -> &Path {
        &self.ctx.work_dir
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    fn all_ready(&self) -> bool {
        self.stats.ready >= self.stats.threads
    }

    fn status(&self) -> PipelineStatus {
        if let Some(text) = &self.abort {
            PipelineStatus::Abort(text.clone())
        } else if self.all_ready() {
            PipelineStatus::Success
        } else {
            PipelineStatus::Continue
        }
    }

    /// Drain pending messages without blocking, relay them to the job log and update counters.
    pub fn check_messages(&mut self) -> PipelineStatus {
        let pending: Vec<Message> = self.message_rx.try_iter().collect();
        for msg in pending {
            self.handle_message(msg);
        }
        self.status()
    }

    fn handle_message(&mut self, msg: Message) {
        let target = PackagePaths::get().job_log_target();
        let (role, id) = msg.origin();
        match msg {
            Message::Info { text, .. } => info!(target: target, "{}-{}: {}", role, id, text),
            Message::Debug { level, text, .. } => {
                if level <= self.ctx.opts.debug_level {
                    debug!(target: target, "{}-{} [{}]: {}", role, id, level, text);
                }
            }
            Message::Error { text, cause, .. } => {
                self.stats.errors += 1;
                match cause {
                    Some(cause) => error!(target: target, "{}-{}: {} ({})", role, id, text, cause),
                    None => error!(target: target, "{}-{}: {}", role, id, text),
                }
            }
            Message::Ready { .. } => {
                self.stats.ready += 1;
                debug!("{}-{} ready ({}/{})", role, id, self.stats.ready, self.stats.threads);
            }
            Message::Abort { text, .. } => {
                error!(target: target, "{}-{} aborted: {}", role, id, text);
                if self.abort.is_none() {
                    self.abort = Some(text);
                    // One abort stops the whole pool.
                    self.ctx.cancel.fire();
                }
            }
        }
    }

    /// True once any thread has aborted. No task is delivered after that.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    /// Non-blocking pop of the download queue. Pending messages are read first, so an abort
    /// already on the channel ends delivery.
    pub fn get_next_task(&mut self) -> NextTask {
        if self.shut_down {
            return NextTask::Finished;
        }
        self.check_messages();
        if self.is_aborted() {
            return NextTask::Finished;
        }
        match self.download_rx.try_recv() {
            Ok(task) => self.deliver(task),
            Err(TryRecvError::Disconnected) => NextTask::Finished,
            Err(TryRecvError::Empty) if self.all_ready() => NextTask::Finished,
            Err(TryRecvError::Empty) => NextTask::Pending,
        }
    }

    /// Like [`get_next_task`](Self::get_next_task) but waits up to `timeout` for a task.
    pub fn next_task_timeout(&mut self, timeout: Duration) -> NextTask {
        match self.get_next_task() {
            NextTask::Pending => {}
            other => return other,
        }
        match self.download_rx.recv_timeout(timeout) {
            Ok(task) => self.deliver(task),
            Err(RecvTimeoutError::Disconnected) => NextTask::Finished,
            Err(RecvTimeoutError::Timeout) => NextTask::Pending,
        }
    }

    fn deliver(&mut self, task: Task) -> NextTask {
        // The abort may have been sent while we were popping.
        self.check_messages();
        if self.is_aborted() {
            discard_task(task);
            return NextTask::Finished;
        }
        self.stats.delivered += 1;
        NextTask::Task(task)
    }

    /// Stop every thread, drop queued tasks, and delete the work dir.
    ///
    /// Returns within roughly `shutdown_timeout + join_timeout` no matter what the threads
    /// are doing. Cleanup failures are logged, never raised. Idempotent.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.shut_down {
            report.all_ready = self.all_ready();
            report.work_dir_removed = !self.ctx.work_dir.exists();
            return report;
        }
        self.shut_down = true;
        self.ctx.cancel.fire();

        report.all_ready = self.wait_all_ready();
        report.discarded_discovery = drain(&self.discovery_rx, drop);
        report.discarded_download = drain(&self.download_rx, discard_task);
        report.detached_threads = self.join_threads();
        // Threads that finished during the join may have pushed one last task.
        report.discarded_download += drain(&self.download_rx, discard_task);
        report.work_dir_removed = remove_work_dir(&self.ctx.work_dir);

        debug!("Pipeline shut down: {:?}", report);
        report
    }

    /// Relay messages until every thread is ready or the shutdown ceiling passes.
    fn wait_all_ready(&mut self) -> bool {
        let deadline = Instant::now() + self.ctx.opts.shutdown_timeout;
        let poll = self.ctx.opts.poll_interval;
        self.check_messages();
        while !self.all_ready() {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Shutdown timeout: {}/{} threads ready after {:?}",
                    self.stats.ready, self.stats.threads, self.ctx.opts.shutdown_timeout
                );
                return false;
            }
            match self.message_rx.recv_timeout(poll.min(deadline - now)) {
                Ok(msg) => self.handle_message(msg),
                Err(RecvTimeoutError::Timeout) => {}
                // Every thread has dropped its sender; nothing more will arrive.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.all_ready()
    }

    /// Join threads within one shared `join_timeout`. Returns how many were left detached.
    fn join_threads(&mut self) -> usize {
        let join_timeout = self.ctx.opts.join_timeout;
        let deadline = Instant::now() + join_timeout;
        let mut detached = 0;
        for WorkerThread { label, handle } in self.threads.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("{} panicked outside its body", label);
                }
            } else {
                warn!("{} still running after {:?}; detaching", label, join_timeout);
                detached += 1;
            }
        }
        detached
    }
}

fn discard_task(task: Task) {
    if let TaskData::TempFile(path) = &task.data {
        remove_file_logged(path);
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if !self.shut_down {
            self.shutdown();
        }
    }
}
