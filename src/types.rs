//! Public and internal types for the cloudfetch API and pipeline.

use anyhow::{Result, bail};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::store::ObjectHandle;
use crate::utils::config::{PipelineDefaults, PipelineTimeouts};

/// Identity and listing metadata of one remote object, as reported at discovery time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    pub bucket: String,
    pub name: String,
    /// Byte length reported by the store.
    pub size: u64,
    /// Last-modified time in nanoseconds since epoch.
    pub mtime_ns: i64,
}

impl ObjectMeta {
    /// `bucket/name`, used in log and error messages.
    pub fn key(&self) -> String {
        format!("{}/{}", self.bucket, self.name)
    }
}

/// Task type tag. `Undefined` only exists on discovery tasks that a worker has not classified yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskType {
    Undefined,
    Accurate,
    Downloaded,
    TempFile,
    Stream,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Undefined => "undefined",
            TaskType::Accurate => "accurate",
            TaskType::Downloaded => "downloaded",
            TaskType::TempFile => "temp_file",
            TaskType::Stream => "stream",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate object produced by the discoverer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryTask {
    pub object: ObjectMeta,
    /// Unchanged since the last run and only needs to be recorded as present (accurate mode).
    pub accurate_only: bool,
}

impl DiscoveryTask {
    pub fn task_type(&self) -> TaskType {
        if self.accurate_only {
            TaskType::Accurate
        } else {
            TaskType::Undefined
        }
    }
}

/// Materialized content of a download task. The variant decides how the consumer reads it.
pub enum TaskData {
    /// Unchanged object: no content, catalog entry only.
    Accurate,
    /// Small object read fully into memory.
    Downloaded(Vec<u8>),
    /// Mid-size object staged in the pipeline's temp directory. The consumer deletes the file.
    TempFile(PathBuf),
    /// Large object: the consumer pulls bytes lazily from the live handle.
    Stream(Box<dyn ObjectHandle>),
}

impl fmt::Debug for TaskData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskData::Accurate => f.write_str("Accurate"),
            TaskData::Downloaded(buf) => write!(f, "Downloaded({} bytes)", buf.len()),
            TaskData::TempFile(path) => f.debug_tuple("TempFile").field(path).finish(),
            TaskData::Stream(handle) => write!(f, "Stream({} bytes)", handle.size()),
        }
    }
}

/// A download task: one object ready for the consumer.
#[derive(Debug)]
pub struct Task {
    pub object: ObjectMeta,
    pub data: TaskData,
}

impl Task {
    pub fn task_type(&self) -> TaskType {
        match self.data {
            TaskData::Accurate => TaskType::Accurate,
            TaskData::Downloaded(_) => TaskType::Downloaded,
            TaskData::TempFile(_) => TaskType::TempFile,
            TaskData::Stream(_) => TaskType::Stream,
        }
    }

    pub fn name(&self) -> &str {
        &self.object.name
    }

    pub fn bucket(&self) -> &str {
        &self.object.bucket
    }

    pub fn size(&self) -> u64 {
        self.object.size
    }

    pub fn mtime_ns(&self) -> i64 {
        self.object.mtime_ns
    }
}

/// Pipeline options. Built once per job, then shared read-only by every pipeline thread.
#[derive(Clone, Debug)]
pub struct Opts {
    /// Worker thread count.
    pub nb_worker: usize,
    /// Capacity of both the discovery and the download queue.
    pub queue_size: usize,
    /// Objects below this size are read into memory.
    pub in_memory_threshold: u64,
    /// Objects at or above this size are streamed by the consumer; between the two thresholds they go to a temp file.
    pub prefetch_size: u64,
    /// Bucket name patterns to include (glob: `*`, `?`). Empty means all.
    pub buckets_include: Vec<String>,
    /// Bucket name patterns to exclude. Exclude wins over include.
    pub buckets_exclude: Vec<String>,
    /// Emit catalog-only tasks for objects unchanged since the last run.
    pub accurate: bool,
    /// Escalate any per-object error to a pipeline abort.
    pub fail_on_download_error: bool,
    /// Ceiling on shutdown's wait for all threads to report ready.
    pub shutdown_timeout: Duration,
    /// Per-thread join wait during shutdown before the thread is detached.
    pub join_timeout: Duration,
    /// Orchestrator wait-loop interval.
    pub poll_interval: Duration,
    /// Debug messages with a level above this are not relayed to the job log.
    pub debug_level: u8,
}

impl Default for Opts {
    fn default() -> Self {
        Opts {
            nb_worker: PipelineDefaults::NB_WORKER,
            queue_size: PipelineDefaults::QUEUE_SIZE,
            in_memory_threshold: PipelineDefaults::IN_MEMORY_THRESHOLD,
            prefetch_size: PipelineDefaults::PREFETCH_SIZE,
            buckets_include: Vec::new(),
            buckets_exclude: Vec::new(),
            accurate: false,
            fail_on_download_error: false,
            shutdown_timeout: PipelineTimeouts::SHUTDOWN,
            join_timeout: PipelineTimeouts::JOIN,
            poll_interval: PipelineTimeouts::POLL_INTERVAL,
            debug_level: 0,
        }
    }
}

impl Opts {
    /// Reject option combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.nb_worker == 0 {
            bail!("nb_worker must be at least 1");
        }
        if self.queue_size == 0 {
            bail!("queue_size must be at least 1");
        }
        if self.in_memory_threshold > self.prefetch_size {
            bail!(
                "in_memory_threshold ({}) must not exceed prefetch_size ({})",
                self.in_memory_threshold,
                self.prefetch_size
            );
        }
        if self.poll_interval.is_zero() || self.poll_interval > PipelineTimeouts::MAX_POLL_INTERVAL
        {
            bail!(
                "poll_interval must be between 1ms and {:?}",
                PipelineTimeouts::MAX_POLL_INTERVAL
            );
        }
        Ok(())
    }

    /// Apply one plugin-style `key=value` option. Unknown keys are logged and ignored.
    pub fn apply_pair(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key.trim() {
            "nb_worker" => self.nb_worker = parse_number(key, value)?,
            "queue_size" => self.queue_size = parse_number(key, value)?,
            "in_memory_threshold" => self.in_memory_threshold = parse_number(key, value)?,
            "prefetch_size" => self.prefetch_size = parse_number(key, value)?,
            "buckets_include" => self.buckets_include = parse_list(value),
            "buckets_exclude" => self.buckets_exclude = parse_list(value),
            "accurate" => self.accurate = parse_bool(key, value)?,
            "fail_on_download_error" => self.fail_on_download_error = parse_bool(key, value)?,
            "debug_level" => self.debug_level = parse_number(key, value)?,
            other => log::warn!("Ignoring unknown option '{}'", other),
        }
        Ok(())
    }

    /// Build options from `key=value` pairs on top of the defaults.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut opts = Opts::default();
        for (key, value) in pairs {
            opts.apply_pair(key, value)?;
        }
        Ok(opts)
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid value '{}' for {}: {}", value, key, e))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => bail!("invalid boolean '{}' for {}", value, key),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
