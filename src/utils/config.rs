//! Application configuration constants.
//! Defaults, thresholds and timeouts in one place.

use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    work_dir_prefix: String,
    manifest_filename: String,
    options_filename: String,
    job_log_target: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                work_dir_prefix: format!("{pkg}-work"),
                manifest_filename: format!("{pkg}.manifest.jsonl"),
                options_filename: format!(".{pkg}.toml"),
                job_log_target: format!("{pkg}::job"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Prefix of the private per-run temp directory created under the caller's tmp dir.
    pub fn work_dir_prefix(&self) -> &str {
        &self.work_dir_prefix
    }

    pub fn manifest_filename(&self) -> &str {
        &self.manifest_filename
    }

    pub fn options_filename(&self) -> &str {
        &self.options_filename
    }

    /// Log target used when relaying pipeline messages to the job log.
    pub fn job_log_target(&self) -> &str {
        &self.job_log_target
    }
}

// ---- Pipeline sizing ----

/// Defaults for the recognized pipeline options.
pub struct PipelineDefaults;

impl PipelineDefaults {
    pub const NB_WORKER: usize = 1;
    pub const QUEUE_SIZE: usize = 1000;
    /// Objects smaller than this are read fully into memory (bytes). 1 MiB.
    pub const IN_MEMORY_THRESHOLD: u64 = 1024 * 1024;
    /// Objects at or above this are handed to the consumer as a lazy stream (bytes). 100 MiB.
    pub const PREFETCH_SIZE: u64 = 100 * 1024 * 1024;
}

// ---- Timeouts ----

/// Timing bounds for blocking points and shutdown.
pub struct PipelineTimeouts;

impl PipelineTimeouts {
    /// Poll interval for the orchestrator's wait loops. Must stay at or below `MAX_POLL_INTERVAL`.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(200);
    /// Upper bound on cancellation observation latency.
    pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);
    /// Wall-clock ceiling for waiting on all threads to report ready during shutdown.
    pub const SHUTDOWN: Duration = Duration::from_secs(30);
    /// How long shutdown waits for each thread to finish before detaching it.
    pub const JOIN: Duration = Duration::from_secs(1);
}

// ---- Consumer ----

/// Buffer size for copying task content to the backup stream (bytes). 1 MiB.
pub const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// CLI progress counter refresh: update every N delivered tasks.
pub const PROGRESS_UPDATE_BATCH_SIZE: usize = 16;
