use clap::Parser;
use std::path::PathBuf;

use crate::utils::config::PackagePaths;

struct DefaultArgs;

impl DefaultArgs {
    pub const OUT: &'static str = "./cloudfetch-out";
}

/// Fetch changed objects from a store with a concurrent download pipeline.
#[derive(Clone, Parser)]
#[command(name = "cloudfetch")]
#[command(
    about = "Discover and download objects changed since the last run; SOURCE is a directory whose subdirectories are buckets."
)]
pub struct Cli {
    /// Store root: each subdirectory is a bucket.
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    /// Output directory. Objects land in OUT/<bucket>/<name>.
    #[arg(long, short, default_value = DefaultArgs::OUT)]
    pub out: PathBuf,

    /// Last successful run, seconds since epoch. Objects modified at or before it are unchanged.
    #[arg(long, short = 's', value_parser = clap::value_parser!(i64))]
    pub since: Option<i64>,

    /// Options file (TOML, [settings] table). Default: `.cloudfetch.toml` in SOURCE when present.
    #[arg(long, short = 'C')]
    pub config: Option<PathBuf>,

    /// Directory for the pipeline's private temp dir. Default: system temp dir.
    #[arg(long)]
    pub tmp_dir: Option<PathBuf>,

    /// Number of download workers.
    #[arg(long, short = 'w', value_parser = clap::value_parser!(usize))]
    pub workers: Option<usize>,

    /// Capacity of the discovery and download queues.
    #[arg(long, value_parser = clap::value_parser!(usize))]
    pub queue_size: Option<usize>,

    /// Objects below this many bytes are read into memory.
    #[arg(long, value_parser = clap::value_parser!(u64))]
    pub in_memory_threshold: Option<u64>,

    /// Objects of at least this many bytes are streamed instead of staged to a temp file.
    #[arg(long, value_parser = clap::value_parser!(u64))]
    pub prefetch_size: Option<u64>,

    /// Only these buckets (glob syntax). Can specify multiple: -i logs-* media
    #[arg(long, short = 'i', num_args = 1..)]
    pub include: Vec<String>,

    /// Skip these buckets (glob syntax).
    #[arg(long, short = 'e', num_args = 1..)]
    pub exclude: Vec<String>,

    /// Also record unchanged objects (no content) so they are not seen as deleted.
    #[arg(long, short = 'a', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub accurate: Option<bool>,

    /// Abort the whole run on the first object error instead of skipping the object.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub fail_on_download_error: Option<bool>,

    /// Record a blake3 digest of each object in the manifest.
    #[arg(long, short = 'c', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub check_hash: Option<bool>,

    /// List what would be fetched; write no content.
    #[arg(long)]
    pub dry_run: bool,

    /// Follow symbolic links inside SOURCE.
    #[arg(long, short = 'f', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub follow_links: Option<bool>,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

impl Cli {
    /// Options file path: explicit `--config`, else the package options file in SOURCE.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.source.join(PackagePaths::get().options_filename()))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.out.join(PackagePaths::get().manifest_filename())
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.tmp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// `--since` in nanoseconds; 0 (fetch everything) when not given.
    pub fn last_run_ns(&self) -> i64 {
        self.since.unwrap_or(0).saturating_mul(1_000_000_000)
    }
}
