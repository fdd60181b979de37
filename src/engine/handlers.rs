//! CLI command handler: fetch into OUT by default; --dry-run lists tasks without writing content.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::consumer::{copy_task, is_content_error};
use crate::engine::arg_parser::Cli;
use crate::engine::hashing::HashingWriter;
use crate::engine::progress::{BatchedProgress, create_counter};
use crate::engine::tools::local_path_for_key;
use crate::store::LocalStore;
use crate::utils::config::PROGRESS_UPDATE_BATCH_SIZE;
use crate::utils::options_toml::{apply_file_to_opts, load_options_toml};
use crate::utils::setup_logging;
use crate::utils::tempfiles::{remove_file_logged, unique_temp_path};
use crate::{Opts, Task, TaskType, fetch_all};

/// One line of the JSON-lines manifest.
#[derive(Debug, Serialize)]
pub struct ManifestRecord {
    pub bucket: String,
    pub name: String,
    pub size: u64,
    pub mtime_ns: i64,
    #[serde(rename = "type")]
    pub task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blake3: Option<String>,
}

fn setup_opts(cli: &Cli) -> Result<Opts> {
    setup_logging(cli.verbose.unwrap_or(false));
    let mut opts = Opts::default();
    if let Some(file) = load_options_toml(&cli.config_path())? {
        debug!("Loaded options from {}", cli.config_path().display());
        apply_file_to_opts(&file, &mut opts);
    }
    if let Some(n) = cli.workers {
        opts.nb_worker = n;
    }
    if let Some(n) = cli.queue_size {
        opts.queue_size = n;
    }
    if let Some(n) = cli.in_memory_threshold {
        opts.in_memory_threshold = n;
    }
    if let Some(n) = cli.prefetch_size {
        opts.prefetch_size = n;
    }
    if !cli.include.is_empty() {
        opts.buckets_include = cli.include.clone();
    }
    if !cli.exclude.is_empty() {
        opts.buckets_exclude = cli.exclude.clone();
    }
    if let Some(v) = cli.accurate {
        opts.accurate = v;
    }
    if let Some(v) = cli.fail_on_download_error {
        opts.fail_on_download_error = v;
    }
    if cli.verbose.unwrap_or(false) {
        opts.debug_level = opts.debug_level.max(1);
    }
    Ok(opts)
}

/// Materialize one task under `out` (or just consume it on dry runs) and describe it.
pub fn store_task(task: Task, out: &Path, check_hash: bool, dry_run: bool) -> Result<ManifestRecord> {
    let mut record = ManifestRecord {
        bucket: task.bucket().to_string(),
        name: task.name().to_string(),
        size: task.size(),
        mtime_ns: task.mtime_ns(),
        task_type: task.task_type().as_str(),
        blake3: None,
    };
    if task.task_type() == TaskType::Accurate {
        return Ok(record);
    }
    if dry_run {
        // Still drain the content so temp files are released and sizes are verified.
        if check_hash {
            let mut w = HashingWriter::new(io::sink());
            copy_task(task, &mut w)?;
            record.blake3 = Some(w.finish().1);
        } else {
            copy_task(task, &mut io::sink())?;
        }
        return Ok(record);
    }

    let dest = local_path_for_key(out, &record.bucket, &record.name)
        .with_context(|| format!("unsafe object key {}/{}", record.bucket, record.name))?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    // Content lands under a temp name first, so a failed read never leaves a truncated object.
    let staging = unique_temp_path(dest.parent().unwrap_or(out));
    match write_content(task, &staging, check_hash) {
        Ok(digest) => {
            record.blake3 = digest;
            fs::rename(&staging, &dest).with_context(|| format!("rename to {}", dest.display()))?;
            Ok(record)
        }
        Err(e) => {
            remove_file_logged(&staging);
            Err(e)
        }
    }
}

fn write_content(task: Task, path: &Path, check_hash: bool) -> Result<Option<String>> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    if check_hash {
        let mut w = HashingWriter::new(BufWriter::new(file));
        copy_task(task, &mut w)?;
        let (mut inner, digest) = w.finish();
        inner.flush()?;
        Ok(Some(digest))
    } else {
        let mut w = BufWriter::new(file);
        copy_task(task, &mut w)?;
        w.flush()?;
        Ok(None)
    }
}

/// [`store_task`] with the object error policy applied: a content error is logged and the
/// object skipped (`Ok(None)`) unless `fail_fast` is set. Local failures always propagate.
pub fn store_or_skip(
    task: Task,
    out: &Path,
    check_hash: bool,
    dry_run: bool,
    fail_fast: bool,
) -> Result<Option<ManifestRecord>> {
    let key = task.object.key();
    match store_task(task, out, check_hash, dry_run) {
        Ok(record) => Ok(Some(record)),
        Err(e) if !fail_fast && is_content_error(&e) => {
            error!("Skipping {}: {:#}", key, e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Run the pipeline against SOURCE and write objects plus a manifest into OUT.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let opts = setup_opts(cli)?;
    let verbose = cli.verbose.unwrap_or(false);
    let check_hash = cli.check_hash.unwrap_or(false);
    let fail_fast = opts.fail_on_download_error;
    let store = LocalStore::new(&cli.source).follow_links(cli.follow_links.unwrap_or(false));

    let cancel_requested = Arc::new(AtomicBool::new(false));
    let cancel_requested_handler = Arc::clone(&cancel_requested);
    ctrlc::set_handler(move || {
        cancel_requested_handler.store(true, Ordering::Relaxed);
    })
    .context("set Ctrl+C handler")?;

    if cli.dry_run {
        warn!("RUNNING IN DRY-RUN MODE. NO OBJECT CONTENT WILL BE WRITTEN.");
    }
    fs::create_dir_all(&cli.out).with_context(|| format!("create {}", cli.out.display()))?;
    let manifest_path = cli.manifest_path();
    let mut manifest = BufWriter::new(
        File::create(&manifest_path)
            .with_context(|| format!("create manifest {}", manifest_path.display()))?,
    );
    let mut progress =
        BatchedProgress::new(verbose.then(|| create_counter("Fetching")), PROGRESS_UPDATE_BATCH_SIZE);

    let mut skipped = 0_usize;
    let summary = fetch_all(
        Arc::new(store),
        &opts,
        cli.last_run_ns(),
        &cli.tmp_dir(),
        Some(&cancel_requested),
        |task| {
            let stored = store_or_skip(task, &cli.out, check_hash, cli.dry_run, fail_fast)?;
            match stored {
                Some(record) => {
                    serde_json::to_writer(&mut manifest, &record)?;
                    manifest.write_all(b"\n")?;
                }
                None => skipped += 1,
            }
            progress.tick();
            Ok(())
        },
    );
    progress.flush();
    manifest.flush().context("flush manifest")?;
    let summary = summary?;

    info!(
        "Fetched {} objects ({} in memory, {} via temp file, {} streamed, {} unchanged), {} errors",
        summary.delivered - skipped,
        summary.count(TaskType::Downloaded),
        summary.count(TaskType::TempFile),
        summary.count(TaskType::Stream),
        summary.count(TaskType::Accurate),
        summary.errors + skipped
    );
    if summary.cancelled {
        anyhow::bail!("Fetch cancelled by user; manifest holds the objects written so far");
    }
    Ok(())
}
