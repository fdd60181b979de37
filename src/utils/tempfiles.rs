use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::utils::config::PackagePaths;

static WORK_DIR_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Path of the private work directory for one pipeline run under `tmp_dir`.
/// Unique per process and per run within the process.
pub fn work_dir_for(tmp_dir: &Path) -> PathBuf {
    let seq = WORK_DIR_SEQ.fetch_add(1, Ordering::Relaxed);
    tmp_dir.join(format!(
        "{}-{}-{}",
        PackagePaths::get().work_dir_prefix(),
        std::process::id(),
        seq
    ))
}

/// Create the private work directory, removing a stale one left at the same path.
pub fn prepare_work_dir(tmp_dir: &Path) -> Result<PathBuf> {
    let dir = work_dir_for(tmp_dir);
    if dir.exists() {
        debug!("Removing stale work dir {}", dir.display());
        fs::remove_dir_all(&dir)
            .with_context(|| format!("remove stale work dir {}", dir.display()))?;
    }
    create_private_dir(&dir)?;
    Ok(dir)
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .with_context(|| format!("create work dir {}", dir.display()))
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create work dir {}", dir.display()))
}

/// Fresh, unique file name inside `dir`. The file is not created.
pub fn unique_temp_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.part", uuid::Uuid::new_v4().simple()))
}

/// Remove one file; log (never fail) if it cannot be removed.
pub fn remove_file_logged(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Could not remove temp file {}: {}", path.display(), e);
    }
}

/// Delete the work directory and everything in it. Failures are logged per file, never raised.
/// Returns true if the directory is gone afterwards.
pub fn remove_work_dir(dir: &Path) -> bool {
    if !dir.exists() {
        return true;
    }
    if fs::remove_dir_all(dir).is_ok() {
        debug!("Removed work dir {}", dir.display());
        return true;
    }
    // Fall back to file-by-file so one stuck file does not hide the rest.
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let res = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(e) = res {
                warn!("Could not remove {}: {}", path.display(), e);
            }
        }
    }
    match fs::remove_dir(dir) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not remove work dir {}: {}", dir.display(), e);
            false
        }
    }
}
