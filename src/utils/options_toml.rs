//! Load pipeline options from a TOML file (CLI only). Lib callers build [`Opts`] directly.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::Opts;

#[derive(Debug, Default, Deserialize)]
pub struct OptionsToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
struct SettingsSection {
    nb_worker: Option<usize>,
    queue_size: Option<usize>,
    in_memory_threshold: Option<u64>,
    prefetch_size: Option<u64>,
    buckets_include: Option<Vec<String>>,
    buckets_exclude: Option<Vec<String>>,
    accurate: Option<bool>,
    fail_on_download_error: Option<bool>,
    debug_level: Option<u8>,
    /// Seconds.
    shutdown_timeout: Option<u64>,
}

/// Parse options TOML text.
pub fn parse_options_toml(s: &str) -> Result<OptionsToml> {
    toml::from_str(s).context("parse options file")
}

/// Load `path` if present. Returns None if the file is missing; a malformed file is an error.
pub fn load_options_toml(path: &Path) -> Result<Option<OptionsToml>> {
    let s = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    parse_options_toml(&s)
        .with_context(|| path.display().to_string())
        .map(Some)
}

/// Overwrite opts field from file when present.
macro_rules! apply_file_opt {
    ($sec:expr, $opts:expr, $field:ident) => {
        if let Some(v) = $sec.$field.clone() {
            $opts.$field = v;
        }
    };
}

/// Apply file settings to opts (only fields present in the file). Call before applying CLI flags.
pub fn apply_file_to_opts(file: &OptionsToml, opts: &mut Opts) {
    let sec = &file.settings;
    apply_file_opt!(sec, opts, nb_worker);
    apply_file_opt!(sec, opts, queue_size);
    apply_file_opt!(sec, opts, in_memory_threshold);
    apply_file_opt!(sec, opts, prefetch_size);
    apply_file_opt!(sec, opts, buckets_include);
    apply_file_opt!(sec, opts, buckets_exclude);
    apply_file_opt!(sec, opts, accurate);
    apply_file_opt!(sec, opts, fail_on_download_error);
    apply_file_opt!(sec, opts, debug_level);
    if let Some(secs) = sec.shutdown_timeout {
        opts.shutdown_timeout = std::time::Duration::from_secs(secs);
    }
}
