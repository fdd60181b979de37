//! Path, key and filter utilities

use std::path::{Component, Path, PathBuf};

/// Convert absolute path to relative path from base
pub fn path_relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Object key for a path relative to its bucket: `/`-separated regardless of platform.
pub fn object_key_from_path(rel: &Path) -> String {
    rel.to_string_lossy().replace('\\', "/")
}

/// Local path for an object key under `base`. Returns None if the key would escape `base`.
pub fn local_path_for_key(base: &Path, bucket: &str, key: &str) -> Option<PathBuf> {
    let mut out = base.to_path_buf();
    for part in std::iter::once(bucket).chain(key.split('/')) {
        if part.is_empty() {
            continue;
        }
        let comp = Path::new(part);
        match comp.components().next() {
            Some(Component::Normal(_)) if comp.components().count() == 1 => out.push(part),
            _ => return None,
        }
    }
    (out != base).then_some(out)
}

/// Returns true if `bucket` passes the include/exclude filters.
/// An empty include list selects every bucket; exclude wins over include.
pub fn bucket_selected(bucket: &str, include: &[String], exclude: &[String]) -> bool {
    if exclude.iter().any(|p| glob_match(p, bucket)) {
        return false;
    }
    include.is_empty() || include.iter().any(|p| glob_match(p, bucket))
}

/// Simple glob pattern matching (supports * and ?)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_chars(&pattern, &text)
}

fn glob_match_chars(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((&'*', rest)) => {
            if rest.is_empty() {
                return true; // trailing * matches everything
            }
            (0..=text.len()).any(|skip| glob_match_chars(rest, &text[skip..]))
        }
        Some((&'?', rest)) => !text.is_empty() && glob_match_chars(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && glob_match_chars(rest, &text[1..]),
    }
}

/// Check if an object changed since the last run (strictly newer mtime).
pub fn changed_since(mtime_ns: i64, last_run_ns: i64) -> bool {
    mtime_ns > last_run_ns
}
