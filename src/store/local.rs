//! Directory-backed store: each first-level directory under `root` is a bucket, every file below it an object.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use walkdir::WalkDir;

use super::{
    ObjectHandle, ObjectInfo, ObjectListing, StoreClient, StoreConnector, StoreError, StoreResult,
};
use crate::engine::tools::{object_key_from_path, path_relative_to};

/// Connector for a local directory treated as an object store.
#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
    follow_links: bool,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStore {
            root: root.into(),
            follow_links: false,
        }
    }

    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StoreConnector for LocalStore {
    fn connect(&self) -> StoreResult<Box<dyn StoreClient>> {
        let root = self
            .root
            .canonicalize()
            .map_err(|e| StoreError::Connect(format!("{}: {}", self.root.display(), e)))?;
        if !root.is_dir() {
            return Err(StoreError::Connect(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Box::new(LocalClient {
            root,
            follow_links: self.follow_links,
        }))
    }
}

struct LocalClient {
    root: PathBuf,
    follow_links: bool,
}

impl LocalClient {
    fn bucket_dir(&self, bucket: &str) -> StoreResult<PathBuf> {
        if bucket.is_empty() || bucket.contains('/') || !is_plain_relative(Path::new(bucket)) {
            return Err(StoreError::Other(format!("invalid bucket name '{}'", bucket)));
        }
        Ok(self.root.join(bucket))
    }
}

/// True if `path` is relative and never climbs out of its base (no `..`, no root or prefix).
fn is_plain_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn mtime_ns_of(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

impl StoreClient for LocalClient {
    fn containers(&self) -> StoreResult<Vec<String>> {
        let mut buckets = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                buckets.push(name.to_string());
            }
        }
        buckets.sort();
        Ok(buckets)
    }

    fn container_objects(&self, bucket: &str) -> StoreResult<ObjectListing<'_>> {
        let dir = self.bucket_dir(bucket)?;
        if !dir.is_dir() {
            return Err(StoreError::Listing {
                bucket: bucket.to_string(),
                message: "no such bucket".to_string(),
            });
        }
        let bucket = bucket.to_string();
        let iter = WalkDir::new(&dir)
            .follow_links(self.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |res| match res {
                Ok(entry) if entry.file_type().is_file() => {
                    let meta = match entry.metadata() {
                        Ok(m) => m,
                        Err(e) => {
                            return Some(Err(StoreError::Listing {
                                bucket: bucket.clone(),
                                message: e.to_string(),
                            }));
                        }
                    };
                    let rel = path_relative_to(entry.path(), &dir)?;
                    Some(Ok(ObjectInfo {
                        name: object_key_from_path(&rel),
                        size: meta.len(),
                        mtime_ns: mtime_ns_of(&meta),
                    }))
                }
                Ok(_) => None,
                Err(e) => Some(Err(StoreError::Listing {
                    bucket: bucket.clone(),
                    message: e.to_string(),
                })),
            });
        Ok(Box::new(iter))
    }

    fn get_object(&self, bucket: &str, name: &str) -> StoreResult<Box<dyn ObjectHandle>> {
        let not_found = || StoreError::NotFound {
            bucket: bucket.to_string(),
            name: name.to_string(),
        };
        if !is_plain_relative(Path::new(name)) {
            return Err(not_found());
        }
        let path = self.bucket_dir(bucket)?.join(name);
        let meta = match std::fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(not_found()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        Ok(Box::new(LocalObject {
            size: meta.len(),
            mtime_ns: mtime_ns_of(&meta),
            path,
        }))
    }
}

struct LocalObject {
    path: PathBuf,
    size: u64,
    mtime_ns: i64,
}

impl ObjectHandle for LocalObject {
    fn size(&self) -> u64 {
        self.size
    }

    fn mtime_ns(&self) -> i64 {
        self.mtime_ns
    }

    fn as_stream(&self) -> StoreResult<Box<dyn Read + Send + '_>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn download(&self, local_path: &Path) -> StoreResult<u64> {
        Ok(std::fs::copy(&self.path, local_path)?)
    }
}
