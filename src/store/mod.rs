//! Remote object store seam: connector, per-thread client, and object handles.
//!
//! The pipeline never shares a client between threads. Each pipeline thread calls
//! [`StoreConnector::connect`] once and keeps the returned client private.

pub mod local;
pub mod memory;

use std::io::Read;
use std::path::Path;

use thiserror::Error;

pub use local::LocalStore;
pub use memory::{MemoryStore, StoreCounters};

/// Errors reported by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {bucket}/{name}")]
    NotFound { bucket: String, name: String },

    #[error("cannot connect to store: {0}")]
    Connect(String),

    #[error("listing bucket '{bucket}' failed: {message}")]
    Listing { bucket: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One entry of a bucket listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
    pub mtime_ns: i64,
}

/// Lazy iterator over a bucket's objects. An `Err` item ends the bucket.
pub type ObjectListing<'a> = Box<dyn Iterator<Item = StoreResult<ObjectInfo>> + 'a>;

/// Builds clients. Shared by all pipeline threads.
pub trait StoreConnector: Send + Sync {
    fn connect(&self) -> StoreResult<Box<dyn StoreClient>>;
}

/// A connected client, owned by exactly one pipeline thread.
pub trait StoreClient: Send {
    /// Bucket names, in store order.
    fn containers(&self) -> StoreResult<Vec<String>>;

    /// Objects of one bucket.
    fn container_objects(&self, bucket: &str) -> StoreResult<ObjectListing<'_>>;

    /// Fetch the handle (and current metadata) of one object.
    fn get_object(&self, bucket: &str, name: &str) -> StoreResult<Box<dyn ObjectHandle>>;
}

/// A fetched object. Handles travel inside `Stream` tasks, so they must be `Send`.
pub trait ObjectHandle: Send {
    fn size(&self) -> u64;

    fn mtime_ns(&self) -> i64;

    /// Open a lazy byte stream over the object's content.
    fn as_stream(&self) -> StoreResult<Box<dyn Read + Send + '_>>;

    /// Write the object's content to `local_path`. Returns bytes written.
    fn download(&self, local_path: &Path) -> StoreResult<u64> {
        let mut reader = self.as_stream()?;
        let mut file = std::fs::File::create(local_path)?;
        let written = std::io::copy(&mut reader, &mut file)?;
        file.sync_all()?;
        Ok(written)
    }
}
