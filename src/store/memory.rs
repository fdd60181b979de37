//! In-process store with call counters and fault injection.
//!
//! Clones share the same contents, so a test can keep one handle for assertions while the
//! pipeline connects through another.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    ObjectHandle, ObjectInfo, ObjectListing, StoreClient, StoreConnector, StoreError, StoreResult,
};

#[derive(Clone, Debug)]
enum Content {
    Bytes(Arc<Vec<u8>>),
    /// `len` copies of `byte`, generated on read so large objects cost no memory.
    Repeat { byte: u8, len: u64 },
}

impl Content {
    fn len(&self) -> u64 {
        match self {
            Content::Bytes(b) => b.len() as u64,
            Content::Repeat { len, .. } => *len,
        }
    }
}

#[derive(Clone, Debug)]
struct MemoryObject {
    content: Content,
    mtime_ns: i64,
}

type ObjectKey = (String, String);

/// Number of calls made against the store, summed over all clients.
#[derive(Debug, Default)]
pub struct StoreCounters {
    pub connects: AtomicUsize,
    pub listings: AtomicUsize,
    pub get_object: AtomicUsize,
    pub streams_opened: AtomicUsize,
    pub downloads: AtomicUsize,
}

#[derive(Debug, Default)]
struct Faults {
    missing: HashSet<ObjectKey>,
    short_reads: HashSet<ObjectKey>,
    failing_buckets: HashSet<String>,
    get_delay: Option<Duration>,
    object_delays: HashMap<ObjectKey, Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, MemoryObject>>>,
    faults: Mutex<Faults>,
    refuse_connect: AtomicBool,
    counters: StoreCounters,
}

/// Shared in-memory store. Buckets and objects are listed in name order.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty bucket (no-op if it exists).
    pub fn add_bucket(&self, bucket: &str) -> &Self {
        lock(&self.inner.buckets)
            .entry(bucket.to_string())
            .or_default();
        self
    }

    /// Store `data` as `bucket/name`, creating the bucket if needed.
    pub fn put(&self, bucket: &str, name: &str, data: impl Into<Vec<u8>>, mtime_ns: i64) -> &Self {
        self.insert(
            bucket,
            name,
            MemoryObject {
                content: Content::Bytes(Arc::new(data.into())),
                mtime_ns,
            },
        )
    }

    /// Store an object of `len` bytes, all equal to `byte`, without allocating it.
    pub fn put_repeat(&self, bucket: &str, name: &str, byte: u8, len: u64, mtime_ns: i64) -> &Self {
        self.insert(
            bucket,
            name,
            MemoryObject {
                content: Content::Repeat { byte, len },
                mtime_ns,
            },
        )
    }

    fn insert(&self, bucket: &str, name: &str, object: MemoryObject) -> &Self {
        lock(&self.inner.buckets)
            .entry(bucket.to_string())
            .or_default()
            .insert(name.to_string(), object);
        self
    }

    /// Keep listing `bucket/name` but answer `get_object` with not-found.
    pub fn mark_missing(&self, bucket: &str, name: &str) -> &Self {
        lock(&self.inner.faults)
            .missing
            .insert((bucket.to_string(), name.to_string()));
        self
    }

    /// Streams of `bucket/name` end one byte early while the handle still reports the full size.
    pub fn mark_short_read(&self, bucket: &str, name: &str) -> &Self {
        lock(&self.inner.faults)
            .short_reads
            .insert((bucket.to_string(), name.to_string()));
        self
    }

    /// Listing `bucket` fails after yielding nothing.
    pub fn fail_listing(&self, bucket: &str) -> &Self {
        lock(&self.inner.faults)
            .failing_buckets
            .insert(bucket.to_string());
        self
    }

    /// Every `get_object` call sleeps for `delay` first (a slow remote call).
    pub fn delay_get_object(&self, delay: Duration) -> &Self {
        lock(&self.inner.faults).get_delay = Some(delay);
        self
    }

    /// `get_object` for `bucket/name` sleeps for `delay` first. Overrides [`delay_get_object`](Self::delay_get_object).
    pub fn delay_object(&self, bucket: &str, name: &str, delay: Duration) -> &Self {
        lock(&self.inner.faults)
            .object_delays
            .insert((bucket.to_string(), name.to_string()), delay);
        self
    }

    /// Make `connect` fail.
    pub fn refuse_connections(&self) -> &Self {
        self.inner.refuse_connect.store(true, Ordering::SeqCst);
        self
    }

    pub fn counters(&self) -> &StoreCounters {
        &self.inner.counters
    }

    /// Full content of an object, for comparisons in tests.
    pub fn content_of(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        let buckets = lock(&self.inner.buckets);
        let object = buckets.get(bucket)?.get(name)?;
        Some(match &object.content {
            Content::Bytes(b) => b.as_ref().clone(),
            Content::Repeat { byte, len } => vec![*byte; *len as usize],
        })
    }
}

impl StoreConnector for MemoryStore {
    fn connect(&self) -> StoreResult<Box<dyn StoreClient>> {
        self.inner.counters.connects.fetch_add(1, Ordering::SeqCst);
        if self.inner.refuse_connect.load(Ordering::SeqCst) {
            return Err(StoreError::Connect("connection refused".to_string()));
        }
        Ok(Box::new(MemoryClient {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryClient {
    inner: Arc<Inner>,
}

impl StoreClient for MemoryClient {
    fn containers(&self) -> StoreResult<Vec<String>> {
        Ok(lock(&self.inner.buckets).keys().cloned().collect())
    }

    fn container_objects(&self, bucket: &str) -> StoreResult<ObjectListing<'_>> {
        self.inner.counters.listings.fetch_add(1, Ordering::SeqCst);
        if lock(&self.inner.faults).failing_buckets.contains(bucket) {
            let err = StoreError::Listing {
                bucket: bucket.to_string(),
                message: "injected listing failure".to_string(),
            };
            return Ok(Box::new(std::iter::once(Err(err))));
        }
        // Snapshot so the listing does not hold the lock while the caller blocks on a full queue.
        let objects: Vec<ObjectInfo> = lock(&self.inner.buckets)
            .get(bucket)
            .ok_or_else(|| StoreError::Listing {
                bucket: bucket.to_string(),
                message: "no such bucket".to_string(),
            })?
            .iter()
            .map(|(name, obj)| ObjectInfo {
                name: name.clone(),
                size: obj.content.len(),
                mtime_ns: obj.mtime_ns,
            })
            .collect();
        Ok(Box::new(objects.into_iter().map(Ok)))
    }

    fn get_object(&self, bucket: &str, name: &str) -> StoreResult<Box<dyn ObjectHandle>> {
        self.inner.counters.get_object.fetch_add(1, Ordering::SeqCst);
        let key = (bucket.to_string(), name.to_string());
        let (delay, missing, short_read) = {
            let faults = lock(&self.inner.faults);
            (
                faults.object_delays.get(&key).copied().or(faults.get_delay),
                faults.missing.contains(&key),
                faults.short_reads.contains(&key),
            )
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let not_found = || StoreError::NotFound {
            bucket: bucket.to_string(),
            name: name.to_string(),
        };
        if missing {
            return Err(not_found());
        }
        let object = lock(&self.inner.buckets)
            .get(bucket)
            .and_then(|b| b.get(name))
            .cloned()
            .ok_or_else(not_found)?;
        Ok(Box::new(MemoryHandle {
            object,
            short_read,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryHandle {
    object: MemoryObject,
    short_read: bool,
    inner: Arc<Inner>,
}

impl ObjectHandle for MemoryHandle {
    fn size(&self) -> u64 {
        self.object.content.len()
    }

    fn mtime_ns(&self) -> i64 {
        self.object.mtime_ns
    }

    fn as_stream(&self) -> StoreResult<Box<dyn Read + Send + '_>> {
        self.inner
            .counters
            .streams_opened
            .fetch_add(1, Ordering::SeqCst);
        let len = match self.short_read {
            true => self.size().saturating_sub(1),
            false => self.size(),
        };
        Ok(match &self.object.content {
            Content::Bytes(b) => Box::new(Cursor::new(b.as_slice()).take(len)),
            Content::Repeat { byte, .. } => Box::new(std::io::repeat(*byte).take(len)),
        })
    }

    fn download(&self, local_path: &std::path::Path) -> StoreResult<u64> {
        self.inner.counters.downloads.fetch_add(1, Ordering::SeqCst);
        let mut reader = self.as_stream()?;
        let mut file = std::fs::File::create(local_path)?;
        Ok(std::io::copy(&mut reader, &mut file)?)
    }
}
