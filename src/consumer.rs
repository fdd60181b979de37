//! Reading download tasks on the consumer side.
//!
//! Every content-bearing task is read through a [`VerifiedReader`], which fails with
//! `InvalidData` when the byte count at end of stream differs from the task's size.
//! `TempFile` content is deleted once it has been read (or the read was abandoned).

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use crate::store::StoreError;
use crate::utils::config::COPY_BUFFER_SIZE;
use crate::utils::tempfiles::remove_file_logged;
use crate::{Task, TaskData};

/// Reader that counts bytes and checks the total against `expected` at end of stream.
pub struct VerifiedReader<R> {
    inner: R,
    expected: u64,
    read: u64,
}

impl<R: Read> VerifiedReader<R> {
    pub fn new(inner: R, expected: u64) -> Self {
        VerifiedReader {
            inner,
            expected,
            read: 0,
        }
    }

    /// Bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<R: Read> Read for VerifiedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        if self.read > self.expected || (n == 0 && !buf.is_empty() && self.read != self.expected) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "stream length mismatch: expected {} bytes, read {}",
                    self.expected, self.read
                ),
            ));
        }
        Ok(n)
    }
}

/// Deletes a staged temp file when dropped.
struct TempFileGuard(PathBuf);

impl TempFileGuard {
    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        remove_file_logged(&self.0);
    }
}

/// Run `f` over the task's content. Returns `None` for `Accurate` tasks, which carry no content.
pub fn read_task<T, F>(task: Task, f: F) -> Result<Option<T>>
where
    F: FnOnce(&mut dyn Read) -> io::Result<T>,
{
    let key = task.object.key();
    let size = task.object.size;
    let out = match task.data {
        TaskData::Accurate => return Ok(None),
        TaskData::Downloaded(buf) => {
            let mut reader = VerifiedReader::new(io::Cursor::new(buf), size);
            f(&mut reader)
        }
        TaskData::TempFile(path) => {
            let guard = TempFileGuard(path);
            let file = File::open(guard.path())
                .with_context(|| format!("{}: open temp file {}", key, guard.path().display()))?;
            let mut reader = VerifiedReader::new(BufReader::with_capacity(COPY_BUFFER_SIZE, file), size);
            f(&mut reader)
        }
        TaskData::Stream(handle) => {
            let stream = handle
                .as_stream()
                .with_context(|| format!("{}: open stream", key))?;
            let mut reader = VerifiedReader::new(stream, size);
            f(&mut reader)
        }
    };
    out.map(Some).with_context(|| format!("{}: read content", key))
}

/// Copy the task's content into `writer`. Returns the byte count, or `None` for `Accurate` tasks.
pub fn copy_task<W: Write + ?Sized>(task: Task, writer: &mut W) -> Result<Option<u64>> {
    read_task(task, |reader| io::copy(reader, writer))
}

/// Read the whole content into memory. Returns `None` for `Accurate` tasks.
pub fn read_task_to_vec(task: Task) -> Result<Option<Vec<u8>>> {
    read_task(task, |reader| {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

/// True if `err` came from the object itself (length mismatch or a store failure while
/// opening or reading it) rather than from the local side.
pub fn is_content_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.is::<StoreError>()
            || cause
                .downcast_ref::<io::Error>()
                .is_some_and(|e| e.kind() == io::ErrorKind::InvalidData)
    })
}
