//! Download workers: turn discovery tasks into download tasks, picking a materialization
//! strategy from the object's size.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use super::context::PipelineContext;
use super::error_handler::{ObjectError, handle_object_error};
use super::messages::Messenger;
use super::queue::{Popped, pop_or_cancel, push_or_cancel};
use crate::store::{ObjectHandle, StoreClient};
use crate::utils::tempfiles::{remove_file_logged, unique_temp_path};
use crate::{DiscoveryTask, Task, TaskData, TaskType};

/// Largest up-front buffer reservation for in-memory reads; the buffer still grows past it.
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

/// Size tier for an object: `Downloaded` below `in_memory_threshold`, `TempFile` up to
/// `prefetch_size`, `Stream` from `prefetch_size` on.
pub fn choose_tier(size: u64, in_memory_threshold: u64, prefetch_size: u64) -> TaskType {
    if size < in_memory_threshold {
        TaskType::Downloaded
    } else if size < prefetch_size {
        TaskType::TempFile
    } else {
        TaskType::Stream
    }
}

/// Worker thread body. Returning drops this worker's download sender.
pub fn run_worker(
    ctx: Arc<PipelineContext>,
    discovery_rx: Receiver<DiscoveryTask>,
    download_tx: Sender<Task>,
    messenger: &Messenger,
) -> Result<()> {
    let client = ctx.connector.connect().context("connect to store")?;

    if !ctx.queue_filled.wait_or(&ctx.cancel) {
        return Ok(());
    }

    let mut produced = 0_usize;
    loop {
        let task = match pop_or_cancel(&discovery_rx, &ctx.cancel) {
            Popped::Item(task) => task,
            Popped::Closed => break,
            Popped::Cancelled => return Ok(()),
        };
        let object = task.object.clone();
        match materialize(&ctx, client.as_ref(), task, messenger) {
            Ok(ready) => {
                if push_or_cancel(&download_tx, ready, &ctx.cancel).is_err() {
                    return Ok(());
                }
                produced += 1;
            }
            Err(e) => {
                handle_object_error(messenger, &object, e, ctx.opts.fail_on_download_error)?
            }
        }
    }
    messenger.debug(1, format!("no more discovery tasks, produced {}", produced));
    Ok(())
}

/// Convert one discovery task into a download task.
fn materialize(
    ctx: &PipelineContext,
    client: &dyn StoreClient,
    task: DiscoveryTask,
    messenger: &Messenger,
) -> Result<Task, ObjectError> {
    let DiscoveryTask {
        mut object,
        accurate_only,
    } = task;
    if accurate_only {
        return Ok(Task {
            object,
            data: TaskData::Accurate,
        });
    }

    let handle = client.get_object(&object.bucket, &object.name)?;
    if handle.size() != object.size {
        messenger.debug(
            1,
            format!(
                "{}: size changed since listing ({} -> {})",
                object.key(),
                object.size,
                handle.size()
            ),
        );
        object.size = handle.size();
    }

    let opts = &ctx.opts;
    let data = match choose_tier(object.size, opts.in_memory_threshold, opts.prefetch_size) {
        TaskType::Downloaded => TaskData::Downloaded(read_fully(handle.as_ref(), object.size)?),
        TaskType::TempFile => {
            TaskData::TempFile(download_to_temp(handle.as_ref(), &ctx.work_dir, object.size)?)
        }
        _ => TaskData::Stream(handle),
    };
    messenger.debug(3, format!("{} -> {:?}", object.key(), data));
    Ok(Task { object, data })
}

fn read_fully(handle: &dyn ObjectHandle, expected: u64) -> Result<Vec<u8>, ObjectError> {
    let mut buf = Vec::with_capacity(expected.min(MAX_PREALLOC) as usize);
    let mut reader = handle.as_stream()?;
    reader
        .read_to_end(&mut buf)
        .map_err(crate::store::StoreError::from)?;
    let actual = buf.len() as u64;
    if actual != expected {
        return Err(ObjectError::SizeMismatch { expected, actual });
    }
    Ok(buf)
}

fn download_to_temp(
    handle: &dyn ObjectHandle,
    work_dir: &Path,
    expected: u64,
) -> Result<std::path::PathBuf, ObjectError> {
    let path = unique_temp_path(work_dir);
    if let Err(e) = handle.download(&path) {
        remove_file_logged(&path);
        return Err(e.into());
    }
    let actual = match std::fs::metadata(&path) {
        Ok(meta) => meta.len(),
        Err(_) => return Err(ObjectError::MissingTempFile(path)),
    };
    if actual != expected {
        remove_file_logged(&path);
        return Err(ObjectError::SizeMismatch { expected, actual });
    }
    Ok(path)
}
