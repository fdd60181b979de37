use anyhow::Result;
use std::path::PathBuf;
use thiserror::Error;

use super::messages::Messenger;
use crate::ObjectMeta;
use crate::store::StoreError;

/// A problem with one object. Skipped or escalated according to `fail_on_download_error`.
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("temp file missing after download: {0}")]
    MissingTempFile(PathBuf),
}

/// Report an object error on the channel. With `fail_fast`, also return it as fatal so the
/// worker stops and the worker base turns it into `Abort`.
pub fn handle_object_error(
    messenger: &Messenger,
    object: &ObjectMeta,
    err: ObjectError,
    fail_fast: bool,
) -> Result<()> {
    let text = format!("{}: {}", object.key(), err);
    let cause = match &err {
        ObjectError::Store(StoreError::Io(io)) => Some(io.kind().to_string()),
        ObjectError::Store(e) if e.is_not_found() => Some("not found".to_string()),
        _ => None,
    };
    messenger.error(text.clone(), cause);
    if fail_fast {
        return Err(anyhow::anyhow!("aborting on download error: {}", text));
    }
    Ok(())
}
