//! Common lifecycle for every pipeline thread.
//!
//! Body → (`Abort` on failure or panic) → `Ready` → park until cancelled.
//! Parking keeps "work is done" apart from "thread may be reaped", so the orchestrator
//! can count ready threads before tearing anything down.

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use log::debug;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use super::messages::{Message, Messenger, Role};
use super::signal::Signal;

/// A running pipeline thread and its label for logs.
pub struct WorkerThread {
    pub label: String,
    pub handle: JoinHandle<()>,
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Spawn a pipeline thread running `body` under the common lifecycle.
///
/// `body` owns whatever queue ends it captures; they are dropped when it returns, before `Ready`.
pub fn spawn_worker<F>(
    role: Role,
    id: usize,
    messages: Sender<Message>,
    cancel: Signal,
    body: F,
) -> Result<WorkerThread>
where
    F: FnOnce(&Messenger, &Signal) -> Result<()> + Send + 'static,
{
    let label = format!("{role}-{id}");
    let handle = thread::Builder::new()
        .name(label.clone())
        .spawn(move || {
            let messenger = Messenger::new(messages, role, id);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&messenger, &cancel)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => messenger.abort(format!("{e:#}")),
                Err(payload) => {
                    messenger.abort(format!("thread panicked: {}", panic_text(payload.as_ref())))
                }
            }
            messenger.ready();
            cancel.wait();
            debug!("{}-{}: released", messenger.role(), messenger.id());
        })
        .with_context(|| format!("spawn {label} thread"))?;
    Ok(WorkerThread { label, handle })
}
