//! One-shot broadcast signal built on channel disconnection.
//!
//! Firing drops the only sender, so every clone's receiver becomes ready at once and stays
//! ready. That makes the signal usable inside a crossbeam `Select` next to a queue operation.

use crossbeam_channel::{Receiver, Select, Sender, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Signal {
    fired: Arc<AtomicBool>,
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    rx: Receiver<()>,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    pub fn new() -> Self {
        let (tx, rx) = bounded::<()>(0);
        Signal {
            fired: Arc::new(AtomicBool::new(false)),
            trigger: Arc::new(Mutex::new(Some(tx))),
            rx,
        }
    }

    /// Fire the signal. Idempotent.
    pub fn fire(&self) {
        self.fired.store(true, Ordering::SeqCst);
        let sender = match self.trigger.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Receiver that becomes ready (disconnected) once the signal fires. Never carries a value.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Block until fired.
    pub fn wait(&self) {
        let _ = self.rx.recv();
    }

    /// Block until fired or `timeout` elapses. Returns whether the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let _ = self.rx.recv_timeout(timeout);
        self.is_fired()
    }

    /// Block until either `self` or `other` fires. Returns true if `self` fired.
    pub fn wait_or(&self, other: &Signal) -> bool {
        let mut sel = Select::new();
        let mine = sel.recv(&self.rx);
        let theirs = sel.recv(&other.rx);
        let oper = sel.select();
        match oper.index() {
            i if i == mine => {
                let _ = oper.recv(&self.rx);
            }
            i if i == theirs => {
                let _ = oper.recv(&other.rx);
            }
            _ => unreachable!(),
        }
        self.is_fired()
    }
}
