//! Status channel from pipeline threads to the orchestrator.
//!
//! Unbounded multi-producer/single-consumer. Per-thread order is preserved; nothing is
//! promised across threads.

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::fmt;

/// Which pipeline component sent a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Discoverer,
    Worker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Discoverer => f.write_str("discoverer"),
            Role::Worker => f.write_str("worker"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// User-visible progress, relayed to the job log.
    Info { role: Role, id: usize, text: String },
    /// Internal diagnostics, relayed when `level` is within the configured debug level.
    Debug {
        role: Role,
        id: usize,
        level: u8,
        text: String,
    },
    /// Recoverable per-object problem.
    Error {
        role: Role,
        id: usize,
        text: String,
        cause: Option<String>,
    },
    /// Sent exactly once per thread, when its body has finished.
    Ready { role: Role, id: usize },
    /// Fatal, pipeline-wide problem. The sender still emits `Ready` afterwards.
    Abort { role: Role, id: usize, text: String },
}

impl Message {
    pub fn origin(&self) -> (Role, usize) {
        match self {
            Message::Info { role, id, .. }
            | Message::Debug { role, id, .. }
            | Message::Error { role, id, .. }
            | Message::Ready { role, id }
            | Message::Abort { role, id, .. } => (*role, *id),
        }
    }
}

pub fn message_channel() -> (Sender<Message>, Receiver<Message>) {
    unbounded()
}

/// Sending side bound to one thread's role and id.
///
/// Sends ignore a disconnected channel: once the orchestrator is gone nobody is listening.
#[derive(Clone, Debug)]
pub struct Messenger {
    tx: Sender<Message>,
    role: Role,
    id: usize,
}

impl Messenger {
    pub fn new(tx: Sender<Message>, role: Role, id: usize) -> Self {
        Messenger { tx, role, id }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn id(&self) -> usize {
        self.id
    }

    fn send(&self, msg: Message) {
        let _ = self.tx.send(msg);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.send(Message::Info {
            role: self.role,
            id: self.id,
            text: text.into(),
        });
    }

    pub fn debug(&self, level: u8, text: impl Into<String>) {
        self.send(Message::Debug {
            role: self.role,
            id: self.id,
            level,
            text: text.into(),
        });
    }

    pub fn error(&self, text: impl Into<String>, cause: Option<String>) {
        self.send(Message::Error {
            role: self.role,
            id: self.id,
            text: text.into(),
            cause,
        });
    }

    pub fn abort(&self, text: impl Into<String>) {
        self.send(Message::Abort {
            role: self.role,
            id: self.id,
            text: text.into(),
        });
    }

    pub fn ready(&self) {
        self.send(Message::Ready {
            role: self.role,
            id: self.id,
        });
    }
}
