//! Pipeline components: discoverer, download workers, orchestrator, and the plumbing between them.
//!
//! Discoverer → discovery queue → workers → download queue → consumer.
//! Every thread reports on the message channel; the orchestrator reads it.

pub mod context;
pub mod discoverer;
pub mod error_handler;
pub mod messages;
pub mod orchestrator;
pub mod queue;
pub mod signal;
pub mod worker;
pub mod worker_base;

pub use context::{PipelineChannels, PipelineContext, create_pipeline_channels};
pub use discoverer::{DiscoveryCounts, run_discovery};
pub use error_handler::{ObjectError, handle_object_error};
pub use messages::{Message, Messenger, Role, message_channel};
pub use orchestrator::{NextTask, Orchestrator, PipelineStats, PipelineStatus, ShutdownReport};
pub use queue::{PushError, Popped, drain, pop_or_cancel, push_or_cancel};
pub use signal::Signal;
pub use worker::{choose_tier, run_worker};
pub use worker_base::{WorkerThread, spawn_worker};
