//! Pipeline context: queues and shared state handed to the discoverer and workers.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::path::PathBuf;
use std::sync::Arc;

use super::messages::{Message, message_channel};
use super::signal::Signal;
use crate::store::StoreConnector;
use crate::{DiscoveryTask, Opts, Task};

/// Read-only state shared by every pipeline thread.
pub struct PipelineContext {
    pub opts: Arc<Opts>,
    pub connector: Arc<dyn StoreConnector>,
    /// Objects with mtime at or before this (ns since epoch) are unchanged.
    pub last_run_ns: i64,
    /// Private temp directory for `TempFile` downloads.
    pub work_dir: PathBuf,
    /// Fired by the discoverer once the discovery queue has a backlog, or enumeration ended.
    pub queue_filled: Signal,
    /// Fired by the orchestrator to stop every thread.
    pub cancel: Signal,
}

/// Channels of one pipeline run. The discoverer takes `discovery_tx`, workers clone
/// `discovery_rx` and `download_tx`; the orchestrator keeps the rest.
pub struct PipelineChannels {
    pub discovery_tx: Sender<DiscoveryTask>,
    pub discovery_rx: Receiver<DiscoveryTask>,
    pub download_tx: Sender<Task>,
    pub download_rx: Receiver<Task>,
    pub message_tx: Sender<Message>,
    pub message_rx: Receiver<Message>,
}

pub fn create_pipeline_channels(queue_size: usize) -> PipelineChannels {
    let (discovery_tx, discovery_rx) = bounded::<DiscoveryTask>(queue_size);
    let (download_tx, download_rx) = bounded::<Task>(queue_size);
    let (message_tx, message_rx) = message_channel();
    PipelineChannels {
        discovery_tx,
        discovery_rx,
        download_tx,
        download_rx,
        message_tx,
        message_rx,
    }
}
