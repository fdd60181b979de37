//! Discoverer: enumerate buckets and their objects, emit one discovery task per relevant object.

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use std::sync::Arc;

use super::context::PipelineContext;
use super::messages::Messenger;
use super::queue::{PushError, push_or_cancel};
use crate::engine::tools::{bucket_selected, changed_since};
use crate::store::StoreClient;
use crate::{DiscoveryTask, ObjectMeta};

/// Counts reported at the end of a discovery run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryCounts {
    pub buckets: usize,
    pub changed: usize,
    pub accurate: usize,
    pub skipped_unchanged: usize,
    pub bucket_errors: usize,
}

impl DiscoveryCounts {
    pub fn queued(&self) -> usize {
        self.changed + self.accurate
    }
}

enum BucketOutcome {
    Done,
    Cancelled,
}

/// Number of committed enqueues after which workers are told the queue has a backlog.
fn filled_mark(queue_size: usize) -> usize {
    queue_size.saturating_sub(1).max(1)
}

/// Discoverer thread body. Owns the only discovery sender; returning drops it, which closes
/// the queue and tells workers discovery is over.
pub fn run_discovery(
    ctx: Arc<PipelineContext>,
    discovery_tx: Sender<DiscoveryTask>,
    messenger: &Messenger,
) -> Result<()> {
    let result = ctx
        .connector
        .connect()
        .context("connect to store")
        .and_then(|client| discover_all(&ctx, client.as_ref(), &discovery_tx, messenger));
    // Workers must never wait forever on the signal, whatever happened above.
    ctx.queue_filled.fire();
    let counts = result?;
    messenger.info(format!(
        "Discovery finished: {} buckets, {} changed, {} unchanged queued, {} unchanged skipped, {} bucket errors",
        counts.buckets,
        counts.changed,
        counts.accurate,
        counts.skipped_unchanged,
        counts.bucket_errors
    ));
    Ok(())
}

fn discover_all(
    ctx: &PipelineContext,
    client: &dyn StoreClient,
    tx: &Sender<DiscoveryTask>,
    messenger: &Messenger,
) -> Result<DiscoveryCounts> {
    let opts = &ctx.opts;
    let mut counts = DiscoveryCounts::default();
    let buckets = client.containers().context("list buckets")?;
    for bucket in buckets {
        if !bucket_selected(&bucket, &opts.buckets_include, &opts.buckets_exclude) {
            messenger.debug(2, format!("bucket '{}' filtered out", bucket));
            continue;
        }
        counts.buckets += 1;
        match discover_bucket(ctx, client, &bucket, tx, messenger, &mut counts) {
            Ok(BucketOutcome::Done) => {}
            Ok(BucketOutcome::Cancelled) => {
                messenger.debug(1, "discovery cancelled");
                break;
            }
            Err(e) => {
                counts.bucket_errors += 1;
                messenger.error(
                    format!("bucket '{}': {}", bucket, e),
                    Some("listing".to_string()),
                );
                if opts.fail_on_download_error {
                    return Err(e.context(format!("enumerate bucket '{}'", bucket)));
                }
            }
        }
    }
    Ok(counts)
}

fn discover_bucket(
    ctx: &PipelineContext,
    client: &dyn StoreClient,
    bucket: &str,
    tx: &Sender<DiscoveryTask>,
    messenger: &Messenger,
    counts: &mut DiscoveryCounts,
) -> Result<BucketOutcome> {
    let opts = &ctx.opts;
    let mark = filled_mark(opts.queue_size);
    for info in client.container_objects(bucket)? {
        let info = info?;
        let changed = changed_since(info.mtime_ns, ctx.last_run_ns);
        if !changed && !opts.accurate {
            counts.skipped_unchanged += 1;
            continue;
        }
        let task = DiscoveryTask {
            object: ObjectMeta {
                bucket: bucket.to_string(),
                name: info.name,
                size: info.size,
                mtime_ns: info.mtime_ns,
            },
            accurate_only: !changed,
        };
        match push_or_cancel(tx, task, &ctx.cancel) {
            Ok(()) => {}
            Err(PushError::Cancelled) | Err(PushError::Closed) => {
                return Ok(BucketOutcome::Cancelled);
            }
        }
        if changed {
            counts.changed += 1;
        } else {
            counts.accurate += 1;
        }
        if counts.queued() == mark && !ctx.queue_filled.is_fired() {
            messenger.debug(2, format!("discovery queue filled after {} tasks", mark));
            ctx.queue_filled.fire();
        }
    }
    Ok(BucketOutcome::Done)
}
