//! Progress counter for delivered tasks

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};

// Progress bar type alias
pub type ProgressBar = Arc<Mutex<Bar>>;

/// Create a counter for unknown total (shows count without percentage)
pub fn create_counter(desc: &'static str) -> ProgressBar {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = 0,
        desc = desc,
        animation = Animation::Classic,
        position = 0,
        unit = " objects"
    )))
}

/// Force a refresh of the bar (e.g. so counter shows "0 objects" immediately).
pub fn refresh_bar(pb: &ProgressBar) {
    if let Ok(mut bar) = pb.try_lock() {
        let _ = bar.refresh();
    }
}

/// Update progress bar if available
/// Uses try_lock so a contended bar never stalls the consumer loop.
pub fn update_progress_bar(pb: &ProgressBar, n: usize) {
    if let Ok(mut pb) = pb.try_lock() {
        let _ = pb.update(n);
    }
}

/// Counts delivered tasks and pushes them to the bar every `batch` items.
pub struct BatchedProgress {
    bar: Option<ProgressBar>,
    pending: usize,
    batch: usize,
}

impl BatchedProgress {
    pub fn new(bar: Option<ProgressBar>, batch: usize) -> Self {
        if let Some(b) = &bar {
            refresh_bar(b);
        }
        BatchedProgress {
            bar,
            pending: 0,
            batch: batch.max(1),
        }
    }

    pub fn tick(&mut self) {
        self.pending += 1;
        if self.pending >= self.batch {
            self.flush();
        }
    }

    /// Final update for the remainder after batched updates.
    pub fn flush(&mut self) {
        if let Some(bar) = &self.bar
            && self.pending > 0
        {
            update_progress_bar(bar, self.pending);
        }
        self.pending = 0;
    }
}
