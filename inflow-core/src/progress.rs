//! Loading progress reporting.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type ProgressSink = Box<dyn Fn(f64, f64) + Send + Sync>;

struct TrackerInner {
    active: AtomicBool,
    sink: Option<ProgressSink>,
}

/// Cloneable handle a running loader uses to report progress.
///
/// Progress is forwarded to the inflow's state stream as
/// `Loading(Progress { current, total })` while the load is running. Once
/// the load finishes the tracker is disabled and later calls are silently
/// ignored.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
}

impl ProgressTracker {
    /// Creates a tracker forwarding progress to `sink`.
    pub fn new(sink: impl Fn(f64, f64) + Send + Sync + 'static) -> Self {
        ProgressTracker {
            inner: Arc::new(TrackerInner {
                active: AtomicBool::new(true),
                sink: Some(Box::new(sink)),
            }),
        }
    }

    /// A tracker that discards all progress. Handy for manual loads and
    /// tests.
    pub fn noop() -> Self {
        ProgressTracker {
            inner: Arc::new(TrackerInner { active: AtomicBool::new(false), sink: None }),
        }
    }

    /// Reports progress as `current` out of `total` units.
    pub fn progress(&self, current: f64, total: f64) {
        if self.inner.active.load(Ordering::Acquire)
            && let Some(sink) = &self.inner.sink
        {
            sink(current, total);
        }
    }

    /// Disables the tracker; all subsequent reports are discarded.
    pub fn disable(&self) {
        self.inner.active.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("active", &self.inner.active.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn reports_until_disabled() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let tracker = ProgressTracker::new(move |c, t| sink_seen.lock().unwrap().push((c, t)));

        tracker.progress(1.0, 4.0);
        tracker.disable();
        tracker.progress(2.0, 4.0);

        assert_eq!(*seen.lock().unwrap(), vec![(1.0, 4.0)]);
    }

    #[test]
    fn noop_discards() {
        let tracker = ProgressTracker::noop();
        tracker.progress(1.0, 1.0);
    }
}
