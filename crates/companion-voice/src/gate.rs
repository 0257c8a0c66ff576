//! Avatar animation gate: a boolean derived from reply boundary markers.
//!
//! `is_first` raises the gate the moment its segment starts; `is_last` lowers
//! it after a short grace delay once the segment has finished. The grace delay
//! keeps the avatar from flickering to idle when a new reply begins right away.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The rendering side of the gate. The 3D engine maps this flag to its idle
/// or talking animation clip; this core never knows more than the boolean.
pub trait AnimationSink: Send + Sync {
    fn set_talking(&self, talking: bool);
}

/// Sink that discards the flag. Used when no avatar is mounted.
#[derive(Debug, Default)]
pub struct NullSink;

impl AnimationSink for NullSink {
    fn set_talking(&self, _talking: bool) {}
}

struct GateInner {
    sink: Arc<dyn AnimationSink>,
    grace: Duration,
    // Bumped on every raise; a pending delayed lower only fires if no raise
    // happened while it slept.
    epoch: AtomicU64,
}

/// Gate state shared between the drain loop and the grace-delay task.
#[derive(Clone)]
pub struct AnimationGate {
    inner: Arc<GateInner>,
}

impl AnimationGate {
    pub fn new(sink: Arc<dyn AnimationSink>, grace: Duration) -> Self {
        Self {
            inner: Arc::new(GateInner {
                sink,
                grace,
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// A reply's first segment started playing: raise immediately and cancel
    /// any pending lower from the previous reply.
    pub fn on_segment_start(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        debug!("gate: talking");
        self.inner.sink.set_talking(true);
    }

    /// The reply's last segment finished: lower after the grace delay, unless
    /// a new reply raised the gate in the meantime.
    pub fn on_reply_end(&self) {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.grace).await;
            if inner.epoch.load(Ordering::SeqCst) == epoch {
                debug!("gate: idle");
                inner.sink.set_talking(false);
            } else {
                debug!("gate: lower cancelled, new reply in flight");
            }
        });
    }

    /// Teardown path: lower immediately and invalidate pending delayed lowers.
    pub fn lower_now(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.sink.set_talking(false);
    }
}
