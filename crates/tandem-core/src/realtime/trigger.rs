//! Coalescing sync request handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Cloneable, non-blocking handle for asking the orchestrator to sync.
///
/// Requests set a pending flag and wake the scheduler; any number of
/// requests made before the scheduler consumes the flag collapse into one.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    inner: Arc<TriggerInner>,
}

#[derive(Debug)]
struct TriggerInner {
    notify: Notify,
    pending: AtomicBool,
    accepting: AtomicBool,
    requests: AtomicU64,
}

impl Default for SyncTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTrigger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TriggerInner {
                notify: Notify::new(),
                pending: AtomicBool::new(false),
                accepting: AtomicBool::new(true),
                requests: AtomicU64::new(0),
            }),
        }
    }

    /// Ask for a sync. Returns `false` once the trigger has been closed.
    pub fn request(&self) -> bool {
        if !self.is_accepting() {
            return false;
        }
        self.inner.requests.fetch_add(1, Ordering::SeqCst);
        self.inner.pending.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
        true
    }

    /// Total accepted requests since creation.
    pub fn request_count(&self) -> u64 {
        self.inner.requests.load(Ordering::SeqCst)
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Stop accepting requests and wake the scheduler so it can exit.
    pub fn close(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    /// Wait for the next wake-up. May return spuriously; check `take_pending`.
    pub(crate) async fn notified(&self) {
        self.inner.notify.notified().await;
    }

    /// Consume the pending flag, returning whether a request was waiting.
    pub(crate) fn take_pending(&self) -> bool {
        self.inner.pending.swap(false, Ordering::SeqCst)
    }
}
