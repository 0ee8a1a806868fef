//! Single-writer, multi-waiter coordination primitive used to signal a
//! tail-following reader that new data has been appended, or that the
//! producer side is done.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    version: AtomicU64,
    eof: AtomicBool,
    notify: Notify,
}

/// Edge-triggered notify/wait primitive with a sticky EOF flag.
///
/// `notify()` advances a monotonic version counter and wakes every waiter;
/// `wait()` compares against the version it observed on entry so a
/// notification that fires between a waiter's last check and its call to
/// `wait()` is never lost.
#[derive(Clone, Debug, Default)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake all current and future-until-next-wait waiters, advancing the
    /// version counter.
    pub fn notify(&self) {
        self.inner.version.fetch_add(1, Ordering::AcqRel);
        self.inner.notify.notify_waiters();
    }

    /// Wait until the version advances past `since`, EOF is set, or
    /// `timeout` elapses. Returns `true` if woken by a real event, `false`
    /// on timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let seen = self.inner.version.load(Ordering::Acquire);
        if self.is_eof() {
            return true;
        }

        let notified = self.inner.notify.notified();
        tokio::pin!(notified);

        // Register interest before re-checking, to avoid a wake missed
        // between the check above and the subscribe below.
        notified.as_mut().enable();

        if self.inner.version.load(Ordering::Acquire) != seen || self.is_eof() {
            return true;
        }

        matches!(tokio::time::timeout(timeout, notified).await, Ok(())) || self.is_eof()
    }

    /// Mark the channel as done; sticky until `reset()`.
    pub fn set_eof(&self) {
        self.inner.eof.store(true, Ordering::Release);
        self.inner.version.fetch_add(1, Ordering::AcqRel);
        self.inner.notify.notify_waiters();
    }

    pub fn is_eof(&self) -> bool {
        self.inner.eof.load(Ordering::Acquire)
    }

    /// Clear EOF and advance the version so any stale waiters re-evaluate.
    pub fn reset(&self) {
        self.inner.eof.store(false, Ordering::Release);
        self.inner.version.fetch_add(1, Ordering::AcqRel);
        self.inner.notify.notify_waiters();
    }

    #[cfg(test)]
    pub(crate) fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }
}
