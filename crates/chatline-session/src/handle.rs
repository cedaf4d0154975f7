//! A cloneable handle for poking the session from external code.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use tokio_util::sync::CancellationToken;

/// A cloneable handle for poking the session from external code.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) stream_id: Arc<AtomicU64>,
    pub(crate) is_streaming: Arc<AtomicBool>,
    pub(crate) idle_notify: Arc<tokio::sync::Notify>,
}

impl SessionHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            shutdown: CancellationToken::new(),
            stream_id: Arc::new(AtomicU64::new(0)),
            is_streaming: Arc::new(AtomicBool::new(false)),
            idle_notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Abort the current send. The placeholder is failed with whatever text
    /// it already holds.
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    /// Abort the current send and stop background refreshing.
    pub fn shutdown(&self) {
        self.abort();
        self.shutdown.cancel();
    }

    /// Whether a send is currently reading a response.
    pub fn is_streaming(&self) -> bool {
        self.is_streaming.load(Ordering::Acquire)
    }

    /// Wait until no send is in progress.
    pub async fn wait_for_idle(&self) {
        let notified = self.idle_notify.notified();
        if !self.is_streaming() {
            return;
        }
        notified.await;
    }

    /// Wait until idle, with a timeout.
    /// Returns `true` if idle was reached, `false` on timeout.
    pub async fn wait_for_idle_timeout(&self, timeout: std::time::Duration) -> bool {
        if !self.is_streaming() {
            return true;
        }
        tokio::time::timeout(timeout, self.wait_for_idle())
            .await
            .is_ok()
    }

    /// Install a fresh cancellation token for a new send.
    pub(crate) fn begin_stream(&self) -> (u64, CancellationToken) {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        let id = self.stream_id.fetch_add(1, Ordering::AcqRel) + 1;
        self.is_streaming.store(true, Ordering::Release);
        (id, token)
    }

    /// Mark the send `id` as done. A send superseded by a newer one leaves
    /// the flag alone.
    pub(crate) fn end_stream(&self, id: u64) {
        if self.stream_id.load(Ordering::Acquire) != id {
            return;
        }
        self.is_streaming.store(false, Ordering::Release);
        self.idle_notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_abort_cancels_current_token() {
        let handle = SessionHandle::new();
        let (_, token) = handle.begin_stream();
        assert!(!token.is_cancelled());
        handle.abort();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_new_stream_gets_fresh_token() {
        let handle = SessionHandle::new();
        handle.abort();
        let (_, token) = handle.begin_stream();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_superseded_stream_keeps_flag() {
        let handle = SessionHandle::new();
        let (old, _) = handle.begin_stream();
        let (new, _) = handle.begin_stream();
        handle.end_stream(old);
        assert!(handle.is_streaming());
        handle.end_stream(new);
        assert!(!handle.is_streaming());
    }

    #[tokio::test]
    async fn test_wait_for_idle() {
        let handle = SessionHandle::new();
        assert!(handle.wait_for_idle_timeout(Duration::from_millis(10)).await);

        let (id, _) = handle.begin_stream();
        assert!(!handle.wait_for_idle_timeout(Duration::from_millis(10)).await);

        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.wait_for_idle().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.end_stream(id);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("idle reached")
            .unwrap();
    }
}
