use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Shared cooperative cancellation flag.
///
/// Clones observe the same signal. Once aborted a signal stays aborted; a
/// fresh signal is created for each processing run.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once [`AbortSignal::abort`] has been called, immediately if it
    /// already was.
    pub async fn aborted(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "current_thread")]
    async fn aborted_resolves_immediately_when_already_aborted() {
        let signal = AbortSignal::new();
        signal.abort();
        tokio::time::timeout(Duration::from_millis(50), signal.aborted())
            .await
            .expect("aborted() should resolve immediately");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn clones_share_abort_state_and_wake_waiters() {
        let signal = AbortSignal::new();
        let waiter = signal.clone();
        let task = tokio::spawn(async move {
            waiter.aborted().await;
            waiter.is_aborted()
        });
        tokio::task::yield_now().await;
        assert!(!signal.is_aborted());

        signal.abort();
        let observed = tokio::time::timeout(Duration::from_millis(200), task)
            .await
            .expect("waiter should wake")
            .expect("waiter task should not panic");
        assert!(observed);
    }
}
