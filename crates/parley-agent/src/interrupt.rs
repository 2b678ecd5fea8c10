use crate::{ApprovalRejected, PermissionGate};
use parley_sdk::{AbortSignal, ExchangeControl};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Cooperative cancellation for one session.
///
/// Firing the shared signal is what stops the processing loop. The stop
/// request sent to the remote service afterwards is advisory and bounded.
#[derive(Default)]
pub struct InterruptController {
    signal: Mutex<AbortSignal>,
    stop_requested: AtomicBool,
    control: Mutex<Option<Arc<dyn ExchangeControl>>>,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh signal for a new run of the processing loop.
    pub fn arm(&self) -> AbortSignal {
        let signal = AbortSignal::new();
        *self.signal.lock().expect("interrupt signal mutex poisoned") = signal.clone();
        self.stop_requested.store(false, Ordering::SeqCst);
        signal
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal
            .lock()
            .expect("interrupt signal mutex poisoned")
            .clone()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn attach(&self, control: Arc<dyn ExchangeControl>) {
        *self.control.lock().expect("interrupt control mutex poisoned") = Some(control);
    }

    pub(crate) fn detach(&self) {
        self.control
            .lock()
            .expect("interrupt control mutex poisoned")
            .take();
    }

    /// Stop the current run. Rejects every pending approval, then asks the
    /// remote service to stop, giving up after `timeout`.
    pub async fn interrupt(&self, gate: &PermissionGate, timeout: Duration) -> usize {
        let rejected = self.fire(gate);
        self.request_remote_stop(timeout).await;
        rejected
    }

    /// Set the stop flag, fire the signal and reject pending approvals.
    pub fn fire(&self, gate: &PermissionGate) -> usize {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.signal().abort();
        gate.reject_all(ApprovalRejected::Interrupted)
    }

    pub async fn request_remote_stop(&self, timeout: Duration) {
        let control = self
            .control
            .lock()
            .expect("interrupt control mutex poisoned")
            .clone();
        if let Some(control) = control {
            match tokio::time::timeout(timeout, control.interrupt()).await {
                Ok(Ok(())) => debug!("remote service acknowledged stop request"),
                Ok(Err(error)) => {
                    warn!(error = %error, "remote stop request failed; ignoring")
                }
                Err(_) => warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "remote stop request timed out; ignoring"
                ),
            }
        }
    }
}
