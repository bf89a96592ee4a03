use std::sync::{Arc, Mutex};
use std::time::Duration;

use streamhost_transport::{CancellationToken, CancellationTokenSource, TransportError};
use streamhost_wire::MediaServiceState;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::HostResult;
use crate::rpc::MediaServiceRpc;

/// How often the media service is asked for a fresh status snapshot.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How often a waiter re-checks the last-observed state.
pub const STATE_POLL_DELAY: Duration = Duration::from_millis(50);

/// Periodically queries the media service and publishes state changes.
///
/// One task loops for the poller's lifetime: query, diff field-wise against
/// the last-observed snapshot, publish on change. An unreachable service or
/// an absent status both collapse to the all-false snapshot. Publication is
/// atomic (the whole struct is replaced) and subscribers are only woken for
/// actual changes.
pub struct MediaStatePoller {
    state_rx: watch::Receiver<MediaServiceState>,
    cancel: CancellationTokenSource,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MediaStatePoller {
    pub fn spawn(rpc: Arc<dyn MediaServiceRpc>) -> Self {
        let (state_tx, state_rx) = watch::channel(MediaServiceState::default());
        let (cancel, token) = CancellationTokenSource::new();
        let task = tokio::spawn(poll_loop(rpc, state_tx, token));
        Self {
            state_rx,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Last-observed snapshot.
    pub fn current(&self) -> MediaServiceState {
        *self.state_rx.borrow()
    }

    /// Subscription for change notifications.
    pub fn state_receiver(&self) -> watch::Receiver<MediaServiceState> {
        self.state_rx.clone()
    }

    /// Blocks until the last-observed runtime flag matches `expected`,
    /// re-checking every [`STATE_POLL_DELAY`]. Used to hold the handshake
    /// until a start or stop request has actually taken effect.
    pub async fn await_runtime_matches(
        &self,
        expected: bool,
        cancel: &CancellationToken,
    ) -> HostResult<()> {
        loop {
            if self.state_rx.borrow().openxr_runtime_running == expected {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Canceled.into()),
                _ = tokio::time::sleep(STATE_POLL_DELAY) => {}
            }
        }
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn poll_loop(
    rpc: Arc<dyn MediaServiceRpc>,
    state_tx: watch::Sender<MediaServiceState>,
    cancel: CancellationToken,
) {
    loop {
        let observed = match rpc.query_status().await {
            Ok(Some(state)) => state,
            Ok(None) => MediaServiceState::default(),
            Err(err) => {
                tracing::debug!(error = %err, "status query failed; treating service as down");
                MediaServiceState::default()
            }
        };

        state_tx.send_if_modified(|state| {
            if *state != observed {
                *state = observed;
                true
            } else {
                false
            }
        });

        tokio::task::yield_now().await;
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(STATUS_POLL_INTERVAL) => {}
        }
    }
}
