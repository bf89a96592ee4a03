//! Top-level composition: validates configuration, wires the advertiser,
//! supervisor, RPC client, poller, and protocol engine together, translates
//! media state into presenter indicators, and restarts the whole part set
//! when a session disconnects.

use std::net::SocketAddr;
use std::sync::Arc;

use streamhost_transport::CancellationToken;
use streamhost_wire::{MediaServiceState, ServerId};
use tokio::sync::mpsc;

use crate::advertiser::{ServiceAdvertiser, ServiceRegistration};
use crate::config::HostConfig;
use crate::error::HostResult;
use crate::logsink::LogSink;
use crate::poller::MediaStatePoller;
use crate::presenter::{BonjourStatus, Presenter, SessionManagementStatus};
use crate::rpc::MediaServiceRpc;
use crate::session::{SessionEngine, SessionEvent};
use crate::supervisor::MediaServiceSupervisor;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// One generation of the coordinator's collaborators. A fresh set is built
/// for every (re)start so that teardown can be total.
pub struct HostParts {
    pub advertiser: Arc<dyn ServiceAdvertiser>,
    pub supervisor: Option<MediaServiceSupervisor>,
    pub rpc: Arc<dyn MediaServiceRpc>,
}

/// Builds a [`HostParts`] generation. The coordinator calls this once at
/// startup and again after every session disconnect.
pub trait PartsFactory: Send + Sync {
    fn build(&self) -> HostResult<HostParts>;
}

impl<F> PartsFactory for F
where
    F: Fn() -> HostResult<HostParts> + Send + Sync,
{
    fn build(&self) -> HostResult<HostParts> {
        self()
    }
}

enum RunOutcome {
    Restart,
    Shutdown,
}

/// The session coordinator.
pub struct SessionCoordinator {
    endpoint: SocketAddr,
    instance: String,
    bundle_id: String,
    force_barcode: bool,
    server_id: ServerId,
    presenter: Arc<dyn Presenter>,
    log_sink: Arc<dyn LogSink>,
    parts: Box<dyn PartsFactory>,
}

impl SessionCoordinator {
    /// Validates the configuration and prepares the coordinator. Fails with
    /// `InvalidConfiguration` before anything is constructed.
    pub fn new(
        config: &HostConfig,
        instance: String,
        server_id: ServerId,
        presenter: Arc<dyn Presenter>,
        log_sink: Arc<dyn LogSink>,
        parts: Box<dyn PartsFactory>,
    ) -> HostResult<Self> {
        let endpoint = config.validate()?;
        Ok(Self {
            endpoint,
            instance,
            bundle_id: config.bundle_id().to_owned(),
            force_barcode: config.force_barcode,
            server_id,
            presenter,
            log_sink,
            parts,
        })
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Runs until externally cancelled. A client-initiated disconnect tears
    /// the current generation down and immediately builds the next one on
    /// the same endpoint; from the presenter's viewpoint the restart is
    /// atomic.
    pub async fn run(&self, cancel: CancellationToken) -> HostResult<()> {
        loop {
            match self.run_generation(&cancel).await? {
                RunOutcome::Restart => {
                    self.log_sink
                        .append("[coordinator] session ended; restarting listener");
                    continue;
                }
                RunOutcome::Shutdown => return Ok(()),
            }
        }
    }

    async fn run_generation(&self, cancel: &CancellationToken) -> HostResult<RunOutcome> {
        let HostParts {
            advertiser,
            supervisor,
            rpc,
        } = self.parts.build()?;

        // L3 first. Failure degrades the Bonjour indicator but never stops
        // the host; the client may know the endpoint by other means.
        let registration = ServiceRegistration {
            instance: self.instance.clone(),
            port: self.endpoint.port(),
            addresses: vec![self.endpoint.ip()],
            bundle_id: self.bundle_id.clone(),
        };
        let bonjour = match advertiser.advertise(&registration) {
            Ok(()) => BonjourStatus::Running,
            Err(err) => {
                tracing::error!(error = %err, "mDNS advertisement failed");
                self.log_sink
                    .append(&format!("[coordinator] advertisement failed: {err}"));
                BonjourStatus::Error(err.to_string())
            }
        };

        let poller = Arc::new(MediaStatePoller::spawn(Arc::clone(&rpc)));
        let mut state_rx = poller.state_receiver();

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let engine = match SessionEngine::bind(
            self.endpoint,
            self.force_barcode,
            self.server_id.clone(),
            Arc::clone(&rpc),
            Arc::clone(&poller),
            events_tx,
        )
        .await
        {
            Ok(engine) => engine,
            Err(err) => {
                // The parts constructed so far must not outlive the failed
                // generation.
                poller.shutdown().await;
                let _ = rpc.close().await;
                if let Some(supervisor) = supervisor {
                    supervisor.shutdown().await;
                }
                advertiser.close();
                return Err(err);
            }
        };

        // Initial indicator values for this generation.
        self.presenter.bonjour_status_did_change(&bonjour);
        self.presenter
            .session_management_status_did_change(&translate_media_state(
                poller.current(),
                self.endpoint,
            ));
        self.log_sink.append(&format!(
            "[coordinator] listening on {} as {:?}",
            self.endpoint, self.instance
        ));

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break RunOutcome::Shutdown,

                event = events_rx.recv() => match event {
                    Some(event) => {
                        if let Some(outcome) = self.handle_session_event(event) {
                            break outcome;
                        }
                    }
                    // Engine gone without a disconnect event; treat as shutdown.
                    None => break RunOutcome::Shutdown,
                },

                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break RunOutcome::Shutdown;
                    }
                    let state = *state_rx.borrow();
                    self.presenter.session_management_status_did_change(
                        &translate_media_state(state, self.endpoint),
                    );
                }
            }
        };

        // Teardown in reverse construction order: engine, poller, RPC,
        // supervisor, advertiser.
        engine.shutdown().await;
        poller.shutdown().await;
        if let Err(err) = rpc.close().await {
            tracing::debug!(error = %err, "RPC close failed");
        }
        if let Some(supervisor) = supervisor {
            supervisor.shutdown().await;
        }
        advertiser.close();

        Ok(outcome)
    }

    fn handle_session_event(&self, event: SessionEvent) -> Option<RunOutcome> {
        match event {
            SessionEvent::SessionEstablished(info) => {
                self.log_sink.append(&format!(
                    "[coordinator] session {} established for client {}",
                    info.session_id, info.client_id
                ));
                self.presenter.generate_barcode(&info.barcode);
            }
            SessionEvent::StatusChanged(status) => {
                self.presenter.session_status_did_change(status);
            }
            SessionEvent::BarcodeRequested(info) => {
                self.presenter.barcode_presentation_requested(&info);
            }
            SessionEvent::ConnectionError(message) => {
                self.log_sink
                    .append(&format!("[coordinator] connection error: {message}"));
                self.presenter.connection_error_occurred(&message);
            }
            SessionEvent::MediaStreamReady { session_id } => {
                self.log_sink.append(&format!(
                    "[coordinator] media stream ready for session {session_id}"
                ));
            }
            SessionEvent::DisconnectRequested => return Some(RunOutcome::Restart),
        }
        None
    }
}

/// Media state → session-management indicator. All three flags up is
/// `Running`; none is `Stopped`; anything in between is `Paused` with the
/// missing pieces named.
fn translate_media_state(
    state: MediaServiceState,
    listening: SocketAddr,
) -> SessionManagementStatus {
    let up = [
        state.openxr_runtime_running,
        state.client_connected,
        state.game_connected,
    ];
    if up.iter().all(|&flag| flag) {
        return SessionManagementStatus::Running;
    }
    if up.iter().all(|&flag| !flag) {
        return SessionManagementStatus::Stopped { listening };
    }

    let mut waiting = Vec::new();
    if !state.openxr_runtime_running {
        waiting.push("OpenXR runtime");
    }
    if !state.client_connected {
        waiting.push("client");
    }
    if !state.game_connected {
        waiting.push("game");
    }
    SessionManagementStatus::Paused {
        details: format!("waiting for {}", waiting.join(", ")),
    }
}
