//! Session protocol engine: the event-driven state machine behind the
//! listener.
//!
//! One client is served at a time; when a connection ends the engine loops
//! back to accept. Inbound records are parsed in two steps (loose header,
//! then the concrete event struct) and run through the acceptance rules
//! before dispatch. Protocol milestones travel to the coordinator on an
//! event channel; the engine itself only talks to the RPC client, the state
//! poller, and the wire.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use streamhost_transport::{
    read_frame, CancellationToken, CancellationTokenSource, FrameWriter, TransportError,
};
use streamhost_wire::{
    BarcodePayload, MessageHeader, RequestConnection, ServerId, ServerMessage,
    SessionInformation, SessionStatus, SessionStatusDidChange, EVENT_REQUEST_BARCODE_PRESENTATION,
    EVENT_REQUEST_CONNECTION, EVENT_REQUEST_SESSION_DISCONNECT, EVENT_SESSION_STATUS_DID_CHANGE,
    PROTOCOL_VERSION,
};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::{HostError, HostResult};
use crate::poller::MediaStatePoller;
use crate::rpc::{FingerprintAlgorithm, MediaServiceRpc, RpcError, MEDIA_SERVICE_VERSION};

/// Hard upper bound on engine teardown.
pub const DISPOSE_TIMEOUT: Duration = Duration::from_secs(3);

const LISTEN_BACKLOG: u32 = 64;

/// Protocol milestones forwarded to the coordinator.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A `RequestConnection` was accepted and the session is live; the
    /// pairing payload is ready for barcode generation.
    SessionEstablished(SessionInformation),
    /// The client announced a lifecycle transition.
    StatusChanged(SessionStatus),
    /// The client asked for the pairing QR to be shown.
    BarcodeRequested(SessionInformation),
    /// A connection attempt or protocol step failed.
    ConnectionError(String),
    /// `MediaStreamIsReady` went out for the active session.
    MediaStreamReady { session_id: String },
    /// The client ended the session; the coordinator restarts the world.
    DisconnectRequested,
}

enum Flow {
    Continue,
    Close,
}

struct EngineShared {
    force_barcode: bool,
    server_id: ServerId,
    rpc: Arc<dyn MediaServiceRpc>,
    poller: Arc<MediaStatePoller>,
    events: mpsc::Sender<SessionEvent>,
    active: StdMutex<Option<SessionInformation>>,
    writer: Mutex<Option<Arc<FrameWriter>>>,
}

impl EngineShared {
    fn active_session_id(&self) -> Option<String> {
        self.active
            .lock()
            .ok()
            .and_then(|active| active.as_ref().map(|info| info.session_id.clone()))
    }

    fn active_session(&self) -> Option<SessionInformation> {
        self.active.lock().ok().and_then(|active| active.clone())
    }

    fn store_session(&self, info: SessionInformation) {
        if let Ok(mut active) = self.active.lock() {
            *active = Some(info);
        }
    }

    /// Clears the active session iff it matches `session_id`; returns
    /// whether anything was cleared.
    fn clear_session(&self, session_id: &str) -> bool {
        if let Ok(mut active) = self.active.lock() {
            if active
                .as_ref()
                .is_some_and(|info| info.session_id == session_id)
            {
                *active = None;
                return true;
            }
        }
        false
    }

    async fn emit(&self, event: SessionEvent) {
        // A departed coordinator means teardown is already in motion.
        let _ = self.events.send(event).await;
    }

    async fn send_message(
        &self,
        writer: &FrameWriter,
        message: &ServerMessage,
        cancel: &CancellationToken,
    ) -> HostResult<()> {
        let payload = serde_json::to_vec(message)?;
        writer.write_frame(&payload, cancel).await?;
        Ok(())
    }

    async fn send_disconnect_for(
        &self,
        writer: &FrameWriter,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> HostResult<()> {
        self.send_message(
            writer,
            &ServerMessage::RequestSessionDisconnect {
                session_id: session_id.to_owned(),
            },
            cancel,
        )
        .await
    }
}

/// The session listener plus its accept task.
pub struct SessionEngine {
    shared: Arc<EngineShared>,
    cancel: CancellationTokenSource,
    accept_task: StdMutex<Option<JoinHandle<()>>>,
    local_addr: SocketAddr,
}

impl SessionEngine {
    /// Binds the listener and starts accepting.
    pub async fn bind(
        endpoint: SocketAddr,
        force_barcode: bool,
        server_id: ServerId,
        rpc: Arc<dyn MediaServiceRpc>,
        poller: Arc<MediaStatePoller>,
        events: mpsc::Sender<SessionEvent>,
    ) -> HostResult<Self> {
        let socket = if endpoint.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(endpoint)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(EngineShared {
            force_barcode,
            server_id,
            rpc,
            poller,
            events,
            active: StdMutex::new(None),
            writer: Mutex::new(None),
        });

        let (cancel, token) = CancellationTokenSource::new();
        let accept_task = tokio::spawn(accept_loop(Arc::clone(&shared), listener, token));
        tracing::info!(%local_addr, "session listener started");

        Ok(Self {
            shared,
            cancel,
            accept_task: StdMutex::new(Some(accept_task)),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of the active session, if any.
    pub fn active_session(&self) -> Option<SessionInformation> {
        self.shared.active_session()
    }

    /// Host-initiated disconnect: clears the active session iff it matches,
    /// then best-effort writes the disconnect frame if a client is attached.
    pub async fn send_disconnect(&self, session_id: &str) {
        self.shared.clear_session(session_id);
        let writer = self.shared.writer.lock().await.clone();
        if let Some(writer) = writer {
            let token = self.cancel.token();
            if let Err(err) = self
                .shared
                .send_disconnect_for(&writer, session_id, &token)
                .await
            {
                tracing::debug!(error = %err, "disconnect frame not delivered");
            }
        }
    }

    /// Tears the engine down within [`DISPOSE_TIMEOUT`].
    ///
    /// A watchdog flips cancellation at the deadline if nothing else has;
    /// then a best-effort disconnect goes out for the active session, the
    /// accept loop is cancelled, and its task is awaited. Sockets close as
    /// the loop unwinds.
    pub async fn shutdown(&self) {
        let watchdog = {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(DISPOSE_TIMEOUT).await;
                if !cancel.is_cancelled() {
                    tracing::warn!("engine teardown exceeded deadline; forcing cancellation");
                    cancel.cancel();
                }
            })
        };

        if let Some(session_id) = self.shared.active_session_id() {
            self.send_disconnect(&session_id).await;
        }

        self.cancel.cancel();
        let task = self.accept_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            let _ = task.await;
        }
        watchdog.abort();
        *self.shared.writer.lock().await = None;
        tracing::debug!("session listener stopped");
    }
}

async fn accept_loop(shared: Arc<EngineShared>, listener: TcpListener, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                continue;
            }
        };
        tracing::debug!(%peer, "client connected");

        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(error = %err, "could not set NODELAY");
        }
        if let Err(err) = stream.set_linger(None) {
            tracing::debug!(error = %err, "could not disable linger");
        }

        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(FrameWriter::new(Box::pin(write_half)));
        *shared.writer.lock().await = Some(Arc::clone(&writer));

        let result = serve_connection(&shared, read_half, &writer, &cancel).await;
        *shared.writer.lock().await = None;

        match result {
            Ok(()) => tracing::debug!(%peer, "connection closed"),
            Err(HostError::Transport(TransportError::PeerClosed)) => {
                tracing::debug!(%peer, "peer closed the connection");
            }
            Err(HostError::Transport(TransportError::Canceled)) => break,
            Err(HostError::Transport(TransportError::BadFrame { reason })) => {
                tracing::warn!(%peer, %reason, "closing connection after bad frame");
            }
            Err(err) => tracing::warn!(%peer, error = %err, "connection failed"),
        }
    }
}

async fn serve_connection(
    shared: &Arc<EngineShared>,
    mut reader: OwnedReadHalf,
    writer: &FrameWriter,
    cancel: &CancellationToken,
) -> HostResult<()> {
    loop {
        let payload = read_frame(&mut reader, cancel).await?;
        match handle_frame(shared, writer, &payload, cancel).await? {
            Flow::Continue => {}
            Flow::Close => return Ok(()),
        }
    }
}

async fn handle_frame(
    shared: &Arc<EngineShared>,
    writer: &FrameWriter,
    payload: &str,
    cancel: &CancellationToken,
) -> HostResult<Flow> {
    // First pass: discriminator and session id only. Anything that fails
    // here is dropped without closing the connection.
    let header: MessageHeader = match serde_json::from_str(payload) {
        Ok(header) => header,
        Err(err) => {
            tracing::debug!(error = %err, "ignoring malformed frame");
            return Ok(Flow::Continue);
        }
    };
    let (event, session_id) = match (header.event, header.session_id) {
        (Some(event), Some(session_id)) => (event, session_id),
        _ => {
            tracing::debug!("ignoring frame without Event/SessionID");
            return Ok(Flow::Continue);
        }
    };

    let active_id = shared.active_session_id();
    if event == EVENT_REQUEST_CONNECTION {
        if active_id.is_some() {
            tracing::warn!(
                session_id = %session_id,
                "connection request while a session is active"
            );
            shared
                .send_disconnect_for(writer, &session_id, cancel)
                .await?;
            return Ok(Flow::Continue);
        }
    } else if active_id.as_deref() != Some(session_id.as_str()) {
        tracing::warn!(session_id = %session_id, "message for a foreign session");
        shared
            .send_disconnect_for(writer, &session_id, cancel)
            .await?;
        return Ok(Flow::Continue);
    }

    match event.as_str() {
        EVENT_REQUEST_CONNECTION => handle_request_connection(shared, writer, payload, cancel).await,
        EVENT_REQUEST_BARCODE_PRESENTATION => {
            handle_barcode_presentation(shared, writer, &session_id, cancel).await
        }
        EVENT_SESSION_STATUS_DID_CHANGE => {
            handle_status_change(shared, writer, payload, cancel).await
        }
        EVENT_REQUEST_SESSION_DISCONNECT => handle_peer_disconnect(shared, &session_id).await,
        other => {
            tracing::debug!(event = %other, "ignoring unknown event");
            Ok(Flow::Continue)
        }
    }
}

/// A failed RPC call aborts the current protocol step: the client gets a
/// disconnect for the session the step belonged to and the connection
/// stays open.
async fn abort_step(
    shared: &Arc<EngineShared>,
    writer: &FrameWriter,
    session_id: &str,
    err: RpcError,
    cancel: &CancellationToken,
) -> HostResult<Flow> {
    tracing::error!(session_id = %session_id, error = %err, "protocol step failed");
    shared
        .emit(SessionEvent::ConnectionError(err.to_string()))
        .await;
    shared.clear_session(session_id);
    shared.send_disconnect_for(writer, session_id, cancel).await?;
    Ok(Flow::Continue)
}

async fn handle_request_connection(
    shared: &Arc<EngineShared>,
    writer: &FrameWriter,
    payload: &str,
    cancel: &CancellationToken,
) -> HostResult<Flow> {
    let request: RequestConnection = match serde_json::from_str(payload) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!(error = %err, "ignoring malformed connection request");
            return Ok(Flow::Continue);
        }
    };

    if request.protocol_version != PROTOCOL_VERSION {
        let message = format!(
            "client requested protocol version {:?}, host speaks {PROTOCOL_VERSION}",
            request.protocol_version
        );
        tracing::warn!(session_id = %request.session_id, %message, "rejecting connection");
        shared
            .send_disconnect_for(writer, &request.session_id, cancel)
            .await?;
        shared.emit(SessionEvent::ConnectionError(message)).await;
        return Ok(Flow::Close);
    }

    let client_token = match shared.rpc.issue_client_token(&request.client_id).await {
        Ok(token) => token,
        Err(err) => return abort_step(shared, writer, &request.session_id, err, cancel).await,
    };
    let fingerprint = match shared
        .rpc
        .certificate_fingerprint(FingerprintAlgorithm::Sha256)
        .await
    {
        Ok(fingerprint) => fingerprint,
        Err(err) => return abort_step(shared, writer, &request.session_id, err, cancel).await,
    };

    let info = SessionInformation {
        session_id: request.session_id.clone(),
        client_id: request.client_id.clone(),
        barcode: BarcodePayload {
            client_token,
            certificate_fingerprint: fingerprint.clone(),
        },
    };
    shared.store_session(info.clone());
    shared.emit(SessionEvent::SessionEstablished(info)).await;

    // Omitting the fingerprint (rather than sending null) is what tells the
    // client to always run the QR pairing flow.
    let ack = ServerMessage::AcknowledgeConnection {
        session_id: request.session_id.clone(),
        server_id: shared.server_id.clone(),
        certificate_fingerprint: (!shared.force_barcode).then_some(fingerprint),
    };
    shared.send_message(writer, &ack, cancel).await?;
    tracing::info!(session_id = %request.session_id, "session established");
    Ok(Flow::Continue)
}

async fn handle_barcode_presentation(
    shared: &Arc<EngineShared>,
    writer: &FrameWriter,
    session_id: &str,
    cancel: &CancellationToken,
) -> HostResult<Flow> {
    let Some(info) = shared.active_session() else {
        return Ok(Flow::Continue);
    };
    shared.emit(SessionEvent::BarcodeRequested(info)).await;
    shared
        .send_message(
            writer,
            &ServerMessage::AcknowledgeBarcodePresentation {
                session_id: session_id.to_owned(),
            },
            cancel,
        )
        .await?;
    Ok(Flow::Continue)
}

async fn handle_status_change(
    shared: &Arc<EngineShared>,
    writer: &FrameWriter,
    payload: &str,
    cancel: &CancellationToken,
) -> HostResult<Flow> {
    let change: SessionStatusDidChange = match serde_json::from_str(payload) {
        Ok(change) => change,
        Err(err) => {
            tracing::debug!(error = %err, "ignoring malformed status change");
            return Ok(Flow::Continue);
        }
    };
    tracing::info!(session_id = %change.session_id, status = %change.status, "session status");
    shared.emit(SessionEvent::StatusChanged(change.status)).await;

    match change.status {
        SessionStatus::Waiting => {
            if let Err(err) = shared.rpc.start_service(MEDIA_SERVICE_VERSION).await {
                return abort_step(shared, writer, &change.session_id, err, cancel).await;
            }
            shared.poller.await_runtime_matches(true, cancel).await?;

            shared
                .send_message(
                    writer,
                    &ServerMessage::MediaStreamIsReady {
                        session_id: change.session_id.clone(),
                    },
                    cancel,
                )
                .await?;
            shared
                .emit(SessionEvent::MediaStreamReady {
                    session_id: change.session_id,
                })
                .await;
            Ok(Flow::Continue)
        }
        SessionStatus::Disconnected => {
            shared.clear_session(&change.session_id);
            shared.emit(SessionEvent::DisconnectRequested).await;
            Ok(Flow::Close)
        }
        _ => Ok(Flow::Continue),
    }
}

/// Inbound `RequestSessionDisconnect` for the active session: the client is
/// done; treat it like an announced disconnect.
async fn handle_peer_disconnect(
    shared: &Arc<EngineShared>,
    session_id: &str,
) -> HostResult<Flow> {
    shared.clear_session(session_id);
    shared.emit(SessionEvent::DisconnectRequested).await;
    Ok(Flow::Close)
}
