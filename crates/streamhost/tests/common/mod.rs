//! Shared fixtures for the protocol scenario tests: a scriptable media
//! service RPC, a recording presenter, and a framed TCP test client.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use streamhost::poller::MediaStatePoller;
use streamhost::presenter::{BonjourStatus, Presenter, SessionManagementStatus};
use streamhost::rpc::{FingerprintAlgorithm, MediaServiceRpc, RpcError, RpcResult};
use streamhost::session::{SessionEngine, SessionEvent};
use streamhost_transport::{
    read_frame, CancellationToken, CancellationTokenSource, FrameWriter, TransportError,
};
use streamhost_wire::{MediaServiceState, ServerId};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

pub const TEST_SERVER_ID: &str = "0123456789abcdef0123456789abcdef";
pub const TEST_CLIENT_TOKEN: &str = "T1";
pub const TEST_FINGERPRINT: &str = "F1";

/// Scriptable media service: `start_service` flips the runtime flag that the
/// poller observes, and individual calls can be made to fail.
pub struct MockMediaServiceRpc {
    pub running: AtomicBool,
    pub fail_issue_token: AtomicBool,
    pub fail_start_service: AtomicBool,
    pub started_versions: Mutex<Vec<String>>,
    pub closed: AtomicBool,
}

impl MockMediaServiceRpc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(false),
            fail_issue_token: AtomicBool::new(false),
            fail_start_service: AtomicBool::new(false),
            started_versions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn started_versions(&self) -> Vec<String> {
        self.started_versions.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaServiceRpc for MockMediaServiceRpc {
    async fn connect(&self) -> RpcResult<()> {
        Ok(())
    }

    async fn start_service(&self, version: &str) -> RpcResult<()> {
        if self.fail_start_service.load(Ordering::SeqCst) {
            return Err(RpcError::CallFailed("start refused".into()));
        }
        self.started_versions.lock().unwrap().push(version.to_owned());
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_service(&self) -> RpcResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn query_status(&self) -> RpcResult<Option<MediaServiceState>> {
        if self.running.load(Ordering::SeqCst) {
            Ok(Some(MediaServiceState {
                openxr_runtime_running: true,
                client_connected: false,
                game_connected: false,
            }))
        } else {
            Ok(None)
        }
    }

    async fn issue_client_token(&self, client_id: &str) -> RpcResult<String> {
        if self.fail_issue_token.load(Ordering::SeqCst) {
            return Err(RpcError::CallFailed(format!(
                "no token for client {client_id}"
            )));
        }
        Ok(TEST_CLIENT_TOKEN.to_owned())
    }

    async fn certificate_fingerprint(
        &self,
        _algorithm: FingerprintAlgorithm,
    ) -> RpcResult<String> {
        Ok(TEST_FINGERPRINT.to_owned())
    }

    async fn close(&self) -> RpcResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Everything the presenter was told, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenterCall {
    GenerateBarcode { token: String, fingerprint: String },
    SessionStatus(String),
    BarcodeRequested { session_id: String },
    ConnectionError(String),
    Bonjour(String),
    SessionManagement(String),
}

pub struct RecordingPresenter {
    calls: Mutex<Vec<PresenterCall>>,
}

impl RecordingPresenter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<PresenterCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Presenter for RecordingPresenter {
    fn generate_barcode(&self, payload: &streamhost_wire::BarcodePayload) {
        self.calls.lock().unwrap().push(PresenterCall::GenerateBarcode {
            token: payload.client_token.clone(),
            fingerprint: payload.certificate_fingerprint.clone(),
        });
    }

    fn session_status_did_change(&self, status: streamhost_wire::SessionStatus) {
        self.calls
            .lock()
            .unwrap()
            .push(PresenterCall::SessionStatus(status.to_string()));
    }

    fn barcode_presentation_requested(&self, session: &streamhost_wire::SessionInformation) {
        self.calls.lock().unwrap().push(PresenterCall::BarcodeRequested {
            session_id: session.session_id.clone(),
        });
    }

    fn connection_error_occurred(&self, message: &str) {
        self.calls
            .lock()
            .unwrap()
            .push(PresenterCall::ConnectionError(message.to_owned()));
    }

    fn bonjour_status_did_change(&self, status: &BonjourStatus) {
        self.calls
            .lock()
            .unwrap()
            .push(PresenterCall::Bonjour(status.to_string()));
    }

    fn session_management_status_did_change(&self, status: &SessionManagementStatus) {
        self.calls
            .lock()
            .unwrap()
            .push(PresenterCall::SessionManagement(status.to_string()));
    }
}

/// A client end speaking the framed protocol over a real TCP connection.
pub struct TestClient {
    reader: OwnedReadHalf,
    writer: FrameWriter,
    _cancel_source: CancellationTokenSource,
    cancel: CancellationToken,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        let (_cancel_source, cancel) = CancellationTokenSource::new();
        Self {
            reader,
            writer: FrameWriter::new(Box::pin(writer)),
            _cancel_source,
            cancel,
        }
    }

    pub async fn send_json(&self, value: serde_json::Value) {
        let payload = serde_json::to_vec(&value).unwrap();
        self.writer
            .write_frame(&payload, &self.cancel)
            .await
            .expect("send frame");
    }

    pub async fn send_empty_frame(&self) {
        self.writer
            .write_frame(b"", &self.cancel)
            .await
            .expect("send empty frame");
    }

    pub async fn recv(&mut self) -> serde_json::Value {
        let payload = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            read_frame(&mut self.reader, &self.cancel),
        )
        .await
        .expect("frame within timeout")
        .expect("readable frame");
        serde_json::from_str(&payload).expect("frame is JSON")
    }

    pub async fn recv_closed(&mut self) -> TransportError {
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            read_frame(&mut self.reader, &self.cancel),
        )
        .await
        .expect("close within timeout")
        .expect_err("expected the connection to be closed")
    }
}

/// Engine plus everything needed to drive and observe it.
pub struct EngineFixture {
    pub engine: SessionEngine,
    pub rpc: Arc<MockMediaServiceRpc>,
    pub poller: Arc<MediaStatePoller>,
    pub events: mpsc::Receiver<SessionEvent>,
    pub addr: SocketAddr,
}

impl EngineFixture {
    pub async fn start(force_barcode: bool) -> Self {
        let rpc = MockMediaServiceRpc::new();
        let poller = Arc::new(MediaStatePoller::spawn(rpc.clone() as Arc<dyn MediaServiceRpc>));
        let (events_tx, events) = mpsc::channel(16);
        let engine = SessionEngine::bind(
            "127.0.0.1:0".parse().unwrap(),
            force_barcode,
            ServerId::parse(TEST_SERVER_ID).unwrap(),
            rpc.clone() as Arc<dyn MediaServiceRpc>,
            Arc::clone(&poller),
            events_tx,
        )
        .await
        .expect("bind engine");
        let addr = engine.local_addr();
        Self {
            engine,
            rpc,
            poller,
            events,
            addr,
        }
    }

    pub async fn stop(self) {
        self.engine.shutdown().await;
        self.poller.shutdown().await;
    }

    pub async fn next_event(&mut self) -> SessionEvent {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.events.recv())
            .await
            .expect("event within timeout")
            .expect("event channel open")
    }
}

pub fn request_connection(session_id: &str, client_id: &str) -> serde_json::Value {
    serde_json::json!({
        "Event": "RequestConnection",
        "ProtocolVersion": "1",
        "StreamingProvider": "test-provider",
        "StreamingProviderVersion": "2.0",
        "UserInterfaceIdiom": "headset",
        "SessionID": session_id,
        "ClientID": client_id,
    })
}

pub fn status_change(session_id: &str, status: &str) -> serde_json::Value {
    serde_json::json!({
        "Event": "SessionStatusDidChange",
        "SessionID": session_id,
        "Status": status,
    })
}
