//! Coordinator-level scenarios: configuration validation, indicator
//! publication, and the teardown-and-relisten cycle after a client
//! disconnect.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{request_connection, status_change, MockMediaServiceRpc, PresenterCall, RecordingPresenter, TestClient, TEST_SERVER_ID};
use streamhost::advertiser::{ServiceAdvertiser, ServiceRegistration};
use streamhost::config::HostConfig;
use streamhost::coordinator::{HostParts, SessionCoordinator};
use streamhost::logsink::MemoryLogSink;
use streamhost::rpc::MediaServiceRpc;
use streamhost::HostError;
use streamhost_transport::CancellationTokenSource;
use streamhost_wire::ServerId;

struct NullAdvertiser;

impl ServiceAdvertiser for NullAdvertiser {
    fn advertise(&self, _registration: &ServiceRegistration) -> streamhost::HostResult<()> {
        Ok(())
    }

    fn close(&self) {}
}

fn test_config(port: u16) -> HostConfig {
    HostConfig {
        bundle_id: "com.x.y".into(),
        address: "127.0.0.1".into(),
        port,
        force_barcode: false,
    }
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn invalid_configuration_refuses_to_start() {
    let presenter = RecordingPresenter::new();
    let sink = Arc::new(MemoryLogSink::new());
    let config = HostConfig {
        bundle_id: "  ".into(),
        address: "127.0.0.1".into(),
        port: 55000,
        force_barcode: false,
    };

    let result = SessionCoordinator::new(
        &config,
        "test-host".into(),
        ServerId::parse(TEST_SERVER_ID).unwrap(),
        presenter,
        sink,
        Box::new(|| -> streamhost::HostResult<HostParts> {
            Ok(HostParts {
                advertiser: Arc::new(NullAdvertiser),
                supervisor: None,
                rpc: MockMediaServiceRpc::new() as Arc<dyn MediaServiceRpc>,
            })
        }),
    );

    assert!(matches!(
        result,
        Err(HostError::InvalidConfiguration { .. })
    ));
}

#[tokio::test]
async fn disconnect_rebuilds_the_listener_on_the_same_endpoint() {
    let presenter = RecordingPresenter::new();
    let sink = Arc::new(MemoryLogSink::new());
    let port = free_port();
    let generations = Arc::new(AtomicUsize::new(0));

    let factory_generations = Arc::clone(&generations);
    let coordinator = SessionCoordinator::new(
        &test_config(port),
        "test-host".into(),
        ServerId::parse(TEST_SERVER_ID).unwrap(),
        Arc::clone(&presenter) as Arc<dyn streamhost::presenter::Presenter>,
        sink,
        Box::new(move || -> streamhost::HostResult<HostParts> {
            factory_generations.fetch_add(1, Ordering::SeqCst);
            Ok(HostParts {
                advertiser: Arc::new(NullAdvertiser),
                supervisor: None,
                rpc: MockMediaServiceRpc::new() as Arc<dyn MediaServiceRpc>,
            })
        }),
    )
    .unwrap();

    let (cancel_source, cancel) = CancellationTokenSource::new();
    let runner = tokio::spawn(async move { coordinator.run(cancel).await });

    // Give the first generation a moment to bind.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let addr = format!("127.0.0.1:{port}").parse().unwrap();

    // First session: connect, establish, disconnect.
    {
        let mut client = TestClient::connect(addr).await;
        client.send_json(request_connection("S1", "C1")).await;
        let ack = client.recv().await;
        assert_eq!(ack["Event"], "AcknowledgeConnection");
        client.send_json(status_change("S1", "DISCONNECTED")).await;
    }

    // The coordinator restarts and the same endpoint accepts again.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert_eq!(generations.load(Ordering::SeqCst), 2);

    {
        let mut client = TestClient::connect(addr).await;
        client.send_json(request_connection("S2", "C1")).await;
        let ack = client.recv().await;
        assert_eq!(ack["Event"], "AcknowledgeConnection");
        assert_eq!(ack["SessionID"], "S2");
    }

    cancel_source.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(5), runner)
        .await
        .expect("coordinator stops")
        .unwrap()
        .unwrap();

    // Indicators for the restarted generation: Bonjour running, media
    // stopped but listening.
    let calls = presenter.calls();
    let bonjour_running = calls
        .iter()
        .filter(|call| matches!(call, PresenterCall::Bonjour(status) if status == "Running"))
        .count();
    assert!(bonjour_running >= 2, "one Bonjour update per generation");
    assert!(calls.iter().any(|call| matches!(
        call,
        PresenterCall::SessionManagement(status)
            if status == &format!("Stopped (Listening on 127.0.0.1:{port})")
    )));

    // Protocol callbacks from the first generation arrived as well.
    assert!(calls
        .iter()
        .any(|call| matches!(call, PresenterCall::GenerateBarcode { .. })));
    assert!(calls
        .iter()
        .any(|call| matches!(call, PresenterCall::SessionStatus(status) if status == "DISCONNECTED")));
}
