use std::sync::Arc;

use clap::Parser;
use streamhost::advertiser::{local_hostname, MdnsAdvertiser};
use streamhost::config::HostConfig;
use streamhost::coordinator::{HostParts, SessionCoordinator};
use streamhost::identity::ServerIdentityStore;
use streamhost::logsink::{LogSink, MemoryLogSink};
use streamhost::presenter::{BonjourStatus, Presenter, SessionManagementStatus};
use streamhost::rpc::PipeMediaServiceRpc;
use streamhost::supervisor::{MediaServiceLayout, MediaServiceSupervisor};
use streamhost::HostResult;
use streamhost_transport::CancellationTokenSource;
use streamhost_wire::{BarcodePayload, SessionInformation, SessionStatus};
use tracing_subscriber::EnvFilter;

/// Streaming session host for head-mounted and handheld clients.
#[derive(Parser, Debug)]
#[command(name = "streamhost", version, about)]
struct Cli {
    /// Application bundle identifier advertised over mDNS.
    #[arg(long)]
    bundle_id: String,

    /// IP address the session listener binds to.
    #[arg(long, default_value = "0.0.0.0")]
    address: String,

    /// TCP port the session listener binds to.
    #[arg(long, default_value_t = 55000)]
    port: u16,

    /// Omit the certificate fingerprint from connection acknowledgments so
    /// the client always runs the QR pairing flow (debugging aid).
    #[arg(long)]
    force_barcode: bool,
}

/// Presenter that narrates protocol milestones into the tracing output.
struct ConsolePresenter;

impl Presenter for ConsolePresenter {
    fn generate_barcode(&self, payload: &BarcodePayload) {
        tracing::info!(
            fingerprint = %payload.certificate_fingerprint,
            "pairing payload ready"
        );
    }

    fn session_status_did_change(&self, status: SessionStatus) {
        tracing::info!(%status, "session status");
    }

    fn barcode_presentation_requested(&self, session: &SessionInformation) {
        tracing::info!(session_id = %session.session_id, "client asked for the pairing QR");
    }

    fn connection_error_occurred(&self, message: &str) {
        tracing::error!(%message, "connection error");
    }

    fn bonjour_status_did_change(&self, status: &BonjourStatus) {
        tracing::info!(status = %status, "bonjour");
    }

    fn session_management_status_did_change(&self, status: &SessionManagementStatus) {
        tracing::info!(status = %status, "session management");
    }
}

#[tokio::main]
async fn main() -> HostResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = HostConfig {
        bundle_id: cli.bundle_id,
        address: cli.address,
        port: cli.port,
        force_barcode: cli.force_barcode,
    };

    let identity = ServerIdentityStore::open()?;
    let server_id = identity.server_id().clone();
    tracing::info!(%server_id, "host identity loaded");

    let log_sink: Arc<dyn LogSink> = Arc::new(MemoryLogSink::new());
    let layout = MediaServiceLayout::discover()?;

    let parts_sink = Arc::clone(&log_sink);
    let parts = Box::new(move || -> HostResult<HostParts> {
        let control_socket = layout
            .executable
            .parent()
            .map(|dir| dir.join("control.sock"))
            .unwrap_or_else(|| "control.sock".into());
        Ok(HostParts {
            advertiser: Arc::new(MdnsAdvertiser::new()),
            supervisor: Some(MediaServiceSupervisor::launch(
                layout.clone(),
                Arc::clone(&parts_sink),
            )),
            rpc: Arc::new(PipeMediaServiceRpc::new(control_socket)),
        })
    });

    let coordinator = SessionCoordinator::new(
        &config,
        local_hostname(),
        server_id,
        Arc::new(ConsolePresenter),
        log_sink,
        parts,
    )?;

    let (cancel_source, cancel) = CancellationTokenSource::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            cancel_source.cancel();
        }
    });

    coordinator.run(cancel).await
}
