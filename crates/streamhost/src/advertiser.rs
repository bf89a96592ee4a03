use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use mdns_sd::{ServiceDaemon, ServiceInfo};

use crate::error::{HostError, HostResult};

/// DNS-SD service type the client browses for.
pub const SERVICE_TYPE: &str = "_apple-foveated-streaming._tcp.local.";

/// TXT record key carrying the application bundle identifier.
pub const TXT_KEY_BUNDLE_ID: &str = "Application-Identifier";

/// What gets published on the local link.
#[derive(Debug, Clone)]
pub struct ServiceRegistration {
    /// Instance name; by convention the host's local hostname.
    pub instance: String,
    pub port: u16,
    pub addresses: Vec<IpAddr>,
    pub bundle_id: String,
}

/// Publishes and withdraws the host's mDNS record.
///
/// Advertisement failures are non-fatal to the coordinator: a client that
/// obtained the endpoint by other means can still connect.
pub trait ServiceAdvertiser: Send + Sync {
    fn advertise(&self, registration: &ServiceRegistration) -> HostResult<()>;
    fn close(&self);
}

/// Default advertiser backed by an `mdns-sd` service daemon.
pub struct MdnsAdvertiser {
    daemon: Mutex<Option<ServiceDaemon>>,
}

impl MdnsAdvertiser {
    pub fn new() -> Self {
        Self {
            daemon: Mutex::new(None),
        }
    }
}

impl Default for MdnsAdvertiser {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceAdvertiser for MdnsAdvertiser {
    fn advertise(&self, registration: &ServiceRegistration) -> HostResult<()> {
        let daemon =
            ServiceDaemon::new().map_err(|err| HostError::Advertise(err.to_string()))?;

        let mut txt = HashMap::new();
        txt.insert(
            TXT_KEY_BUNDLE_ID.to_owned(),
            registration.bundle_id.clone(),
        );

        let host_name = format!("{}.local.", registration.instance);
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            &registration.instance,
            &host_name,
            &registration.addresses[..],
            registration.port,
            txt,
        )
        .map_err(|err| HostError::Advertise(err.to_string()))?;

        daemon
            .register(info)
            .map_err(|err| HostError::Advertise(err.to_string()))?;
        tracing::info!(
            instance = %registration.instance,
            port = registration.port,
            "published mDNS advertisement"
        );

        if let Ok(mut slot) = self.daemon.lock() {
            *slot = Some(daemon);
        }
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut slot) = self.daemon.lock() {
            if let Some(daemon) = slot.take() {
                let _ = daemon.shutdown();
                tracing::debug!("withdrew mDNS advertisement");
            }
        }
    }
}

/// Resolves the machine's local hostname for the advertised instance name.
pub fn local_hostname() -> String {
    #[cfg(unix)]
    {
        if let Ok(name) = nix::unistd::gethostname() {
            if let Ok(name) = name.into_string() {
                if !name.is_empty() {
                    return name;
                }
            }
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "streamhost".to_owned())
}
