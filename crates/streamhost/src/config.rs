use std::net::{IpAddr, SocketAddr};

use crate::error::{HostError, HostResult};

/// Host configuration as it arrives from the CLI or an embedding GUI.
///
/// Kept as raw strings where the input surface supplies strings, so that
/// validation failures map to a single `InvalidConfiguration` error instead
/// of a parse panic at the edge.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Application bundle identifier advertised over mDNS.
    pub bundle_id: String,
    /// IP address the session listener binds to.
    pub address: String,
    /// TCP port the session listener binds to.
    pub port: u16,
    /// Debug option: omit the certificate fingerprint from the connection
    /// acknowledgment so the client always runs the QR pairing flow.
    pub force_barcode: bool,
}

impl HostConfig {
    /// Validates the configuration and resolves the listen endpoint.
    pub fn validate(&self) -> HostResult<SocketAddr> {
        if self.bundle_id.trim().is_empty() {
            return Err(HostError::invalid_configuration(
                "bundle identifier must not be empty",
            ));
        }
        if self.port == 0 {
            return Err(HostError::invalid_configuration(
                "port must be in the range 1..65535",
            ));
        }
        let address: IpAddr = self.address.trim().parse().map_err(|_| {
            HostError::invalid_configuration(format!("{:?} is not a valid IP address", self.address))
        })?;
        Ok(SocketAddr::new(address, self.port))
    }

    /// Bundle id with surrounding whitespace removed, as advertised.
    pub fn bundle_id(&self) -> &str {
        self.bundle_id.trim()
    }
}
