//! Read-only cluster status snapshot.
//!
//! The HTTP status page is rendered by an external web UI; this module
//! provides the data it consumes (one row per known tablet server) plus
//! a plain-text rendering. Gathering a snapshot reads the registry only
//! and deliberately skips the leader gate, so the page stays useful on a
//! master that is loading or not leading.

use std::fmt;

use quarry_types::{HostPort, TsId};
use quarry_wire::heartbeat::ServerRegistration;

use crate::registry::TsRegistry;

/// One tablet server's row on the status page.
#[derive(Debug, Clone)]
pub struct TsStatusRow {
    /// Server UUID.
    pub ts_id: TsId,
    /// Advertised RPC endpoints.
    pub rpc_endpoints: Vec<HostPort>,
    /// Advertised web UI endpoints.
    pub http_endpoints: Vec<HostPort>,
    /// Software version string.
    pub software_version: String,
    /// Whether the server heartbeated within the liveness window.
    pub live: bool,
    /// Whether this master issued the server a signed certificate.
    pub has_signed_cert: bool,
    /// Seconds since the last heartbeat.
    pub seconds_since_heartbeat: u64,
}

/// Snapshot of the cluster as the status page shows it.
#[derive(Debug, Clone)]
pub struct ClusterStatus {
    /// The master's own registration.
    pub master: ServerRegistration,
    /// Known tablet servers, sorted by UUID.
    pub tablet_servers: Vec<TsStatusRow>,
}

impl ClusterStatus {
    /// Gathers a snapshot from the registry.
    #[must_use]
    pub fn gather(registry: &TsRegistry, master: &ServerRegistration) -> Self {
        let timeout = registry.liveness_timeout();
        let tablet_servers = registry
            .descriptors()
            .into_iter()
            .map(|descriptor| {
                let registration = descriptor.registration();
                let since = descriptor.time_since_heartbeat();
                TsStatusRow {
                    ts_id: descriptor.id(),
                    rpc_endpoints: registration.rpc_endpoints,
                    http_endpoints: registration.http_endpoints,
                    software_version: registration.software_version,
                    live: since <= timeout,
                    has_signed_cert: descriptor.has_signed_cert(),
                    seconds_since_heartbeat: since.as_secs(),
                }
            })
            .collect();
        Self { master: master.clone(), tablet_servers }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Master version: {}", self.master.software_version)?;
        writeln!(f, "Tablet servers ({}):", self.tablet_servers.len())?;
        for row in &self.tablet_servers {
            let endpoints: Vec<String> =
                row.rpc_endpoints.iter().map(ToString::to_string).collect();
            writeln!(
                f,
                "  {}  {}  [{}]  {}  last heartbeat {}s ago",
                row.ts_id,
                row.software_version,
                endpoints.join(", "),
                if row.live { "live" } else { "dead" },
                row.seconds_since_heartbeat,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use quarry_types::HostPort;

    #[test]
    fn test_status_lists_uuid_and_version() {
        let registry = TsRegistry::new(Duration::from_secs(60));
        let id = TsId::generate();
        registry
            .register(
                id,
                ServerRegistration {
                    rpc_endpoints: vec![HostPort::new("127.0.0.1", 7050)],
                    http_endpoints: vec![],
                    software_version: "quarry 0.3.0-test".to_string(),
                },
            )
            .expect("registration");

        let master = ServerRegistration {
            rpc_endpoints: vec![HostPort::new("127.0.0.1", 7051)],
            http_endpoints: vec![],
            software_version: "quarry 0.3.0".to_string(),
        };
        let rendered = ClusterStatus::gather(&registry, &master).to_string();
        assert!(rendered.contains(&id.to_string()));
        assert!(rendered.contains("quarry 0.3.0-test"));
        assert!(!rendered.contains("0.0.0.0"));
    }
}
