//! Master assembly: wires the catalog, registry, security state, and
//! service front over one durable backend and one role oracle.
//!
//! A master restart is modeled as dropping the `Master` and constructing a
//! new one over the same backend: all in-memory state is rebuilt, the
//! catalog from the durable scan in [`start`](Master::start), the registry
//! from re-registration heartbeats. Until `start` completes, the leader
//! gate reports `NotReady`, so callers wait rather than failing over.

use std::sync::Arc;

use quarry_types::{Result, config::{ConfigError, MasterConfig}};
use quarry_wire::heartbeat::ServerRegistration;

use crate::catalog::CatalogManager;
use crate::leader_gate::{LeaderGate, RoleOracle, SingleNodeOracle};
use crate::registry::TsRegistry;
use crate::security::ClusterSecurity;
use crate::services::MasterService;
use crate::sys_catalog::CatalogBackend;

/// The version string this master reports about itself.
#[must_use]
pub fn software_version() -> String {
    format!("quarry {}", env!("CARGO_PKG_VERSION"))
}

/// A running master instance.
pub struct Master {
    config: MasterConfig,
    oracle: Arc<SingleNodeOracle>,
    service: MasterService,
}

impl Master {
    /// Builds an unstarted master over a durable backend.
    ///
    /// Generates fresh CA and token-signing key material; the catalog is
    /// not loaded yet, so the gate reports `NotReady` until
    /// [`start`](Self::start) returns.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration fails validation.
    pub fn new(
        config: MasterConfig,
        backend: Arc<dyn CatalogBackend>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let oracle = Arc::new(SingleNodeOracle::new());
        let catalog = Arc::new(CatalogManager::new(backend));
        let registry = Arc::new(TsRegistry::new(config.ts_liveness_timeout));
        let security =
            Arc::new(ClusterSecurity::new(config.tsk_validity, config.cert_validity));
        let master_registration = ServerRegistration {
            rpc_endpoints: vec![config.advertised_endpoint.clone()],
            http_endpoints: Vec::new(),
            software_version: software_version(),
        };

        let service = MasterService::builder()
            .gate(LeaderGate::new(Arc::clone(&oracle) as Arc<dyn RoleOracle>))
            .catalog(catalog)
            .registry(registry)
            .security(security)
            .max_assignments_per_heartbeat(config.max_assignments_per_heartbeat)
            .master_registration(master_registration)
            .build();

        Ok(Self { config, oracle, service })
    }

    /// Loads the catalog from the durable store and opens the gate.
    ///
    /// # Errors
    ///
    /// Returns [`quarry_types::MasterError::Storage`] if the load fails;
    /// the gate stays `NotReady` and `start` can be retried.
    pub fn start(&self) -> Result<()> {
        self.oracle.mark_unloaded();
        self.service.catalog().load_from_backend()?;
        self.oracle.mark_loaded();
        tracing::info!(
            endpoint = %self.config.advertised_endpoint,
            version = %software_version(),
            "Master started"
        );
        Ok(())
    }

    /// The RPC service front.
    #[must_use]
    pub fn service(&self) -> &MasterService {
        &self.service
    }

    /// The role oracle, for demotion in tests and role-transition hooks.
    #[must_use]
    pub fn oracle(&self) -> &Arc<SingleNodeOracle> {
        &self.oracle
    }

    /// The master's configuration.
    #[must_use]
    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// The master's own registration.
    #[must_use]
    pub fn registration(&self) -> &ServerRegistration {
        self.service.master_registration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys_catalog::MemoryBackend;
    use quarry_types::MasterError;

    #[test]
    fn test_gate_not_ready_until_started() {
        let backend = Arc::new(MemoryBackend::new());
        let master = Master::new(MasterConfig::default(), backend).expect("build master");
        let gate = LeaderGate::new(
            Arc::clone(master.oracle()) as Arc<dyn RoleOracle>
        );
        assert!(matches!(gate.acquire(), Err(MasterError::NotReady)));
        master.start().expect("start");
        gate.acquire().expect("gate opens after start");
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = MasterConfig::builder()
            .heartbeat_interval(std::time::Duration::ZERO)
            .build();
        let backend = Arc::new(MemoryBackend::new());
        assert!(Master::new(config, backend).is_err());
    }

    #[test]
    fn test_master_reports_software_version() {
        let backend = Arc::new(MemoryBackend::new());
        let master = Master::new(MasterConfig::default(), backend).expect("build master");
        assert!(master.registration().software_version.contains(env!("CARGO_PKG_VERSION")));
    }
}
