//! The master's RPC-boundary service layer.
//!
//! [`MasterService`] owns the components behind the two master surfaces,
//! the tablet-server heartbeat and client table management, and is the
//! type a transport would hand requests to. Every handler acquires the
//! leader gate first and aborts on failure with no partial execution; the
//! transport itself (framing, serialization, connection handling) is a
//! collaborator.

mod heartbeat;
mod tables;

use std::sync::Arc;

use quarry_wire::heartbeat::ServerRegistration;

use crate::catalog::CatalogManager;
use crate::leader_gate::LeaderGate;
use crate::registry::TsRegistry;
use crate::security::ClusterSecurity;

/// Handler for all master RPC surfaces.
#[derive(Clone, bon::Builder)]
pub struct MasterService {
    /// The leader gate; acquired per handler call.
    gate: LeaderGate,
    /// The catalog.
    catalog: Arc<CatalogManager>,
    /// The tablet-server registry.
    registry: Arc<TsRegistry>,
    /// CA and token-signing keys.
    security: Arc<ClusterSecurity>,
    /// Cap on tablet assignments per heartbeat response.
    max_assignments_per_heartbeat: usize,
    /// The master's own registration, echoed for display.
    master_registration: ServerRegistration,
}

impl MasterService {
    /// The catalog behind this service.
    #[must_use]
    pub fn catalog(&self) -> &Arc<CatalogManager> {
        &self.catalog
    }

    /// The registry behind this service.
    #[must_use]
    pub fn registry(&self) -> &Arc<TsRegistry> {
        &self.registry
    }

    /// The security state behind this service.
    #[must_use]
    pub fn security(&self) -> &Arc<ClusterSecurity> {
        &self.security
    }

    /// The master's own registration.
    #[must_use]
    pub fn master_registration(&self) -> &ServerRegistration {
        &self.master_registration
    }
}
