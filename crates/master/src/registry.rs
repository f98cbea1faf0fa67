//! Registry of every tablet server that has ever registered.
//!
//! Descriptors are keyed by the server's permanent UUID and live for the
//! lifetime of the master process. Registration is insert-or-refresh: a
//! server re-registering after a master restart (or its own) updates its
//! descriptor in place rather than creating a duplicate. Liveness is a
//! timestamp refreshed on every successful heartbeat; eviction policy
//! beyond the liveness window belongs to the cluster's failure detector,
//! not to this registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;

use quarry_types::{Result, TsId, validation};
use quarry_wire::heartbeat::ServerRegistration;

/// Which descriptors [`TsRegistry::count`] should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Every server ever seen by this master process.
    All,
    /// Only servers that heartbeated within the liveness window.
    Live,
}

/// Sentinel for "no tablet report received yet".
const NO_REPORT: i64 = -1;

/// The master's view of one tablet server.
pub struct TsDescriptor {
    id: TsId,
    registration: RwLock<ServerRegistration>,
    last_heartbeat: RwLock<Instant>,
    latest_report_seq: AtomicI64,
    has_signed_cert: AtomicBool,
}

impl TsDescriptor {
    /// The server's permanent UUID.
    #[must_use]
    pub fn id(&self) -> TsId {
        self.id
    }

    /// The server's last-known registration.
    #[must_use]
    pub fn registration(&self) -> ServerRegistration {
        self.registration.read().clone()
    }

    /// Time since the last heartbeat.
    #[must_use]
    pub fn time_since_heartbeat(&self) -> Duration {
        self.last_heartbeat.read().elapsed()
    }

    /// Sequence number of the latest tablet report, if any was received
    /// by this master process.
    ///
    /// `None` right after a master restart; that is what makes the master
    /// request a full report from the server.
    #[must_use]
    pub fn latest_report_seq(&self) -> Option<u64> {
        match self.latest_report_seq.load(Ordering::Acquire) {
            NO_REPORT => None,
            seq => Some(seq as u64),
        }
    }

    /// Records the sequence number of a received tablet report.
    pub fn record_report_seq(&self, seq: u64) {
        self.latest_report_seq.store(seq as i64, Ordering::Release);
    }

    /// Whether this master has issued the server a signed certificate.
    #[must_use]
    pub fn has_signed_cert(&self) -> bool {
        self.has_signed_cert.load(Ordering::Acquire)
    }

    /// Marks the server as holding a signed certificate.
    pub fn set_has_signed_cert(&self) {
        self.has_signed_cert.store(true, Ordering::Release);
    }

    fn touch(&self) {
        *self.last_heartbeat.write() = Instant::now();
    }

    fn is_live(&self, timeout: Duration) -> bool {
        self.time_since_heartbeat() <= timeout
    }
}

/// Registry of tablet-server descriptors.
pub struct TsRegistry {
    servers: DashMap<TsId, Arc<TsDescriptor>>,
    liveness_timeout: Duration,
}

impl TsRegistry {
    /// Creates an empty registry with the given liveness window.
    #[must_use]
    pub fn new(liveness_timeout: Duration) -> Self {
        Self { servers: DashMap::new(), liveness_timeout }
    }

    /// Registers a server, or refreshes its registration in place.
    ///
    /// The advertised endpoints are validated first; a wildcard or
    /// otherwise unroutable address never reaches the registry, because
    /// downstream consumers dereference stored endpoints to contact the
    /// server.
    ///
    /// # Errors
    ///
    /// Returns [`quarry_types::MasterError::InvalidRegistration`] if
    /// endpoint validation fails. The previous registration, if any, is
    /// left untouched.
    pub fn register(
        &self,
        id: TsId,
        registration: ServerRegistration,
    ) -> Result<Arc<TsDescriptor>> {
        validation::validate_endpoints(&registration.rpc_endpoints)?;

        let entry = self.servers.entry(id);
        let descriptor = match entry {
            Entry::Occupied(occupied) => {
                let descriptor = Arc::clone(occupied.get());
                tracing::info!(
                    ts_id = %id,
                    version = %registration.software_version,
                    "Refreshed tablet server registration"
                );
                *descriptor.registration.write() = registration;
                descriptor.touch();
                descriptor
            },
            Entry::Vacant(vacant) => {
                tracing::info!(
                    ts_id = %id,
                    version = %registration.software_version,
                    "Registered new tablet server"
                );
                let descriptor = Arc::new(TsDescriptor {
                    id,
                    registration: RwLock::new(registration),
                    last_heartbeat: RwLock::new(Instant::now()),
                    latest_report_seq: AtomicI64::new(NO_REPORT),
                    has_signed_cert: AtomicBool::new(false),
                });
                vacant.insert(Arc::clone(&descriptor));
                descriptor
            },
        };
        Ok(descriptor)
    }

    /// Looks up a descriptor by UUID.
    #[must_use]
    pub fn get(&self, id: TsId) -> Option<Arc<TsDescriptor>> {
        self.servers.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Refreshes a server's liveness timestamp.
    ///
    /// Returns false if the UUID is unknown to this master process (the
    /// caller should then ask the server to re-register).
    pub fn touch(&self, id: TsId) -> bool {
        match self.get(id) {
            Some(descriptor) => {
                descriptor.touch();
                true
            },
            None => false,
        }
    }

    /// Number of known descriptors under the given match mode.
    #[must_use]
    pub fn count(&self, mode: MatchMode) -> usize {
        match mode {
            MatchMode::All => self.servers.len(),
            MatchMode::Live => self
                .servers
                .iter()
                .filter(|entry| entry.value().is_live(self.liveness_timeout))
                .count(),
        }
    }

    /// Snapshot of all descriptors, for the status surface.
    #[must_use]
    pub fn descriptors(&self) -> Vec<Arc<TsDescriptor>> {
        let mut all: Vec<_> =
            self.servers.iter().map(|entry| Arc::clone(entry.value())).collect();
        all.sort_by_key(|d| d.id());
        all
    }

    /// The configured liveness window.
    #[must_use]
    pub fn liveness_timeout(&self) -> Duration {
        self.liveness_timeout
    }
}
