//! In-process mini cluster: one restartable master plus simulated tablet
//! servers heartbeating on a fast cadence.
//!
//! The tablet servers here implement the client half of the heartbeat
//! protocol faithfully (registration on first contact, full vs
//! incremental reports, CSR attachment until certified, append-only
//! signing-key merging) without any tablet storage underneath. Master
//! and tablet-server restarts are first-class: [`MiniMaster::shutdown`]
//! drops all master in-memory state while keeping the durable backend,
//! and [`MiniTabletServer::start`] after a shutdown models a server
//! process restart (terms bump, certificate and key material are lost,
//! the permanent UUID survives).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use ed25519_dalek::SigningKey;
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use tokio::task::JoinHandle;

use quarry_master::{
    Master, MasterService, MatchMode, TsDescriptor,
    sys_catalog::{CatalogBackend, MemoryBackend},
};
use quarry_types::{HostPort, MasterError, ReplicaRole, TabletId, TsId, config::MasterConfig};
use quarry_wire::heartbeat::{
    ReportedTablet, ServerRegistration, TabletReport, TsHeartbeatRequest,
};
use quarry_wire::security::{CertSignRequest, SignedCertificate, SigningKeyEntry};

/// Options for [`MiniCluster::start`].
#[derive(Debug, Clone)]
pub struct MiniClusterOptions {
    /// Number of tablet servers to start with.
    pub num_tablet_servers: usize,
    /// Heartbeat cadence. Fast by default to keep tests quick.
    pub heartbeat_interval: Duration,
}

impl Default for MiniClusterOptions {
    fn default() -> Self {
        Self { num_tablet_servers: 1, heartbeat_interval: Duration::from_millis(10) }
    }
}

// ============================================================================
// MiniMaster
// ============================================================================

struct MasterSlot {
    config: MasterConfig,
    backend: Arc<dyn CatalogBackend>,
    current: RwLock<Option<Master>>,
}

/// A restartable in-process master over one durable backend.
#[derive(Clone)]
pub struct MiniMaster {
    slot: Arc<MasterSlot>,
}

impl MiniMaster {
    fn new(config: MasterConfig, backend: Arc<dyn CatalogBackend>) -> Self {
        Self { slot: Arc::new(MasterSlot { config, backend, current: RwLock::new(None) }) }
    }

    /// Starts a fresh master instance over the shared backend.
    ///
    /// All previous in-memory state (registry, metrics, security
    /// material) is gone; the catalog reloads from the backend.
    ///
    /// # Panics
    ///
    /// Panics if construction or the catalog load fails.
    pub fn restart(&self) {
        let master = Master::new(self.slot.config.clone(), Arc::clone(&self.slot.backend))
            .expect("mini master config is valid");
        master.start().expect("mini master catalog load");
        *self.slot.current.write() = Some(master);
    }

    /// Drops the current master instance, keeping the durable backend.
    pub fn shutdown(&self) {
        *self.slot.current.write() = None;
    }

    /// Whether a master instance is currently up.
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.slot.current.read().is_some()
    }

    /// The current master's service front.
    ///
    /// # Panics
    ///
    /// Panics if the master is shut down.
    #[must_use]
    pub fn service(&self) -> MasterService {
        self.try_service().expect("mini master is down")
    }

    /// The service front, or `None` while shut down.
    #[must_use]
    pub fn try_service(&self) -> Option<MasterService> {
        self.slot.current.read().as_ref().map(|m| m.service().clone())
    }

    /// Runs `f` against the current master instance.
    ///
    /// # Panics
    ///
    /// Panics if the master is shut down.
    pub fn with_master<R>(&self, f: impl FnOnce(&Master) -> R) -> R {
        let guard = self.slot.current.read();
        f(guard.as_ref().expect("mini master is down"))
    }

    /// Sys-catalog rows inserted by the current master instance.
    #[must_use]
    pub fn rows_inserted(&self) -> u64 {
        self.service().catalog().metrics().rows_inserted()
    }

    /// Sys-catalog rows updated by the current master instance.
    #[must_use]
    pub fn rows_updated(&self) -> u64 {
        self.service().catalog().metrics().rows_updated()
    }
}

// ============================================================================
// MiniTabletServer
// ============================================================================

struct TsState {
    id: TsId,
    index: usize,
    running: AtomicBool,
    needs_register: AtomicBool,
    needs_full_report: AtomicBool,
    has_signed_cert: AtomicBool,
    next_report_seq: AtomicU64,
    identity_key: Mutex<SigningKey>,
    /// Hosted tablets and the current term of each replica.
    tablets: Mutex<BTreeMap<TabletId, u64>>,
    /// Tablets with changes not yet acknowledged in a report.
    dirty: Mutex<BTreeSet<TabletId>>,
    /// Append-only local view of the master's signing keys.
    signing_keys: Mutex<BTreeMap<u64, SigningKeyEntry>>,
    certificate: Mutex<Option<SignedCertificate>>,
}

/// A simulated tablet server speaking the heartbeat protocol.
#[derive(Clone)]
pub struct MiniTabletServer {
    state: Arc<TsState>,
}

impl MiniTabletServer {
    fn new(index: usize) -> Self {
        Self {
            state: Arc::new(TsState {
                id: TsId::generate(),
                index,
                running: AtomicBool::new(true),
                needs_register: AtomicBool::new(true),
                needs_full_report: AtomicBool::new(true),
                has_signed_cert: AtomicBool::new(false),
                next_report_seq: AtomicU64::new(0),
                identity_key: Mutex::new(SigningKey::generate(&mut OsRng)),
                tablets: Mutex::new(BTreeMap::new()),
                dirty: Mutex::new(BTreeSet::new()),
                signing_keys: Mutex::new(BTreeMap::new()),
                certificate: Mutex::new(None),
            }),
        }
    }

    /// The server's permanent UUID. Survives restarts.
    #[must_use]
    pub fn id(&self) -> TsId {
        self.state.id
    }

    /// The registration payload this server advertises.
    #[must_use]
    pub fn registration(&self) -> ServerRegistration {
        let base = 7150 + (self.state.index as u16) * 10;
        ServerRegistration {
            rpc_endpoints: vec![HostPort::new("127.0.0.1", base)],
            http_endpoints: vec![HostPort::new("127.0.0.1", base + 1)],
            software_version: quarry_master::software_version(),
        }
    }

    /// Stops heartbeating.
    pub fn shutdown(&self) {
        self.state.running.store(false, Ordering::Release);
    }

    /// Resumes heartbeating as a freshly restarted process: replica terms
    /// bump, certificate and signing keys are lost, a new identity key is
    /// minted, and the server re-registers with its permanent UUID.
    pub fn start(&self) {
        let state = &self.state;
        {
            let mut tablets = state.tablets.lock();
            let mut dirty = state.dirty.lock();
            for (tablet_id, term) in tablets.iter_mut() {
                *term += 1;
                dirty.insert(*tablet_id);
            }
        }
        *state.identity_key.lock() = SigningKey::generate(&mut OsRng);
        state.signing_keys.lock().clear();
        *state.certificate.lock() = None;
        state.has_signed_cert.store(false, Ordering::Release);
        state.needs_register.store(true, Ordering::Release);
        state.needs_full_report.store(true, Ordering::Release);
        state.running.store(true, Ordering::Release);
    }

    /// Whether the heartbeat loop is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Whether the master has issued this server a signed certificate.
    #[must_use]
    pub fn has_signed_cert(&self) -> bool {
        self.state.has_signed_cert.load(Ordering::Acquire)
    }

    /// The server's current certificate, if any.
    #[must_use]
    pub fn certificate(&self) -> Option<SignedCertificate> {
        self.state.certificate.lock().clone()
    }

    /// The server's local view of the signing-key set, in sequence order.
    #[must_use]
    pub fn exported_signing_keys(&self) -> Vec<SigningKeyEntry> {
        self.state.signing_keys.lock().values().cloned().collect()
    }

    /// The tablets this server hosts, with each replica's current term.
    #[must_use]
    pub fn tablet_terms(&self) -> BTreeMap<TabletId, u64> {
        self.state.tablets.lock().clone()
    }

    /// Performs one heartbeat exchange against the given master service.
    ///
    /// # Errors
    ///
    /// Propagates master-side failures; local state is only advanced on a
    /// successful exchange, so a failed heartbeat is simply retried.
    pub async fn heartbeat_once(&self, service: &MasterService) -> Result<(), MasterError> {
        let state = &self.state;

        let registration =
            state.needs_register.load(Ordering::Acquire).then(|| self.registration());
        let csr = (!state.has_signed_cert.load(Ordering::Acquire)).then(|| CertSignRequest {
            public_key: state.identity_key.lock().verifying_key().as_bytes().to_vec(),
        });
        let latest_signing_key_seq =
            state.signing_keys.lock().keys().next_back().copied();

        // Build the report outside any await: full if the master asked for
        // one, incremental if anything is dirty, absent otherwise.
        let report = {
            let tablets = state.tablets.lock();
            let dirty = state.dirty.lock();
            if state.needs_full_report.load(Ordering::Acquire) {
                Some(TabletReport {
                    sequence_number: state.next_report_seq.fetch_add(1, Ordering::Relaxed),
                    is_incremental: false,
                    tablets: tablets
                        .iter()
                        .map(|(&tablet_id, &term)| ReportedTablet {
                            tablet_id,
                            term,
                            role: ReplicaRole::Leader,
                        })
                        .collect(),
                })
            } else if !dirty.is_empty() {
                Some(TabletReport {
                    sequence_number: state.next_report_seq.fetch_add(1, Ordering::Relaxed),
                    is_incremental: true,
                    tablets: dirty
                        .iter()
                        .filter_map(|tablet_id| {
                            tablets.get(tablet_id).map(|&term| ReportedTablet {
                                tablet_id: *tablet_id,
                                term,
                                role: ReplicaRole::Leader,
                            })
                        })
                        .collect(),
                })
            } else {
                None
            }
        };
        let sent_registration = registration.is_some();
        let sent_report = report.clone();

        let response = service
            .heartbeat(TsHeartbeatRequest {
                ts_id: state.id,
                registration,
                report,
                csr,
                latest_signing_key_seq,
            })
            .await?;

        if response.needs_reregister {
            state.needs_register.store(true, Ordering::Release);
            state.needs_full_report.store(true, Ordering::Release);
            return Ok(());
        }
        if sent_registration {
            state.needs_register.store(false, Ordering::Release);
        }
        if let Some(report) = sent_report {
            let mut dirty = state.dirty.lock();
            if report.is_incremental {
                for entry in &report.tablets {
                    dirty.remove(&entry.tablet_id);
                }
            } else {
                dirty.clear();
                state.needs_full_report.store(false, Ordering::Release);
            }
        }
        if response.needs_full_tablet_report {
            state.needs_full_report.store(true, Ordering::Release);
        }

        for key in response.signing_keys {
            state.signing_keys.lock().insert(key.seq, key);
        }
        if let Some(cert) = response.signed_certificate {
            *state.certificate.lock() = Some(cert);
            state.has_signed_cert.store(true, Ordering::Release);
        }
        if !response.tablets_to_create.is_empty() {
            let mut tablets = state.tablets.lock();
            let mut dirty = state.dirty.lock();
            for assignment in response.tablets_to_create {
                tablets.entry(assignment.tablet_id).or_insert(1);
                dirty.insert(assignment.tablet_id);
            }
        }
        Ok(())
    }
}

// ============================================================================
// MiniCluster
// ============================================================================

/// One master plus N tablet servers, heartbeating in the background.
pub struct MiniCluster {
    options: MiniClusterOptions,
    mini_master: MiniMaster,
    tablet_servers: Vec<MiniTabletServer>,
    heartbeaters: Vec<JoinHandle<()>>,
}

impl MiniCluster {
    /// Starts a cluster. Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(options: MiniClusterOptions) -> Self {
        let config = MasterConfig::builder()
            .heartbeat_interval(options.heartbeat_interval)
            .ts_liveness_timeout(options.heartbeat_interval * 20)
            .build();
        let backend = Arc::new(MemoryBackend::new()) as Arc<dyn CatalogBackend>;
        let mini_master = MiniMaster::new(config, backend);
        mini_master.restart();

        let mut cluster = Self {
            options,
            mini_master,
            tablet_servers: Vec::new(),
            heartbeaters: Vec::new(),
        };
        for _ in 0..cluster.options.num_tablet_servers {
            cluster.add_tablet_server();
        }
        cluster
    }

    /// Adds one more tablet server and starts its heartbeat loop.
    pub fn add_tablet_server(&mut self) -> &MiniTabletServer {
        let ts = MiniTabletServer::new(self.tablet_servers.len());
        let loop_ts = ts.clone();
        let master = self.mini_master.clone();
        let interval = self.options.heartbeat_interval;
        self.heartbeaters.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !loop_ts.is_running() {
                    continue;
                }
                let Some(service) = master.try_service() else {
                    continue;
                };
                if let Err(error) = loop_ts.heartbeat_once(&service).await {
                    tracing::debug!(ts_id = %loop_ts.id(), %error, "Heartbeat failed; retrying");
                }
            }
        }));
        self.tablet_servers.push(ts);
        self.tablet_servers.last().expect("just pushed")
    }

    /// The cluster's master.
    #[must_use]
    pub fn mini_master(&self) -> &MiniMaster {
        &self.mini_master
    }

    /// The `idx`-th tablet server.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of range.
    #[must_use]
    pub fn mini_tablet_server(&self, idx: usize) -> &MiniTabletServer {
        &self.tablet_servers[idx]
    }

    /// Waits until the master knows exactly `expected` tablet servers
    /// under `mode`, returning their descriptors.
    ///
    /// # Panics
    ///
    /// Panics after 10 seconds without reaching the expected count.
    pub async fn wait_for_tablet_server_count(
        &self,
        expected: usize,
        mode: MatchMode,
    ) -> Vec<Arc<TsDescriptor>> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(service) = self.mini_master.try_service() {
                if service.registry().count(mode) == expected {
                    return service.registry().descriptors();
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {expected} tablet servers"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Drop for MiniCluster {
    fn drop(&mut self) {
        for handle in &self.heartbeaters {
            handle.abort();
        }
    }
}
