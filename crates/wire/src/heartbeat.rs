//! Heartbeat request/response shapes.
//!
//! Each tablet server calls the master on a fixed, client-driven cadence.
//! The request is one message with optional sections (registration, tablet
//! report, certificate-signing request) that are mutually independent
//! states of the exchange, not distinct message types. The response carries
//! the master's instructions back: re-registration and full-report flags,
//! tablet assignments, the signing-key delta, and a signed certificate when
//! one was requested.

use serde::{Deserialize, Serialize};

use quarry_types::{HostPort, ReplicaRole, TableId, TabletId, TsId};

use crate::security::{CertSignRequest, SignedCertificate, SigningKeyEntry};

/// Identity and location a server advertises when it (re-)registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRegistration {
    /// Advertised RPC endpoints. Never a wildcard address.
    pub rpc_endpoints: Vec<HostPort>,
    /// Advertised web UI endpoints, if the server runs one.
    pub http_endpoints: Vec<HostPort>,
    /// Software version string, shown on the cluster status page.
    pub software_version: String,
}

/// One tablet entry of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedTablet {
    /// The reported tablet.
    pub tablet_id: TabletId,
    /// The reporting replica's current term.
    pub term: u64,
    /// The reporting replica's current role.
    pub role: ReplicaRole,
}

/// A full or incremental tablet report.
///
/// A full report enumerates every tablet the server hosts; an incremental
/// report only the tablets whose state changed since the last acknowledged
/// report. The master records `sequence_number` per server and asks for a
/// full report whenever it has no recorded sequence (e.g. right after a
/// master restart).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletReport {
    /// Monotonic report sequence number, assigned by the server.
    pub sequence_number: u64,
    /// False for a full report, true for an incremental one.
    pub is_incremental: bool,
    /// The reported tablets.
    pub tablets: Vec<ReportedTablet>,
}

/// Heartbeat request from a tablet server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsHeartbeatRequest {
    /// Permanent UUID of the calling server.
    pub ts_id: TsId,
    /// Registration payload; present on first contact and re-registration.
    pub registration: Option<ServerRegistration>,
    /// Tablet report; present when the server has state to report.
    pub report: Option<TabletReport>,
    /// Certificate-signing request; present until the server holds a
    /// signed certificate.
    pub csr: Option<CertSignRequest>,
    /// Highest signing-key sequence the server has seen, so the response
    /// only carries newer keys. `None` requests the full set.
    pub latest_signing_key_seq: Option<u64>,
}

/// A tablet the master asks the heartbeating server to create a replica of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletAssignment {
    /// Tablet to create.
    pub tablet_id: TabletId,
    /// Owning table.
    pub table_id: TableId,
}

/// Heartbeat response from the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsHeartbeatResponse {
    /// True if the master does not know the caller; the server must attach
    /// its registration to the next heartbeat.
    pub needs_reregister: bool,
    /// True if the master has no report state for the caller; the server
    /// must send a full (not incremental) report next.
    pub needs_full_tablet_report: bool,
    /// Tablets the server should create replicas for.
    pub tablets_to_create: Vec<TabletAssignment>,
    /// Signing keys newer than the request's `latest_signing_key_seq`.
    pub signing_keys: Vec<SigningKeyEntry>,
    /// Signed certificate, when the request carried a CSR.
    pub signed_certificate: Option<SignedCertificate>,
    /// The master's own registration, for display purposes.
    pub master_registration: ServerRegistration,
}
