//! The Quarry master: control plane of a Quarry tabular storage cluster.
//!
//! The master holds cluster metadata (tables, tablets, replica placement)
//! and arbitrates which node is authoritative for it. Tablet servers
//! register with the master, heartbeat on a fixed cadence, and receive
//! routing and security material in return; clients create tables through
//! the master and poll for completion.
//!
//! Crate layout:
//! - [`leader_gate`] - the per-operation "am I leader with metadata
//!   loaded" capability check every operation starts with
//! - [`sys_catalog`] - durable row persistence behind the in-memory
//!   catalog, with insert/update mutation counters
//! - [`catalog`] - tables, tablets, and reported replicas
//! - [`registry`] - tablet-server descriptors and liveness
//! - [`security`] - cluster CA and token-signing keys
//! - [`services`] - the RPC-boundary handlers (heartbeat, table
//!   management); the transport hosting them is a collaborator
//! - [`status`] - the read-only snapshot behind the status page
//! - [`master`] - assembly of all of the above over one backend

#![deny(unsafe_code)]

pub mod catalog;
pub mod leader_gate;
pub mod master;
pub mod registry;
pub mod security;
pub mod services;
pub mod status;
pub mod sys_catalog;

pub use catalog::{CatalogManager, ReportOutcome};
pub use leader_gate::{LeaderGate, LeaderLease, Role, RoleOracle, SingleNodeOracle};
pub use master::{Master, software_version};
pub use registry::{MatchMode, TsDescriptor, TsRegistry};
pub use security::ClusterSecurity;
pub use services::MasterService;
pub use status::ClusterStatus;
pub use sys_catalog::{CatalogBackend, MemoryBackend, RedbBackend, SysCatalog};
