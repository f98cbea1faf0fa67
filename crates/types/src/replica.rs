//! Replica state as tracked by the catalog.

use serde::{Deserialize, Serialize};

use crate::ids::TsId;

/// Last-known consensus role of a tablet replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicaRole {
    /// The replica leads its tablet's replica group.
    Leader,
    /// The replica follows.
    Follower,
    /// The reporting server did not know the replica's role.
    Unknown,
}

/// One replica of a tablet, as last reported by its hosting server.
///
/// `term` is the monotonically increasing leadership epoch of the replica
/// group as seen by this replica; reports carrying a lower term than the
/// recorded one are stale and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletReplica {
    /// Hosting tablet server.
    pub ts_id: TsId,
    /// Last-known role.
    pub role: ReplicaRole,
    /// Last-known term.
    pub term: u64,
}
