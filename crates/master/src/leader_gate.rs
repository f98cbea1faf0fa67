//! The leader gate: a per-operation capability check over the role oracle.
//!
//! Every catalog-reading or catalog-mutating operation starts by acquiring
//! the gate. Acquisition is a pure state read (shared, never exclusive)
//! and the returned [`LeaderLease`] is a point-in-time capability: it
//! guarantees this node was leader with metadata loaded at acquisition
//! time, for the duration of the one operation it was acquired for.
//! Holding a lease says nothing about a later call; the role can flip
//! between operations, so the gate is re-acquired every time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use quarry_types::{MasterError, Result};

/// Consensus role of this master, as reported by the role oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This node is the authoritative master.
    Leader,
    /// Another node is (or may be) the authoritative master.
    Follower,
    /// The consensus layer cannot currently answer.
    Unknown,
}

/// Synchronous view onto the consensus layer.
///
/// The consensus implementation itself is a collaborator; the master only
/// needs these two questions answered cheaply and without blocking.
pub trait RoleOracle: Send + Sync + 'static {
    /// The node's current role.
    fn current_role(&self) -> Role;

    /// Whether catalog metadata has finished loading from the durable
    /// store since this node last became leader.
    fn is_metadata_loaded(&self) -> bool;
}

/// Proof that the gate was held at a point in time.
///
/// Deliberately not `Copy`/`Clone`: a lease is acquired per operation and
/// must not be stashed to skip re-acquisition. There is nothing to
/// release; dropping it is free.
#[derive(Debug)]
pub struct LeaderLease {
    _private: (),
}

/// The gate itself. Cheap to clone; all clones share the oracle.
#[derive(Clone)]
pub struct LeaderGate {
    oracle: Arc<dyn RoleOracle>,
}

impl LeaderGate {
    /// Creates a gate over the given oracle.
    pub fn new(oracle: Arc<dyn RoleOracle>) -> Self {
        Self { oracle }
    }

    /// Acquires the gate for one operation.
    ///
    /// # Errors
    ///
    /// - [`MasterError::ServiceUnavailable`] if the oracle cannot answer
    ///   the leadership question.
    /// - [`MasterError::NotLeader`] if this node is a follower.
    /// - [`MasterError::NotReady`] if this node leads but has not finished
    ///   loading catalog metadata. Reported instead of `NotLeader` during
    ///   the rebuild window so callers wait here rather than try elsewhere.
    pub fn acquire(&self) -> Result<LeaderLease> {
        match self.oracle.current_role() {
            Role::Unknown => Err(MasterError::ServiceUnavailable),
            Role::Follower => Err(MasterError::NotLeader),
            Role::Leader => {
                if self.oracle.is_metadata_loaded() {
                    Ok(LeaderLease { _private: () })
                } else {
                    Err(MasterError::NotReady)
                }
            },
        }
    }
}

/// Role oracle for a master running without a replicated peer group.
///
/// The node is always leader; `mark_loaded` is flipped by the master once
/// the catalog scan completes, and cleared again if the catalog is ever
/// reloaded. Tests use [`set_role`](Self::set_role) to simulate demotion
/// and oracle outage.
#[derive(Debug)]
pub struct SingleNodeOracle {
    role: AtomicU8,
    loaded: std::sync::atomic::AtomicBool,
}

const ROLE_LEADER: u8 = 0;
const ROLE_FOLLOWER: u8 = 1;
const ROLE_UNKNOWN: u8 = 2;

impl SingleNodeOracle {
    /// Creates an oracle that is leader but not yet loaded.
    #[must_use]
    pub fn new() -> Self {
        Self {
            role: AtomicU8::new(ROLE_LEADER),
            loaded: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Marks catalog metadata as loaded.
    pub fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::Release);
    }

    /// Clears the loaded flag, e.g. at the start of a catalog reload.
    pub fn mark_unloaded(&self) {
        self.loaded.store(false, Ordering::Release);
    }

    /// Overrides the reported role.
    pub fn set_role(&self, role: Role) {
        let v = match role {
            Role::Leader => ROLE_LEADER,
            Role::Follower => ROLE_FOLLOWER,
            Role::Unknown => ROLE_UNKNOWN,
        };
        self.role.store(v, Ordering::Release);
    }
}

impl Default for SingleNodeOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl RoleOracle for SingleNodeOracle {
    fn current_role(&self) -> Role {
        match self.role.load(Ordering::Acquire) {
            ROLE_FOLLOWER => Role::Follower,
            ROLE_UNKNOWN => Role::Unknown,
            _ => Role::Leader,
        }
    }

    fn is_metadata_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }
}
