//! Error taxonomy for Quarry master operations, using snafu.
//!
//! Every master-side operation returns [`MasterError`]. The leadership
//! variants (`NotLeader`, `NotReady`, `ServiceUnavailable`) abort an
//! operation before any mutation is attempted; callers retry against
//! another master or after a delay. `AlreadyExists` and `NotFound` are
//! definitive outcomes for the caller. Persistence failures surface as
//! `Storage` and always abort atomically.
//!
//! Stale tablet reports are deliberately *not* an error: they are absorbed
//! inside the catalog and the carrying heartbeat still succeeds.

use snafu::{Backtrace, GenerateImplicitData, Snafu};

/// Unified result type for master operations.
pub type Result<T, E = MasterError> = std::result::Result<T, E>;

/// Errors returned by master control-plane operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MasterError {
    /// This node does not currently hold the leader role.
    #[snafu(display("Not the leader"))]
    NotLeader,

    /// Catalog metadata has not finished loading from the durable store.
    ///
    /// Distinct from `NotLeader` so callers can tell "wait here" from
    /// "try another master".
    #[snafu(display("Catalog metadata is not yet loaded"))]
    NotReady,

    /// The consensus layer cannot currently answer the leadership question.
    #[snafu(display("Leadership is currently unknown"))]
    ServiceUnavailable,

    /// A table with this name already exists.
    #[snafu(display("Table {name:?} already exists"))]
    AlreadyExists {
        /// The conflicting table name.
        name: String,
    },

    /// The named entity does not exist.
    #[snafu(display("{entity} not found: {id}"))]
    NotFound {
        /// Entity kind ("table", "tablet").
        entity: &'static str,
        /// Identifier or name that failed to resolve.
        id: String,
    },

    /// A registration payload was malformed or carried an unusable address.
    #[snafu(display("Invalid registration: {reason}"))]
    InvalidRegistration {
        /// Description of the rejected field.
        reason: String,
    },

    /// A table schema failed validation at the create-table boundary.
    #[snafu(display("Invalid schema: {reason}"))]
    InvalidSchema {
        /// The violated constraint.
        reason: String,
    },

    /// A durable catalog write or scan failed.
    ///
    /// The enclosing operation is aborted with no partial in-memory apply.
    #[snafu(display("Sys-catalog storage failure: {message}"))]
    Storage {
        /// Rendered backend error.
        message: String,
        backtrace: Backtrace,
    },
}

impl MasterError {
    /// Wraps an arbitrary backend error as a `Storage` failure.
    ///
    /// Backend error types (redb transactions, codec errors) have generics
    /// and lifetimes that do not compose with snafu's derive; the rendered
    /// message is captured instead, matching how the underlying store
    /// reports them.
    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        MasterError::Storage { message: err.to_string(), backtrace: Backtrace::generate() }
    }

    /// True for gate failures the caller should retry elsewhere or later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MasterError::NotLeader | MasterError::NotReady | MasterError::ServiceUnavailable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_failures_are_retryable() {
        assert!(MasterError::NotLeader.is_retryable());
        assert!(MasterError::NotReady.is_retryable());
        assert!(MasterError::ServiceUnavailable.is_retryable());
    }

    #[test]
    fn test_definitive_outcomes_are_not_retryable() {
        let err = MasterError::AlreadyExists { name: "t".to_string() };
        assert!(!err.is_retryable());
        let err = MasterError::NotFound { entity: "tablet", id: "x".to_string() };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_wraps_display() {
        let err = MasterError::storage("disk on fire");
        assert!(err.to_string().contains("disk on fire"));
        assert!(!err.is_retryable());
    }
}
