//! Core types for the Quarry master, the control plane of a Quarry cluster.
//!
//! This crate provides the foundational types shared by the master and its
//! clients:
//! - Type-safe identifiers (TableId, TabletId, TsId)
//! - The table schema model (columns, key columns, data types)
//! - The unified error taxonomy used across all master operations
//! - Master configuration with validation
//! - Network endpoint validation for server registrations

#![deny(unsafe_code)]

pub mod codec;
pub mod config;
pub mod error;
pub mod ids;
pub mod replica;
pub mod schema;
pub mod validation;

// Re-export commonly used types at crate root
pub use error::{MasterError, Result};
pub use ids::{TableId, TabletId, TsId};
pub use replica::{ReplicaRole, TabletReplica};
pub use schema::{ColumnSchema, DataType, Schema};
pub use validation::HostPort;
