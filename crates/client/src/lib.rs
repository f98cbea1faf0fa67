//! Client-side polling helpers for Quarry master operations.
//!
//! Asynchronous master operations (table creation, tablet provisioning)
//! are observed by polling; this crate owns the polling discipline so no
//! caller ever tight-loops against the master. Polls back off
//! exponentially from ~1ms by ×1.25 up to a 1s cap, under an overall
//! attempt budget that fails the caller with [`ClientError::Timeout`]
//! rather than looping forever. There is no cancellation signal threaded
//! through an attempt; a caller cancels by dropping the future.

#![deny(unsafe_code)]

pub mod error;
pub mod poll;

pub use error::ClientError;
pub use poll::{PollPolicy, poll_until, wait_for_create_table_done, wait_for_replica_count};
