//! Client-side error type.

use std::time::Duration;

use snafu::Snafu;

use quarry_types::MasterError;

/// Result type for client polling operations.
pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Errors surfaced to polling callers.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClientError {
    /// The polling budget was exhausted before the condition held.
    ///
    /// Raised only client-side; the server-side operations being polled
    /// never produce it.
    #[snafu(display("Timed out after {attempts} attempts over {waited:?}"))]
    Timeout {
        /// Attempts made.
        attempts: u32,
        /// Wall-clock time spent.
        waited: Duration,
    },

    /// The master returned a definitive, non-retryable failure.
    #[snafu(display("Master operation failed: {source}"))]
    Master {
        /// The failure.
        source: MasterError,
    },
}
