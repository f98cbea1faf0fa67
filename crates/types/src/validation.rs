//! Endpoint validation for tablet-server registrations.
//!
//! Registered addresses are dereferenced by the master's clients to reach
//! tablet servers, so a registration must never carry a wildcard bind
//! address (`0.0.0.0`, `::`) or an empty host. Validation runs at the
//! registration boundary; anything stored in the registry has passed it.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{InvalidRegistrationSnafu, MasterError};

/// A routable host/port pair advertised in a server registration.
///
/// The host may be a hostname or a literal IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    /// Hostname or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl HostPort {
    /// Creates a new host/port pair.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// True if the host is a wildcard (unspecified) bind address.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        match self.host.parse::<IpAddr>() {
            Ok(addr) => addr.is_unspecified(),
            Err(_) => false,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Validates the advertised endpoints of a registration payload.
///
/// # Errors
///
/// Returns [`MasterError::InvalidRegistration`] if the list is empty or any
/// entry has an empty host, a wildcard address, or port zero.
pub fn validate_endpoints(endpoints: &[HostPort]) -> Result<(), MasterError> {
    snafu::ensure!(
        !endpoints.is_empty(),
        InvalidRegistrationSnafu { reason: "registration must advertise at least one endpoint" }
    );
    for ep in endpoints {
        snafu::ensure!(
            !ep.host.is_empty(),
            InvalidRegistrationSnafu { reason: format!("endpoint {ep} has an empty host") }
        );
        snafu::ensure!(
            !ep.is_wildcard(),
            InvalidRegistrationSnafu {
                reason: format!("endpoint {ep} advertises a wildcard address"),
            }
        );
        snafu::ensure!(
            ep.port != 0,
            InvalidRegistrationSnafu { reason: format!("endpoint {ep} has port zero") }
        );
    }
    Ok(())
}
