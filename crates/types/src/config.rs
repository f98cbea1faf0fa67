//! Configuration for the Quarry master.
//!
//! Configuration deserializes from TOML with humantime durations
//! (`heartbeat_interval = "1s"`). Values are validated after
//! deserialization via [`MasterConfig::validate`]; the builder applies the
//! same defaults, so a `MasterConfig::builder().build()` is always valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::validation::HostPort;

/// Configuration validation error.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is outside its valid range or violates a
    /// cross-field constraint.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

/// Master control-plane configuration.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
pub struct MasterConfig {
    /// The routable endpoint this master advertises about itself, echoed
    /// in heartbeat responses for display purposes.
    #[serde(default = "default_advertised_endpoint")]
    #[builder(default = default_advertised_endpoint())]
    pub advertised_endpoint: HostPort,

    /// Cadence at which tablet servers are expected to heartbeat.
    ///
    /// The cadence is client-driven; the master only uses this value to
    /// derive the liveness window. Late or duplicate heartbeats are
    /// tolerated.
    #[serde(default = "default_heartbeat_interval")]
    #[serde(with = "humantime_serde")]
    #[builder(default = default_heartbeat_interval())]
    pub heartbeat_interval: Duration,

    /// How long a tablet server may go without heartbeating before it is
    /// considered dead for `MatchMode::Live` counting.
    #[serde(default = "default_ts_liveness_timeout")]
    #[serde(with = "humantime_serde")]
    #[builder(default = default_ts_liveness_timeout())]
    pub ts_liveness_timeout: Duration,

    /// Upper bound on tablet assignments handed out per heartbeat response.
    ///
    /// Caps the work a cold-starting tablet server is asked to take on in
    /// one exchange; remaining tablets are offered on later heartbeats.
    #[serde(default = "default_max_assignments_per_heartbeat")]
    #[builder(default = default_max_assignments_per_heartbeat())]
    pub max_assignments_per_heartbeat: usize,

    /// Validity window of issued token-signing keys.
    #[serde(default = "default_tsk_validity")]
    #[serde(with = "humantime_serde")]
    #[builder(default = default_tsk_validity())]
    pub tsk_validity: Duration,

    /// Validity window of signed tablet-server certificates.
    #[serde(default = "default_cert_validity")]
    #[serde(with = "humantime_serde")]
    #[builder(default = default_cert_validity())]
    pub cert_validity: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MasterConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any duration is zero, the
    /// liveness timeout is shorter than the heartbeat interval, or the
    /// assignment cap is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Validation {
                message: "heartbeat_interval must be non-zero".to_string(),
            });
        }
        if self.ts_liveness_timeout < self.heartbeat_interval {
            return Err(ConfigError::Validation {
                message: format!(
                    "ts_liveness_timeout ({:?}) must be at least heartbeat_interval ({:?})",
                    self.ts_liveness_timeout, self.heartbeat_interval
                ),
            });
        }
        if self.max_assignments_per_heartbeat == 0 {
            return Err(ConfigError::Validation {
                message: "max_assignments_per_heartbeat must be at least 1".to_string(),
            });
        }
        if self.tsk_validity.is_zero() || self.cert_validity.is_zero() {
            return Err(ConfigError::Validation {
                message: "tsk_validity and cert_validity must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

fn default_advertised_endpoint() -> HostPort {
    HostPort::new("127.0.0.1", 7051)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_ts_liveness_timeout() -> Duration {
    Duration::from_secs(65)
}

fn default_max_assignments_per_heartbeat() -> usize {
    16
}

fn default_tsk_validity() -> Duration {
    // One week; keys are rotated well before expiry.
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_cert_validity() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        MasterConfig::default().validate().expect("default config valid");
    }

    #[test]
    fn test_builder_defaults_match_default() {
        assert_eq!(MasterConfig::builder().build(), MasterConfig::default());
    }

    #[test]
    fn test_rejects_liveness_shorter_than_heartbeat() {
        let config = MasterConfig::builder()
            .heartbeat_interval(Duration::from_secs(10))
            .ts_liveness_timeout(Duration::from_secs(1))
            .build();
        let err = config.validate().expect_err("liveness shorter than heartbeat");
        assert!(err.to_string().contains("ts_liveness_timeout"));
    }

    #[test]
    fn test_rejects_zero_heartbeat_interval() {
        let config =
            MasterConfig::builder().heartbeat_interval(Duration::ZERO).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_assignment_cap() {
        let config = MasterConfig::builder().max_assignments_per_heartbeat(0).build();
        assert!(config.validate().is_err());
    }
}
