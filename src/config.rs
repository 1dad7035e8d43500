use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ip::Exclusions;

/// How long to wait for a competing claim to show up (ms)
pub const DEFAULT_PROPAGATION_WINDOW_MS: u64 = 100;
/// Idle time between attempts (ms)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;
/// Protocol number our host routes are tagged with
pub const DEFAULT_ROUTE_PROTOCOL: u8 = 192;

/// Highest protocol number the kernel reserves for itself (RTPROT_STATIC)
const MAX_RESERVED_PROTOCOL: u8 = 4;

/// Tunables for address selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpamConfig {
    /// Time budget for a route installed elsewhere to become visible here
    #[serde(with = "humantime_serde")]
    pub propagation_window: Duration,
    /// Idle time between attempts, for both random and requested addresses
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Protocol number tagging our host routes
    pub route_protocol: u8,
    /// Offsets skipped at the start of the subnet for random selection
    pub exclude_first: u32,
    /// Offsets skipped at the end of the subnet for random selection
    pub exclude_last: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Log file to append to instead of stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for IpamConfig {
    fn default() -> Self {
        Self {
            propagation_window: Duration::from_millis(DEFAULT_PROPAGATION_WINDOW_MS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            route_protocol: DEFAULT_ROUTE_PROTOCOL,
            exclude_first: 0,
            exclude_last: 0,
            log_level: None,
            log_file: None,
        }
    }
}

impl IpamConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.route_protocol <= MAX_RESERVED_PROTOCOL {
            return Err(ValidationError::ReservedProtocol(self.route_protocol));
        }

        if let Some(level) = &self.log_level {
            if log::LevelFilter::from_str(level).is_err() {
                return Err(ValidationError::InvalidLogLevel(level.clone()));
            }
        }

        Ok(())
    }

    pub fn exclusions(&self) -> Exclusions {
        Exclusions::new(self.exclude_first, self.exclude_last)
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("route protocol {0} is reserved by the kernel (must be above 4)")]
    ReservedProtocol(u8),
    #[error("invalid log level '{0}'")]
    InvalidLogLevel(String),
}
