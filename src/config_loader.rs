use crate::config::{IpamConfig, ValidationError};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::debug;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

/// Accepted file layouts: a bare IPAM section, or a network config that
/// carries it under `ipam`
#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigFile {
    Network { ipam: IpamConfig },
    Ipam(IpamConfig),
}

/// Load and parse configuration from a YAML or JSON file
pub fn load_config(config_path: &Path) -> Result<IpamConfig> {
    debug!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open config file '{}'", config_path.display()))?;

    let parsed: ConfigFile = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse config file '{}'", config_path.display()))?;

    let config = match parsed {
        ConfigFile::Network { ipam } => {
            debug!("Using ipam section of network configuration");
            ipam
        }
        ConfigFile::Ipam(config) => config,
    };

    config.validate()?;

    Ok(config)
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub propagation_window: Option<Duration>,
    pub retry_delay: Option<Duration>,
    pub route_protocol: Option<u8>,
    pub exclude_first: Option<u32>,
    pub exclude_last: Option<u32>,
    pub log_level: Option<String>,
}

/// Apply CLI overrides to a configuration
pub fn apply_overrides(
    config: &mut IpamConfig,
    overrides: &ConfigOverrides,
) -> Result<(), ValidationError> {
    if let Some(window) = overrides.propagation_window {
        config.propagation_window = window;
    }
    if let Some(delay) = overrides.retry_delay {
        config.retry_delay = delay;
    }
    if let Some(protocol) = overrides.route_protocol {
        config.route_protocol = protocol;
    }
    if let Some(first) = overrides.exclude_first {
        config.exclude_first = first;
    }
    if let Some(last) = overrides.exclude_last {
        config.exclude_last = last;
    }
    if let Some(level) = &overrides.log_level {
        config.log_level = Some(level.clone());
    }

    // Re-validate after applying overrides
    config.validate()
}
