use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use env_logger::Env;
use log::{debug, info};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Duration;

use routetable_ipam::config::IpamConfig;
use routetable_ipam::config_loader::{self, ConfigOverrides};
use routetable_ipam::ip::AddressSelector;
use routetable_ipam::route::IpRouteTable;
use routetable_ipam::utils::parse_duration;

/// Claims container addresses by installing host routes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IPAM configuration file (YAML, or a JSON network config with an `ipam` section)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Protocol number tagging our host routes
    #[arg(long, global = true)]
    route_protocol: Option<u8>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Claim an address and print it as addr/prefix
    Select {
        /// Subnet to allocate from; a host address (e.g. 10.0.0.5/24) requests that address
        #[arg(long)]
        cidr: String,

        /// Offsets to skip at the start of the subnet
        #[arg(long)]
        exclude_first: Option<u32>,

        /// Offsets to skip at the end of the subnet
        #[arg(long)]
        exclude_last: Option<u32>,

        /// Time to wait for competing claims (e.g. 100ms, 2s)
        #[arg(long, value_parser = parse_duration)]
        propagation_window: Option<Duration>,

        /// Idle time between attempts
        #[arg(long, value_parser = parse_duration)]
        retry_delay: Option<Duration>,
    },

    /// Remove the claim on an address
    Release {
        /// Address to release, with or without its prefix
        #[arg(long)]
        cidr: String,
    },

    /// Exit with an error unless the address is held by exactly one claim of ours
    Verify {
        #[arg(long)]
        cidr: String,
    },
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides {
            route_protocol: self.route_protocol,
            log_level: self.log_level.clone(),
            ..Default::default()
        };

        if let Command::Select {
            exclude_first,
            exclude_last,
            propagation_window,
            retry_delay,
            ..
        } = &self.command
        {
            overrides.exclude_first = *exclude_first;
            overrides.exclude_last = *exclude_last;
            overrides.propagation_window = *propagation_window;
            overrides.retry_delay = *retry_delay;
        }

        overrides
    }
}

/// Logs go to stderr, or to the configured file, so stdout only ever
/// carries the result
fn init_logging(config: &IpamConfig) -> Result<()> {
    let level = config.log_level.as_deref().unwrap_or("info");
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(level));

    if let Some(path) = &config.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .wrap_err_with(|| format!("Failed to open log file '{}'", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config_loader::load_config(path)?,
        None => IpamConfig::default(),
    };
    config_loader::apply_overrides(&mut config, &args.overrides())?;

    init_logging(&config)?;
    if let Some(path) = &args.config {
        info!("Using configuration from {:?}", path);
    }
    debug!("Effective configuration: {:?}", config);

    let mut selector = AddressSelector::new(IpRouteTable::new(), &config);

    match &args.command {
        Command::Select { cidr, .. } => {
            info!("Selecting address from {}", cidr);
            let address = selector
                .select_address(cidr, config.exclusions())
                .wrap_err_with(|| format!("Failed to select an address from {}", cidr))?;
            println!("{}", address);
        }
        Command::Release { cidr } => {
            selector
                .release_address(cidr)
                .wrap_err_with(|| format!("Failed to release {}", cidr))?;
        }
        Command::Verify { cidr } => {
            if !selector.verify_claim(cidr)? {
                bail!("{} is not claimed by this host", cidr);
            }
            info!("{} is claimed", cidr);
        }
    }

    Ok(())
}
