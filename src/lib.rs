//! # routetable-ipam - address management through the kernel routing table
//!
//! This library hands out unique IP addresses to container network
//! namespaces without a central allocator. The host routing table is the
//! coordination medium: an address is claimed by installing a full-length
//! host route to it, and the claim holds if, after a propagation window, that
//! route is the only one to the address. Routing infrastructure outside this
//! crate (e.g. a BGP daemon) redistributes the routes between hosts, so
//! racing hosts see each other's claims.
//!
//! ## Architecture
//!
//! - `ip::geometry`: subnet arithmetic, CIDR parsing, random candidates
//! - `ip::allocator`: the claim/back-off/retry loop (`AddressSelector`)
//! - `route`: the `RouteTable` seam, link resolution, claim installation,
//!   plus the iproute2 and in-memory backends
//! - `config` / `config_loader`: tunables and their YAML/JSON loading
//! - `error`: error types
//! - `utils`: duration parsing for the command line
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use routetable_ipam::config::IpamConfig;
//! use routetable_ipam::ip::{AddressSelector, Exclusions};
//! use routetable_ipam::route::IpRouteTable;
//!
//! let config = IpamConfig::default();
//! let mut selector = AddressSelector::new(IpRouteTable::new(), &config);
//!
//! // Any address in 10.0.0.0/24 except .0 and .255
//! let address = selector.select_address("10.0.0.0/24", Exclusions::new(1, 1))?;
//! println!("{}", address);
//! # Ok::<(), routetable_ipam::error::IpamError>(())
//! ```
//!
//! ## Error Handling
//!
//! Library functions return `IpamError`. Contention is never an error:
//! addresses that turn out to be taken are retried until one is claimed.
//! The binary wraps everything in `color_eyre` reports.

pub mod config;
pub mod config_loader;
pub mod error;
pub mod ip;
pub mod route;
pub mod utils;
