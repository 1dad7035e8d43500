//! IP address selection.
//!
//! This module picks an address for a container: random or requested, within
//! a subnet, claimed through the routing table so that hosts sharing the
//! subnet never hand out the same address twice.

pub mod allocator;
pub mod geometry;

// Re-export commonly used types
pub use allocator::{AddressSelector, Attempt, Contention, Selection, Target};
pub use geometry::{derive_nets, parse_cidr, random_address, Exclusions};
