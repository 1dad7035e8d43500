//! Kernel routing table access.
//!
//! The routing table is the only shared state the claim protocol touches.
//! [`RouteTable`] is the seam between the protocol and whatever holds the
//! routes: [`IpRouteTable`] drives the host's kernel through iproute2, and
//! [`MemoryRouteTable`] simulates one in process.

pub mod coordinator;
pub mod iproute;
pub mod link;
pub mod memory;

use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;

use crate::error::RouteTableError;

pub use coordinator::RouteCoordinator;
pub use iproute::IpRouteTable;
pub use link::resolve_link;
pub use memory::MemoryRouteTable;

/// A local network interface
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    pub index: u32,
    pub name: String,
}

impl Link {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Link { index, name: name.into() }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (index {})", self.name, self.index)
    }
}

/// One entry as reported by the routing table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub dst: IpNet,
    pub gateway: Option<IpAddr>,
    pub link: Link,
    /// Protocol tag, `None` when the backend did not report one
    pub protocol: Option<u8>,
}

/// A full-length route used as an address claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRoute {
    pub link: Link,
    pub dst: IpNet,
    pub protocol: u8,
}

/// Primitive routing table operations the claim protocol is built on
pub trait RouteTable {
    /// Routes the table would use to reach `addr`, in preference order
    fn route_get(&self, addr: IpAddr) -> Result<Vec<RouteEntry>, RouteTableError>;

    /// Routes whose destination is exactly `dst`
    fn routes_to(&self, dst: &IpNet) -> Result<Vec<RouteEntry>, RouteTableError>;

    /// Installs `route`
    fn add(&self, route: &HostRoute) -> Result<(), RouteTableError>;

    /// Removes `route`
    fn delete(&self, route: &HostRoute) -> Result<(), RouteTableError>;
}

impl<T: RouteTable + ?Sized> RouteTable for &T {
    fn route_get(&self, addr: IpAddr) -> Result<Vec<RouteEntry>, RouteTableError> {
        (**self).route_get(addr)
    }

    fn routes_to(&self, dst: &IpNet) -> Result<Vec<RouteEntry>, RouteTableError> {
        (**self).routes_to(dst)
    }

    fn add(&self, route: &HostRoute) -> Result<(), RouteTableError> {
        (**self).add(route)
    }

    fn delete(&self, route: &HostRoute) -> Result<(), RouteTableError> {
        (**self).delete(route)
    }
}
