//! Host route claims.
//!
//! A claim on an address is a full-length route to it, tagged with our
//! protocol number and bound to the link the subnet lives on. This is the
//! only code that mutates the routing table.

use ipnet::IpNet;
use log::{debug, trace};

use super::{HostRoute, Link, RouteTable};
use crate::error::IpamError;

#[derive(Debug, Clone)]
pub struct RouteCoordinator<T> {
    table: T,
    protocol: u8,
}

impl<T: RouteTable> RouteCoordinator<T> {
    pub fn new(table: T, protocol: u8) -> Self {
        RouteCoordinator { table, protocol }
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    fn host_route(&self, link: &Link, address_only: &IpNet) -> HostRoute {
        HostRoute {
            link: link.clone(),
            dst: *address_only,
            protocol: self.protocol,
        }
    }

    /// Number of routes, from any owner, whose destination is `address_only`
    pub fn count_routes_to(&self, address_only: &IpNet) -> Result<usize, IpamError> {
        let count = self
            .table
            .routes_to(address_only)
            .map_err(IpamError::query)?
            .len();
        trace!("{} route(s) to {}", count, address_only);
        Ok(count)
    }

    /// Number of routes to `address_only` carrying our protocol tag
    pub fn claims_to(&self, address_only: &IpNet) -> Result<usize, IpamError> {
        Ok(self
            .table
            .routes_to(address_only)
            .map_err(IpamError::query)?
            .iter()
            .filter(|r| r.protocol == Some(self.protocol))
            .count())
    }

    pub fn add_claim(&self, link: &Link, address_only: &IpNet) -> Result<(), IpamError> {
        let route = self.host_route(link, address_only);
        self.table
            .add(&route)
            .map_err(|source| IpamError::RouteInstall { route: route.dst, source })?;
        debug!("Installed claim {} dev {} proto {}", route.dst, link.name, self.protocol);
        Ok(())
    }

    pub fn delete_claim(&self, link: &Link, address_only: &IpNet) -> Result<(), IpamError> {
        let route = self.host_route(link, address_only);
        self.table
            .delete(&route)
            .map_err(|source| IpamError::RouteRemove { route: route.dst, source })?;
        debug!("Removed claim {} dev {}", route.dst, link.name);
        Ok(())
    }
}
