//! In-process routing table.
//!
//! Behaves like a single host's main table: longest-prefix lookups, exact
//! destination listings, and EEXIST/ESRCH style failures on duplicate adds
//! and missing deletes. Clones share the same table, so several selectors
//! (on several threads) can race against each other the way separate hosts
//! race through propagated routes. Every add and delete is journaled.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ipnet::IpNet;

use super::{HostRoute, Link, RouteEntry, RouteTable};
use crate::error::RouteTableError;

/// Protocol number the kernel uses for connected routes
const PROTOCOL_KERNEL: u8 = 2;

/// A mutation applied through [`RouteTable`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOp {
    Add(HostRoute),
    Delete(HostRoute),
}

#[derive(Debug, Default)]
struct Inner {
    routes: Vec<RouteEntry>,
    journal: Vec<RouteOp>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRouteTable {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attaches `subnet` to `link` with a connected (gateway-less) route
    pub fn connect(&self, link: Link, subnet: IpNet) {
        self.insert(RouteEntry {
            dst: subnet.trunc(),
            gateway: None,
            link,
            protocol: Some(PROTOCOL_KERNEL),
        });
    }

    /// Adds a route via `gateway`
    pub fn add_gateway_route(&self, link: Link, dst: IpNet, gateway: IpAddr) {
        self.insert(RouteEntry {
            dst: dst.trunc(),
            gateway: Some(gateway),
            link,
            protocol: None,
        });
    }

    /// Inserts an arbitrary entry without journaling it.
    ///
    /// Use this for routes that appear from elsewhere, such as a claim
    /// propagated from another host.
    pub fn insert(&self, route: RouteEntry) {
        self.lock().routes.push(route);
    }

    /// Drops every route to exactly `dst` that did not come through
    /// [`RouteTable::add`] with `protocol`. Returns how many were removed.
    pub fn withdraw_foreign(&self, dst: &IpNet, protocol: u8) -> usize {
        let mut inner = self.lock();
        let before = inner.routes.len();
        inner
            .routes
            .retain(|r| r.dst != *dst || r.protocol == Some(protocol));
        before - inner.routes.len()
    }

    /// Snapshot of every route in the table
    pub fn routes(&self) -> Vec<RouteEntry> {
        self.lock().routes.clone()
    }

    /// Number of routes to exactly `dst`
    pub fn count(&self, dst: &IpNet) -> usize {
        self.lock().routes.iter().filter(|r| r.dst == *dst).count()
    }

    /// Every add and delete made through [`RouteTable`], in order
    pub fn journal(&self) -> Vec<RouteOp> {
        self.lock().journal.clone()
    }

    /// Number of deletes made for `dst`
    pub fn deletes_of(&self, dst: &IpNet) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|op| matches!(op, RouteOp::Delete(r) if r.dst == *dst))
            .count()
    }
}

fn same_claim(entry: &RouteEntry, route: &HostRoute) -> bool {
    entry.dst == route.dst && entry.link == route.link && entry.protocol == Some(route.protocol)
}

impl RouteTable for MemoryRouteTable {
    fn route_get(&self, addr: IpAddr) -> Result<Vec<RouteEntry>, RouteTableError> {
        let inner = self.lock();
        let mut matches: Vec<RouteEntry> = inner
            .routes
            .iter()
            .filter(|r| r.dst.contains(&addr))
            .cloned()
            .collect();

        if matches.is_empty() {
            return Err(RouteTableError::Unreachable(addr));
        }

        // Stable sort keeps insertion order among equal prefixes
        matches.sort_by(|a, b| b.dst.prefix_len().cmp(&a.dst.prefix_len()));
        Ok(matches)
    }

    fn routes_to(&self, dst: &IpNet) -> Result<Vec<RouteEntry>, RouteTableError> {
        Ok(self
            .lock()
            .routes
            .iter()
            .filter(|r| r.dst == *dst)
            .cloned()
            .collect())
    }

    fn add(&self, route: &HostRoute) -> Result<(), RouteTableError> {
        let mut inner = self.lock();
        if inner.routes.iter().any(|r| same_claim(r, route)) {
            return Err(RouteTableError::RouteExists(route.dst));
        }

        inner.routes.push(RouteEntry {
            dst: route.dst,
            gateway: None,
            link: route.link.clone(),
            protocol: Some(route.protocol),
        });
        inner.journal.push(RouteOp::Add(route.clone()));
        Ok(())
    }

    fn delete(&self, route: &HostRoute) -> Result<(), RouteTableError> {
        let mut inner = self.lock();
        let position = inner
            .routes
            .iter()
            .position(|r| same_claim(r, route))
            .ok_or(RouteTableError::NoSuchRoute(route.dst))?;

        inner.routes.remove(position);
        inner.journal.push(RouteOp::Delete(route.clone()));
        Ok(())
    }
}
