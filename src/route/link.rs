//! Link resolution.

use std::net::IpAddr;

use log::debug;

use super::{Link, RouteTable};
use crate::error::IpamError;

/// Finds the link `address` is directly attached to.
///
/// Asks the table how it would reach `address` and takes the first route
/// without a gateway. Gateway routes mean the address is not on a local
/// link, so if every route has one the result is `LinkNotFound`.
pub fn resolve_link<T: RouteTable + ?Sized>(table: &T, address: IpAddr) -> Result<Link, IpamError> {
    let routes = table.route_get(address).map_err(IpamError::query)?;

    let link = routes
        .into_iter()
        .find(|route| route.gateway.is_none())
        .map(|route| route.link)
        .ok_or(IpamError::LinkNotFound(address))?;

    debug!("Resolved link {} for {}", link, address);
    Ok(link)
}
