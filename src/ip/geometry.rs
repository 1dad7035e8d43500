//! Subnet geometry.
//!
//! Pure helpers that turn an address and a subnet into the two network
//! representations the claim protocol needs: the address carrying the
//! subnet's prefix (what gets reported) and the address as a full-length
//! host network (what gets routed). No I/O happens here.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use rand::Rng;

use crate::error::IpamError;

/// Offsets excluded from random selection at each end of a subnet
///
/// `first: 1, last: 1` skips the network and broadcast addresses of an IPv4
/// subnet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Exclusions {
    pub first: u32,
    pub last: u32,
}

impl Exclusions {
    pub fn new(first: u32, last: u32) -> Self {
        Exclusions { first, last }
    }
}

/// Returns `(address_in_subnet, address_only)` for `address`.
///
/// `address_in_subnet` carries the subnet's prefix length. `address_only` is
/// always a /32 or /128. Without a subnet, or with a subnet whose prefix does
/// not fit the address family, the full length is used for both.
pub fn derive_nets(address: IpAddr, subnet: Option<&IpNet>) -> (IpNet, IpNet) {
    let address_only = IpNet::from(address);

    let address_in_subnet = subnet
        .and_then(|sn| IpNet::new(address, sn.prefix_len()).ok())
        .unwrap_or(address_only);

    (address_in_subnet, address_only)
}

/// Parses CIDR text into the subnet and the requested address, if any.
///
/// The subnet is truncated to its network address. The address part only
/// counts as a request when it differs from the network address, so
/// `10.0.0.0/24` asks for any address while `10.0.0.5/24` asks for `.5`.
/// A prefix length is required; a bare address is `InvalidInput`.
pub fn parse_cidr(cidr: &str) -> Result<(IpNet, Option<IpAddr>), IpamError> {
    let cidr = cidr.trim();
    let net = cidr
        .parse::<IpNet>()
        .map_err(|_| IpamError::InvalidInput(format!("invalid CIDR '{}'", cidr)))?;

    let subnet = net.trunc();
    let requested = (net.addr() != subnet.addr()).then_some(net.addr());
    Ok((subnet, requested))
}

/// Inclusive range of usable host offsets, or `None` if the exclusions
/// cover the whole subnet.
pub fn usable_range(subnet: &IpNet, exclusions: Exclusions) -> Option<(u128, u128)> {
    let host_bits = u32::from(subnet.max_prefix_len() - subnet.prefix_len());
    let last = if host_bits >= 128 {
        u128::MAX
    } else {
        (1u128 << host_bits) - 1
    };

    let lo = u128::from(exclusions.first);
    let hi = last.checked_sub(u128::from(exclusions.last))?;
    (lo <= hi).then_some((lo, hi))
}

/// Address at `offset` from the network address of `subnet`
pub fn address_at(subnet: &IpNet, offset: u128) -> IpAddr {
    match subnet.network() {
        IpAddr::V4(network) => {
            IpAddr::V4(Ipv4Addr::from(u32::from(network).wrapping_add(offset as u32)))
        }
        IpAddr::V6(network) => {
            IpAddr::V6(Ipv6Addr::from(u128::from(network).wrapping_add(offset)))
        }
    }
}

/// Draws a uniformly random address from `subnet`, honoring `exclusions`.
///
/// Draws are independent; nothing is remembered between calls.
pub fn random_address<R: Rng + ?Sized>(
    subnet: &IpNet,
    exclusions: Exclusions,
    rng: &mut R,
) -> Option<IpAddr> {
    let (lo, hi) = usable_range(subnet, exclusions)?;
    Some(address_at(subnet, rng.gen_range(lo..=hi)))
}
