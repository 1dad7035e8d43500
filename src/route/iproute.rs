//! Routing table backend that drives the host kernel through iproute2.
//!
//! Every operation runs `ip` synchronously with `-json` output and parses
//! the result. Needs CAP_NET_ADMIN for adds and deletes.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Command;

use ipnet::IpNet;
use log::trace;
use serde::Deserialize;

use super::{HostRoute, Link, RouteEntry, RouteTable};
use crate::error::RouteTableError;

/// Protocol names iproute2 prints in place of numbers (rt_protos)
const PROTOCOL_NAMES: &[(&str, u8)] = &[
    ("redirect", 1),
    ("kernel", 2),
    ("boot", 3),
    ("static", 4),
    ("gated", 8),
    ("ra", 9),
    ("mrt", 10),
    ("zebra", 11),
    ("bird", 12),
    ("dnrouted", 13),
    ("xorp", 14),
    ("ntk", 15),
    ("dhcp", 16),
    ("keepalived", 18),
    ("babel", 42),
    ("openr", 99),
    ("bgp", 186),
    ("isis", 187),
    ("ospf", 188),
    ("rip", 189),
    ("eigrp", 192),
];

#[derive(Debug, Deserialize)]
struct RouteJson {
    dst: String,
    gateway: Option<String>,
    dev: Option<String>,
    protocol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LinkJson {
    ifindex: u32,
    ifname: String,
}

#[derive(Debug, Clone)]
pub struct IpRouteTable {
    program: PathBuf,
}

impl Default for IpRouteTable {
    fn default() -> Self {
        IpRouteTable { program: PathBuf::from("ip") }
    }
}

impl IpRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `program` instead of `ip` from `PATH`
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        IpRouteTable { program: program.into() }
    }

    fn run(&self, args: &[&str]) -> Result<(String, Vec<u8>), RouteTableError> {
        let command = format!("{} {}", self.program.display(), args.join(" "));
        trace!("Running {}", command);

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| RouteTableError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RouteTableError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok((command, output.stdout))
    }

    fn link_named(&self, name: &str) -> Result<Link, RouteTableError> {
        let (command, stdout) = self.run(&["-json", "link", "show", "dev", name])?;
        let links: Vec<LinkJson> = parse_json(&command, &stdout)?;
        links
            .into_iter()
            .next()
            .map(|l| Link::new(l.ifindex, l.ifname))
            .ok_or_else(|| RouteTableError::UnknownLink(name.to_string()))
    }

    fn to_entries(&self, routes: Vec<RouteJson>, family: Family) -> Result<Vec<RouteEntry>, RouteTableError> {
        let mut entries = Vec::with_capacity(routes.len());
        for route in routes {
            let Some(dst) = parse_dst(&route.dst, family) else {
                trace!("Skipping route with unparseable destination '{}'", route.dst);
                continue;
            };
            // Blackhole and unreachable routes have no device
            let link = match route.dev.as_deref() {
                Some(dev) => self.link_named(dev)?,
                None => Link::new(0, ""),
            };
            entries.push(RouteEntry {
                dst,
                gateway: route.gateway.as_deref().and_then(|g| g.parse().ok()),
                link,
                protocol: route.protocol.as_deref().and_then(parse_protocol),
            });
        }
        Ok(entries)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

impl Family {
    fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    fn flag(self) -> &'static str {
        match self {
            Family::V4 => "-4",
            Family::V6 => "-6",
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(command: &str, stdout: &[u8]) -> Result<Vec<T>, RouteTableError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(stdout).map_err(|source| RouteTableError::Parse {
        command: command.to_string(),
        source,
    })
}

/// Parses an iproute2 `dst` field. Host routes are printed without a
/// prefix length and the default route as `default`.
fn parse_dst(dst: &str, family: Family) -> Option<IpNet> {
    if dst == "default" {
        return match family {
            Family::V4 => "0.0.0.0/0".parse().ok(),
            Family::V6 => "::/0".parse().ok(),
        };
    }
    dst.parse::<IpNet>()
        .ok()
        .or_else(|| dst.parse::<IpAddr>().ok().map(IpNet::from))
}

fn parse_protocol(protocol: &str) -> Option<u8> {
    protocol.parse().ok().or_else(|| {
        PROTOCOL_NAMES
            .iter()
            .find(|(name, _)| *name == protocol)
            .map(|(_, number)| *number)
    })
}

impl RouteTable for IpRouteTable {
    fn route_get(&self, addr: IpAddr) -> Result<Vec<RouteEntry>, RouteTableError> {
        let addr_text = addr.to_string();
        let (command, stdout) = self.run(&["-json", "route", "get", &addr_text])?;
        let routes: Vec<RouteJson> = parse_json(&command, &stdout)?;
        self.to_entries(routes, Family::of(&addr))
    }

    fn routes_to(&self, dst: &IpNet) -> Result<Vec<RouteEntry>, RouteTableError> {
        let family = Family::of(&dst.addr());
        let dst_text = dst.to_string();
        let (command, stdout) =
            self.run(&["-json", family.flag(), "route", "show", "exact", &dst_text])?;
        let routes: Vec<RouteJson> = parse_json(&command, &stdout)?;
        self.to_entries(routes, family)
    }

    fn add(&self, route: &HostRoute) -> Result<(), RouteTableError> {
        let dst = route.dst.to_string();
        let protocol = route.protocol.to_string();
        self.run(&["route", "add", &dst, "dev", &route.link.name, "proto", &protocol])?;
        Ok(())
    }

    fn delete(&self, route: &HostRoute) -> Result<(), RouteTableError> {
        let dst = route.dst.to_string();
        let protocol = route.protocol.to_string();
        self.run(&["route", "del", &dst, "dev", &route.link.name, "proto", &protocol])?;
        Ok(())
    }
}
