//! Address selection.
//!
//! Claims an address by installing a host route to it, waiting out the
//! propagation window, and then counting the routes to that address. If
//! exactly one route is visible, the address is ours. If none is, our route
//! was displaced. If more than one is, another host claimed the same address
//! at the same time and both sides back off. There is no tie-break: both
//! claimants delete their route and retry, and re-randomization is what
//! eventually separates them.
//!
//! Contention is an ordinary [`Attempt`] outcome. Only malformed input and
//! routing table failures are errors. Retries are unbounded, so callers that
//! need a deadline should run the selection under their own timeout or drive
//! [`AddressSelector::attempt`] themselves.

use std::fmt;
use std::net::IpAddr;
use std::thread;
use std::time::Duration;

use ipnet::IpNet;
use log::{debug, info, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::geometry::{derive_nets, parse_cidr, random_address, usable_range, Exclusions};
use crate::config::IpamConfig;
use crate::error::IpamError;
use crate::route::{resolve_link, Link, RouteCoordinator, RouteTable};

/// Which address an attempt proposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Always the same, caller-supplied address
    Requested(IpAddr),
    /// A fresh random draw on every attempt
    Random,
}

/// Everything fixed for the lifetime of one selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub subnet: IpNet,
    pub target: Target,
    pub exclusions: Exclusions,
    pub link: Link,
}

/// Why an attempt did not end in a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contention {
    /// A route to the candidate already existed, so nothing was installed
    Occupied,
    /// Our route was gone after the propagation window
    Vanished,
    /// Other claims became visible next to ours; ours was withdrawn
    Collided,
}

impl fmt::Display for Contention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contention::Occupied => write!(f, "already routed"),
            Contention::Vanished => write!(f, "claim vanished"),
            Contention::Collided => write!(f, "competing claim"),
        }
    }
}

/// Outcome of one propose/await/decide round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Claimed(IpNet),
    Contended { address: IpNet, reason: Contention },
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    address_in_subnet: IpNet,
    address_only: IpNet,
}

enum Phase {
    Propose,
    AwaitPropagation(Candidate),
    Decide(Candidate),
}

pub struct AddressSelector<T> {
    routes: RouteCoordinator<T>,
    propagation_window: Duration,
    retry_delay: Duration,
    rng: StdRng,
}

impl<T: RouteTable> AddressSelector<T> {
    pub fn new(table: T, config: &IpamConfig) -> Self {
        AddressSelector {
            routes: RouteCoordinator::new(table, config.route_protocol),
            propagation_window: config.propagation_window,
            retry_delay: config.retry_delay,
            rng: StdRng::from_entropy(),
        }
    }

    /// Replaces the random source, e.g. with a seeded one
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Claims an address from `cidr` and returns it with the subnet's prefix.
    ///
    /// `10.0.0.0/24` claims a random address, skipping the excluded offsets.
    /// `10.0.0.5/24` claims `10.0.0.5` and keeps retrying it until it is
    /// free.
    pub fn select_address(&mut self, cidr: &str, exclusions: Exclusions) -> Result<IpNet, IpamError> {
        let (subnet, requested) = parse_cidr(cidr)?;
        self.select_in_subnet(subnet, requested, exclusions)
    }

    /// Same as [`select_address`](Self::select_address) with the requested
    /// address given separately.
    pub fn select_in_subnet(
        &mut self,
        subnet: IpNet,
        requested: Option<IpAddr>,
        exclusions: Exclusions,
    ) -> Result<IpNet, IpamError> {
        let selection = self.plan(subnet, requested, exclusions)?;

        loop {
            match self.attempt(&selection)? {
                Attempt::Claimed(address) => return Ok(address),
                Attempt::Contended { address, reason } => {
                    debug!(
                        "{} not available ({}), retrying in {:?}",
                        address, reason, self.retry_delay
                    );
                    thread::sleep(self.retry_delay);
                }
            }
        }
    }

    /// Validates the request and resolves the link, once per selection
    pub fn plan(
        &self,
        subnet: IpNet,
        requested: Option<IpAddr>,
        exclusions: Exclusions,
    ) -> Result<Selection, IpamError> {
        let subnet = subnet.trunc();

        let target = match requested {
            Some(address) if !subnet.contains(&address) => {
                return Err(IpamError::InvalidInput(format!(
                    "requested address {} is not in subnet {}",
                    address, subnet
                )));
            }
            Some(address) => Target::Requested(address),
            None => {
                if usable_range(&subnet, exclusions).is_none() {
                    return Err(IpamError::InvalidInput(format!(
                        "excluding first {} and last {} leaves no usable address in {}",
                        exclusions.first, exclusions.last, subnet
                    )));
                }
                Target::Random
            }
        };

        let link = resolve_link(self.routes.table(), requested.unwrap_or(subnet.addr()))?;
        debug!("Selecting from {} on {} ({:?})", subnet, link, target);

        Ok(Selection {
            subnet,
            target,
            exclusions,
            link,
        })
    }

    /// Runs one propose/await/decide round for `selection`
    pub fn attempt(&mut self, selection: &Selection) -> Result<Attempt, IpamError> {
        let mut phase = Phase::Propose;

        loop {
            phase = match phase {
                Phase::Propose => {
                    let candidate = self.candidate(selection)?;
                    trace!("Proposing {}", candidate.address_in_subnet);

                    if self.routes.count_routes_to(&candidate.address_only)? > 0 {
                        return Ok(Attempt::Contended {
                            address: candidate.address_in_subnet,
                            reason: Contention::Occupied,
                        });
                    }

                    self.routes.add_claim(&selection.link, &candidate.address_only)?;
                    Phase::AwaitPropagation(candidate)
                }
                Phase::AwaitPropagation(candidate) => {
                    thread::sleep(self.propagation_window);
                    Phase::Decide(candidate)
                }
                Phase::Decide(candidate) => return self.decide(selection, candidate),
            };
        }
    }

    fn candidate(&mut self, selection: &Selection) -> Result<Candidate, IpamError> {
        let address = match selection.target {
            Target::Requested(address) => address,
            Target::Random => random_address(&selection.subnet, selection.exclusions, &mut self.rng)
                .ok_or_else(|| {
                    IpamError::InvalidInput(format!("no usable address in {}", selection.subnet))
                })?,
        };

        let (address_in_subnet, address_only) = derive_nets(address, Some(&selection.subnet));
        Ok(Candidate {
            address_in_subnet,
            address_only,
        })
    }

    fn decide(&self, selection: &Selection, candidate: Candidate) -> Result<Attempt, IpamError> {
        let address = candidate.address_in_subnet;

        let count = match self.routes.count_routes_to(&candidate.address_only) {
            Ok(count) => count,
            Err(e) => {
                // Our claim is installed; it must not outlive the failed call
                self.withdraw(selection, &candidate);
                return Err(e);
            }
        };

        match count {
            0 => Ok(Attempt::Contended {
                address,
                reason: Contention::Vanished,
            }),
            1 => {
                info!("Claimed {} on {}", address, selection.link);
                Ok(Attempt::Claimed(address))
            }
            n => {
                debug!("{} routes to {} after propagation window, backing off", n, candidate.address_only);
                self.withdraw(selection, &candidate);
                Ok(Attempt::Contended {
                    address,
                    reason: Contention::Collided,
                })
            }
        }
    }

    /// Best effort: the address is not ours whether or not this succeeds
    fn withdraw(&self, selection: &Selection, candidate: &Candidate) {
        if let Err(e) = self.routes.delete_claim(&selection.link, &candidate.address_only) {
            warn!("Failed to withdraw claim on {}: {}", candidate.address_only, e);
        }
    }

    /// Removes our claim on the address in `cidr`
    pub fn release_address(&self, cidr: &str) -> Result<IpNet, IpamError> {
        let (subnet, requested) = parse_cidr(cidr)?;
        let (_, address_only) = derive_nets(requested.unwrap_or(subnet.addr()), Some(&subnet));

        let link = resolve_link(self.routes.table(), address_only.addr())?;
        self.routes.delete_claim(&link, &address_only)?;
        info!("Released {} on {}", address_only, link);
        Ok(address_only)
    }

    /// Whether the address in `cidr` is held by exactly one claim of ours
    pub fn verify_claim(&self, cidr: &str) -> Result<bool, IpamError> {
        let (subnet, requested) = parse_cidr(cidr)?;
        let (_, address_only) = derive_nets(requested.unwrap_or(subnet.addr()), Some(&subnet));

        let total = self.routes.count_routes_to(&address_only)?;
        let ours = self.routes.claims_to(&address_only)?;
        debug!("{} route(s) to {}, {} tagged as ours", total, address_only, ours);
        Ok(total == 1 && ours == 1)
    }
}
