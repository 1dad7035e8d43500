#[cfg(test)]
mod claim_protocol_tests {
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::net::IpAddr;
    use std::thread;
    use std::time::Duration;

    use ipnet::IpNet;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use routetable_ipam::config::IpamConfig;
    use routetable_ipam::error::{IpamError, RouteTableError};
    use routetable_ipam::ip::{AddressSelector, Attempt, Contention, Exclusions};
    use routetable_ipam::route::memory::RouteOp;
    use routetable_ipam::route::{HostRoute, Link, MemoryRouteTable, RouteEntry, RouteTable};

    const PROTOCOL: u8 = 192;

    fn config(window_ms: u64) -> IpamConfig {
        IpamConfig {
            propagation_window: Duration::from_millis(window_ms),
            retry_delay: Duration::ZERO,
            route_protocol: PROTOCOL,
            ..Default::default()
        }
    }

    fn eth1() -> Link {
        Link::new(3, "eth1")
    }

    fn shared_table(subnet: &str) -> MemoryRouteTable {
        let table = MemoryRouteTable::new();
        table.connect(eth1(), subnet.parse().unwrap());
        table
    }

    fn host_route(dst: &str) -> IpNet {
        dst.parse().unwrap()
    }

    /// A route to `dst` as it would appear when propagated from another host
    fn remote_claim(dst: IpNet) -> RouteEntry {
        RouteEntry {
            dst,
            gateway: Some("192.0.2.200".parse().unwrap()),
            link: Link::new(2, "eth0"),
            protocol: Some(186),
        }
    }

    /// Another host racing for the same address: its claim shows up as soon
    /// as ours is installed, and it backs off when we do.
    struct RacingPeer {
        table: MemoryRouteTable,
        contested: IpNet,
        raced: Cell<bool>,
    }

    impl RouteTable for RacingPeer {
        fn route_get(&self, addr: IpAddr) -> Result<Vec<RouteEntry>, RouteTableError> {
            self.table.route_get(addr)
        }

        fn routes_to(&self, dst: &IpNet) -> Result<Vec<RouteEntry>, RouteTableError> {
            self.table.routes_to(dst)
        }

        fn add(&self, route: &HostRoute) -> Result<(), RouteTableError> {
            self.table.add(route)?;
            if route.dst == self.contested && !self.raced.replace(true) {
                self.table.insert(remote_claim(route.dst));
            }
            Ok(())
        }

        fn delete(&self, route: &HostRoute) -> Result<(), RouteTableError> {
            self.table.delete(route)?;
            self.table.withdraw_foreign(&route.dst, PROTOCOL);
            Ok(())
        }
    }

    /// Drops the first claim installed, as if a route daemon had replaced it
    struct DisplacingTable {
        table: MemoryRouteTable,
        displaced: Cell<bool>,
    }

    impl RouteTable for DisplacingTable {
        fn route_get(&self, addr: IpAddr) -> Result<Vec<RouteEntry>, RouteTableError> {
            self.table.route_get(addr)
        }

        fn routes_to(&self, dst: &IpNet) -> Result<Vec<RouteEntry>, RouteTableError> {
            self.table.routes_to(dst)
        }

        fn add(&self, route: &HostRoute) -> Result<(), RouteTableError> {
            if !self.displaced.replace(true) {
                return Ok(());
            }
            self.table.add(route)
        }

        fn delete(&self, route: &HostRoute) -> Result<(), RouteTableError> {
            self.table.delete(route)
        }
    }

    /// Stops answering after a number of route listings, standing in for a
    /// caller-imposed timeout around an otherwise endless selection
    struct DeadlineTable {
        table: MemoryRouteTable,
        remaining: Cell<usize>,
    }

    impl RouteTable for DeadlineTable {
        fn route_get(&self, addr: IpAddr) -> Result<Vec<RouteEntry>, RouteTableError> {
            self.table.route_get(addr)
        }

        fn routes_to(&self, dst: &IpNet) -> Result<Vec<RouteEntry>, RouteTableError> {
            let remaining = self.remaining.get();
            if remaining == 0 {
                return Err(RouteTableError::CommandFailed {
                    command: "ip -json route show exact".to_string(),
                    status: "signal: 9 (SIGKILL)".to_string(),
                    stderr: String::new(),
                });
            }
            self.remaining.set(remaining - 1);
            self.table.routes_to(dst)
        }

        fn add(&self, route: &HostRoute) -> Result<(), RouteTableError> {
            self.table.add(route)
        }

        fn delete(&self, route: &HostRoute) -> Result<(), RouteTableError> {
            self.table.delete(route)
        }
    }

    /// One host's view of a routing table shared with other hosts. Each host
    /// reaches the subnet through its own link, so claims from different
    /// hosts coexist the way propagated routes do.
    #[derive(Clone)]
    struct HostView {
        table: MemoryRouteTable,
        subnet: IpNet,
        link: Link,
    }

    impl RouteTable for HostView {
        fn route_get(&self, _addr: IpAddr) -> Result<Vec<RouteEntry>, RouteTableError> {
            Ok(vec![RouteEntry {
                dst: self.subnet,
                gateway: None,
                link: self.link.clone(),
                protocol: Some(2),
            }])
        }

        fn routes_to(&self, dst: &IpNet) -> Result<Vec<RouteEntry>, RouteTableError> {
            self.table.routes_to(dst)
        }

        fn add(&self, route: &HostRoute) -> Result<(), RouteTableError> {
            self.table.add(route)
        }

        fn delete(&self, route: &HostRoute) -> Result<(), RouteTableError> {
            self.table.delete(route)
        }
    }

    #[test]
    fn test_random_selection_on_empty_table() {
        let table = shared_table("10.0.0.0/24");
        let mut selector =
            AddressSelector::new(table.clone(), &config(0)).with_rng(StdRng::seed_from_u64(1));

        let address = selector
            .select_address("10.0.0.0/24", Exclusions::default())
            .unwrap();

        assert!("10.0.0.0/24".parse::<IpNet>().unwrap().contains(&address.addr()));
        assert_eq!(table.count(&IpNet::from(address.addr())), 1);
        assert_eq!(table.journal().len(), 1);
    }

    #[test]
    fn test_random_selection_fills_subnet_without_duplicates() {
        let table = shared_table("10.0.0.0/29");
        let mut selector =
            AddressSelector::new(table.clone(), &config(0)).with_rng(StdRng::seed_from_u64(3));

        let mut claimed = HashSet::new();
        for _ in 0..6 {
            let address = selector
                .select_address("10.0.0.0/29", Exclusions::new(1, 1))
                .unwrap();
            assert!(claimed.insert(address.addr()), "{} handed out twice", address);
        }

        let expected: HashSet<IpAddr> = (1..=6)
            .map(|i| format!("10.0.0.{}", i).parse().unwrap())
            .collect();
        assert_eq!(claimed, expected);
    }

    #[test]
    fn test_requested_address_scenario() {
        let table = shared_table("10.0.0.0/24");
        let mut selector = AddressSelector::new(table.clone(), &config(0));

        let address = selector
            .select_address("10.0.0.5/24", Exclusions::new(1, 1))
            .unwrap();

        assert_eq!(address.to_string(), "10.0.0.5/24");
        let routes = table.routes_to(&host_route("10.0.0.5/32")).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].protocol, Some(PROTOCOL));
        assert_eq!(routes[0].link, eth1());
    }

    #[test]
    fn test_preexisting_route_is_never_claimed() {
        let table = shared_table("10.0.0.0/30");
        table.insert(remote_claim(host_route("10.0.0.1/32")));
        let mut selector =
            AddressSelector::new(table.clone(), &config(0)).with_rng(StdRng::seed_from_u64(5));

        let selection = selector
            .plan("10.0.0.0/30".parse().unwrap(), None, Exclusions::new(1, 1))
            .unwrap();

        let mut claimed = None;
        for _ in 0..64 {
            match selector.attempt(&selection).unwrap() {
                Attempt::Claimed(address) => {
                    claimed = Some(address);
                    break;
                }
                Attempt::Contended { address, reason } => {
                    assert_eq!(address.to_string(), "10.0.0.1/30");
                    assert_eq!(reason, Contention::Occupied);
                }
            }
        }

        assert_eq!(claimed.map(|a| a.to_string()), Some("10.0.0.2/30".to_string()));
        // Only the winning claim was ever installed
        assert_eq!(
            table.journal(),
            vec![RouteOp::Add(HostRoute {
                link: eth1(),
                dst: host_route("10.0.0.2/32"),
                protocol: PROTOCOL,
            })]
        );
    }

    #[test]
    fn test_collision_withdraws_own_claim_once() {
        let table = shared_table("10.0.0.0/24");
        let contested = host_route("10.0.0.5/32");
        let peer = RacingPeer {
            table: table.clone(),
            contested,
            raced: Cell::new(false),
        };
        let mut selector = AddressSelector::new(peer, &config(0));

        let selection = selector
            .plan(
                "10.0.0.0/24".parse().unwrap(),
                Some("10.0.0.5".parse().unwrap()),
                Exclusions::default(),
            )
            .unwrap();

        let first = selector.attempt(&selection).unwrap();
        assert_eq!(
            first,
            Attempt::Contended {
                address: "10.0.0.5/24".parse().unwrap(),
                reason: Contention::Collided,
            }
        );
        assert_eq!(table.deletes_of(&contested), 1);
        assert_eq!(table.count(&contested), 0);

        let second = selector.attempt(&selection).unwrap();
        assert_eq!(second, Attempt::Claimed("10.0.0.5/24".parse().unwrap()));
        assert_eq!(table.deletes_of(&contested), 1);
        assert_eq!(table.count(&contested), 1);
    }

    #[test]
    fn test_collision_then_claim_through_select() {
        let table = shared_table("10.0.0.0/24");
        let contested = host_route("10.0.0.7/32");
        let peer = RacingPeer {
            table: table.clone(),
            contested,
            raced: Cell::new(false),
        };
        let mut selector = AddressSelector::new(peer, &config(1));

        let address = selector
            .select_address("10.0.0.7/24", Exclusions::default())
            .unwrap();

        assert_eq!(address.to_string(), "10.0.0.7/24");
        let claim = HostRoute {
            link: eth1(),
            dst: contested,
            protocol: PROTOCOL,
        };
        assert_eq!(
            table.journal(),
            vec![
                RouteOp::Add(claim.clone()),
                RouteOp::Delete(claim.clone()),
                RouteOp::Add(claim),
            ]
        );
        assert_eq!(table.count(&contested), 1);
    }

    #[test]
    fn test_vanished_claim_is_retried() {
        let table = shared_table("10.0.0.0/24");
        let displacing = DisplacingTable {
            table: table.clone(),
            displaced: Cell::new(false),
        };
        let mut selector = AddressSelector::new(displacing, &config(0));

        let selection = selector
            .plan(
                "10.0.0.0/24".parse().unwrap(),
                Some("10.0.0.8".parse().unwrap()),
                Exclusions::default(),
            )
            .unwrap();

        let first = selector.attempt(&selection).unwrap();
        assert!(matches!(
            first,
            Attempt::Contended { reason: Contention::Vanished, .. }
        ));
        // Nothing to clean up after a vanished claim
        assert_eq!(table.deletes_of(&host_route("10.0.0.8/32")), 0);

        let second = selector.attempt(&selection).unwrap();
        assert_eq!(second, Attempt::Claimed("10.0.0.8/24".parse().unwrap()));
    }

    #[test]
    fn test_held_requested_address_blocks_until_deadline() {
        let table = shared_table("10.0.0.0/24");
        let mut winner = AddressSelector::new(table.clone(), &config(0));
        winner
            .select_address("10.0.0.5/24", Exclusions::default())
            .unwrap();

        let deadline = DeadlineTable {
            table: table.clone(),
            remaining: Cell::new(25),
        };
        let mut loser = AddressSelector::new(deadline, &config(0));

        let err = loser
            .select_address("10.0.0.5/24", Exclusions::default())
            .unwrap_err();

        assert!(matches!(err, IpamError::KernelQuery { .. }));
        assert_eq!(table.count(&host_route("10.0.0.5/32")), 1);
        // The loser never installed anything
        assert_eq!(table.journal().len(), 1);
    }

    #[test]
    fn test_failed_recount_withdraws_claim() {
        let table = shared_table("10.0.0.0/24");
        // The listing before the install answers, the one after the window fails
        let flaky = DeadlineTable {
            table: table.clone(),
            remaining: Cell::new(1),
        };
        let mut selector = AddressSelector::new(flaky, &config(0));

        let err = selector
            .select_address("10.0.0.5/24", Exclusions::default())
            .unwrap_err();

        assert!(matches!(err, IpamError::KernelQuery { .. }));
        assert_eq!(table.count(&host_route("10.0.0.5/32")), 0);
        assert_eq!(table.deletes_of(&host_route("10.0.0.5/32")), 1);
    }

    #[test]
    fn test_install_failure_is_not_retried() {
        let table = MemoryRouteTable::new();
        let view = HostView {
            table: table.clone(),
            subnet: "10.0.0.0/24".parse().unwrap(),
            link: Link::new(9, "missing0"),
        };
        let mut selector = AddressSelector::new(RefusingTable(view), &config(0));

        let err = selector
            .select_address("10.0.0.6/24", Exclusions::default())
            .unwrap_err();

        assert!(matches!(err, IpamError::RouteInstall { route, .. } if route == host_route("10.0.0.6/32")));
        assert!(table.routes().is_empty());
    }

    /// Rejects every install, like a kernel refusing a route on a bad link
    struct RefusingTable(HostView);

    impl RouteTable for RefusingTable {
        fn route_get(&self, addr: IpAddr) -> Result<Vec<RouteEntry>, RouteTableError> {
            self.0.route_get(addr)
        }

        fn routes_to(&self, dst: &IpNet) -> Result<Vec<RouteEntry>, RouteTableError> {
            self.0.routes_to(dst)
        }

        fn add(&self, route: &HostRoute) -> Result<(), RouteTableError> {
            Err(RouteTableError::UnknownLink(route.link.name.clone()))
        }

        fn delete(&self, route: &HostRoute) -> Result<(), RouteTableError> {
            self.0.delete(route)
        }
    }

    #[test]
    fn test_racing_hosts_end_with_distinct_claims() {
        let table = MemoryRouteTable::new();
        let subnet: IpNet = "10.0.0.0/28".parse().unwrap();

        let handles: Vec<_> = (0..2u32)
            .map(|host| {
                let view = HostView {
                    table: table.clone(),
                    subnet,
                    link: Link::new(10 + host, format!("host{}", host)),
                };
                thread::spawn(move || {
                    let mut selector = AddressSelector::new(view, &config(5))
                        .with_rng(StdRng::seed_from_u64(u64::from(host) + 100));
                    selector.select_address("10.0.0.0/28", Exclusions::new(1, 1))
                })
            })
            .collect();

        let claimed: Vec<IpNet> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        assert_ne!(claimed[0].addr(), claimed[1].addr());
        for address in &claimed {
            assert_eq!(table.count(&IpNet::from(address.addr())), 1);
        }
        assert_eq!(table.routes().len(), 2);
    }
}
