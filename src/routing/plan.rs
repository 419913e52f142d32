use std::collections::HashSet;
use std::net::Ipv4Addr;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::algorithms::calculate_shortest_paths;
use crate::network::Topology;
use crate::{NetworkId, RouterId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub router: RouterId,
    #[serde(rename = "destinationPrefix")]
    pub destination: NetworkId,
    #[serde(rename = "nextHopAddress")]
    pub next_hop: Ipv4Addr,
}

/// Static routes derived from a topology's adjacency. There is no way to
/// edit a plan; compute a new one from the topology instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePlan {
    routes: Vec<Route>,
}

impl RoutePlan {
    /// For every router, one route per subnet hosted behind every other
    /// reachable router, via the first hop of the shortest path.
    pub fn compute(topology: &Topology) -> Self {
        let graph = topology.router_graph();
        let access = topology.access_subnets();
        let mut routes = Vec::new();

        for router in topology.routers() {
            let local = router.attached_subnets();
            let paths = calculate_shortest_paths(&graph, &router.name);
            let mut seen = HashSet::new();
            let mut unreachable = HashSet::new();

            for (subnet, owner) in &access {
                if *owner == router.name {
                    continue;
                }
                let Some(path) = paths.get(*owner) else {
                    if unreachable.insert(*owner) {
                        warn!("Router {} cannot reach router {}, skipping its subnets", router.name, owner);
                    }
                    continue;
                };
                if local.contains(subnet) {
                    warn!("Dropping route to {} on {}: directly attached", subnet, router.name);
                    continue;
                }
                if !seen.insert(*subnet) {
                    debug!("Duplicate destination {} for {}", subnet, router.name);
                    continue;
                }

                routes.push(Route {
                    router: router.name.clone(),
                    destination: *subnet,
                    next_hop: path.first_hop.peer_address,
                });
            }
        }

        info!("Route plan computed: {} routes for {} routers", routes.len(), graph.routers().len());
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn for_router<'a>(&'a self, router: &'a str) -> impl Iterator<Item = &'a Route> {
        self.routes.iter().filter(move |r| r.router == router)
    }

    /// Routers that own at least one route, in plan order.
    pub fn routers(&self) -> Vec<&str> {
        let mut routers: Vec<&str> = Vec::new();
        for route in &self.routes {
            if !routers.contains(&route.router.as_str()) {
                routers.push(&route.router);
            }
        }
        routers
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{presets, EndpointSpec, TopologyConfig};

    fn route(router: &str, destination: &str, next_hop: &str) -> Route {
        Route {
            router: router.to_string(),
            destination: destination.parse().unwrap(),
            next_hop: next_hop.parse().unwrap(),
        }
    }

    #[test]
    fn test_two_router_plan() {
        let topology = Topology::build(&presets::chain(2, 1).unwrap()).unwrap();
        let plan = RoutePlan::compute(&topology);

        assert_eq!(
            plan.routes(),
            &[
                route("r1", "172.16.102.0/24", "172.16.10.3"),
                route("r2", "172.16.101.0/24", "172.16.10.2"),
            ]
        );
    }

    #[test]
    fn test_six_subnet_plan() {
        let topology = Topology::build(&presets::chain(2, 3).unwrap()).unwrap();
        let plan = RoutePlan::compute(&topology);

        let r1: Vec<_> = plan.for_router("r1").cloned().collect();
        assert_eq!(
            r1,
            vec![
                route("r1", "172.16.102.0/24", "172.16.10.3"),
                route("r1", "172.16.104.0/24", "172.16.10.3"),
                route("r1", "172.16.106.0/24", "172.16.10.3"),
            ]
        );
        let r2: Vec<_> = plan.for_router("r2").collect();
        assert_eq!(r2.len(), 3);
        assert!(r2.iter().all(|r| r.next_hop == "172.16.10.2".parse::<Ipv4Addr>().unwrap()));
    }

    #[test]
    fn test_route_count_per_router() {
        for routers in 1..=5 {
            let topology = Topology::build(&presets::chain(routers, 1).unwrap()).unwrap();
            let plan = RoutePlan::compute(&topology);
            for router in topology.routers() {
                assert_eq!(plan.for_router(&router.name).count(), routers - 1);
            }
        }
    }

    #[test]
    fn test_chain_routes_through_middle_router() {
        let topology = Topology::build(&presets::chain(3, 1).unwrap()).unwrap();
        let plan = RoutePlan::compute(&topology);

        // r1 - r2 over 172.16.10.0/24, r2 - r3 over 172.16.11.0/24.
        assert!(plan.routes().contains(&route("r1", "172.16.103.0/24", "172.16.10.3")));
        assert!(plan.routes().contains(&route("r3", "172.16.101.0/24", "172.16.11.2")));
        assert!(plan.routes().contains(&route("r2", "172.16.101.0/24", "172.16.10.2")));
        assert!(plan.routes().contains(&route("r2", "172.16.103.0/24", "172.16.11.3")));
        assert_eq!(plan.routers(), vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn test_single_router_needs_no_routes() {
        let topology = Topology::build(&presets::single_router(2).unwrap()).unwrap();
        assert!(RoutePlan::compute(&topology).is_empty());
    }

    #[test]
    fn test_partitioned_routers_are_skipped() {
        let config = presets::chain(1, 1)
            .unwrap()
            .host("h9", "10.9.0.1/24".parse().unwrap(), None)
            .router("r9", "10.9.0.2/24".parse().unwrap())
            .link(EndpointSpec::new("h9"), EndpointSpec::new("r9"));
        let topology = Topology::build(&config).unwrap();

        assert!(RoutePlan::compute(&topology).is_empty());
    }

    #[test]
    fn test_router_without_hosts_learns_remote_subnets() {
        let config = TopologyConfig::new()
            .host("h1", "172.16.101.1/24".parse().unwrap(), None)
            .router("r1", "172.16.101.2/24".parse().unwrap())
            .router("r2", "172.16.10.3/24".parse().unwrap())
            .link(EndpointSpec::new("h1"), EndpointSpec::new("r1"))
            .link(
                EndpointSpec::new("r1").addressed("172.16.10.2/24".parse().unwrap()),
                EndpointSpec::new("r2"),
            );
        let topology = Topology::build(&config).unwrap();
        let plan = RoutePlan::compute(&topology);
        assert_eq!(plan.routes(), &[route("r2", "172.16.101.0/24", "172.16.10.2")]);
    }

    #[test]
    fn test_plan_json_shape() {
        let topology = Topology::build(&presets::chain(2, 1).unwrap()).unwrap();
        let json = RoutePlan::compute(&topology).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["routes"][0]["router"], "r1");
        assert_eq!(value["routes"][0]["destinationPrefix"], "172.16.102.0/24");
        assert_eq!(value["routes"][0]["nextHopAddress"], "172.16.10.3");
    }
}
