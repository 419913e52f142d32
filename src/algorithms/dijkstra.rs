use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::RouterId;
use crate::network::{Adjacency, RouterGraph};

#[derive(Debug, Clone)]
pub struct ShortestPath {
    pub cost: u32,
    /// Neighbour of the source that starts the path.
    pub first_hop: Adjacency,
    pub path: Vec<RouterId>,
}

#[derive(Debug)]
struct State {
    cost: u32,
    seq: u64,
    router: RouterId,
    first_hop: Option<Adjacency>,
    path: Vec<RouterId>,
}

impl Eq for State {}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.seq == other.seq
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap; equal costs pop in push order.
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Unit-cost shortest paths from `source` to every reachable router.
///
/// Ties are broken by adjacency declaration order, so the result is stable
/// for a given topology.
pub fn calculate_shortest_paths(graph: &RouterGraph, source: &str) -> HashMap<RouterId, ShortestPath> {
    let mut distances: HashMap<RouterId, u32> = HashMap::new();
    let mut paths = HashMap::new();
    let mut heap = BinaryHeap::new();
    let mut seq = 0u64;

    distances.insert(source.to_string(), 0);
    heap.push(State {
        cost: 0,
        seq,
        router: source.to_string(),
        first_hop: None,
        path: vec![source.to_string()],
    });

    while let Some(State { cost, router, first_hop, path, .. }) = heap.pop() {
        if cost > distances.get(&router).copied().unwrap_or(u32::MAX) {
            continue;
        }

        if let Some(hop) = &first_hop {
            if paths.contains_key(&router) {
                continue;
            }
            paths.insert(router.clone(), ShortestPath {
                cost,
                first_hop: hop.clone(),
                path: path.clone(),
            });
        }

        for adjacency in graph.neighbors(&router) {
            let new_cost = cost + 1;

            if new_cost < distances.get(&adjacency.peer).copied().unwrap_or(u32::MAX) {
                distances.insert(adjacency.peer.clone(), new_cost);

                let mut new_path = path.clone();
                new_path.push(adjacency.peer.clone());

                seq += 1;
                heap.push(State {
                    cost: new_cost,
                    seq,
                    router: adjacency.peer.clone(),
                    first_hop: first_hop.clone().or_else(|| Some(adjacency.clone())),
                    path: new_path,
                });
            }
        }
    }

    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointSpec, TopologyConfig};
    use crate::network::Topology;

    fn ring() -> Topology {
        // r1 - r2 - r3 - r4 - r1
        let mut config = TopologyConfig::new();
        for i in 1..=4 {
            config = config.router(&format!("r{}", i), format!("10.0.{}.1/24", i).parse().unwrap());
        }
        for i in 1..=4u8 {
            let j = i % 4 + 1;
            config = config.link(
                EndpointSpec::new(format!("r{}", i)).addressed(format!("10.0.{}.1/24", i).parse().unwrap()),
                EndpointSpec::new(format!("r{}", j)).addressed(format!("10.0.{}.2/24", i).parse().unwrap()),
            );
        }
        Topology::build(&config).unwrap()
    }

    #[test]
    fn test_first_hops_in_ring() {
        let graph = ring().router_graph();
        let paths = calculate_shortest_paths(&graph, "r1");

        assert_eq!(paths.len(), 3);
        assert_eq!(paths["r2"].cost, 1);
        assert_eq!(paths["r2"].first_hop.peer, "r2");
        assert_eq!(paths["r4"].first_hop.peer, "r4");
        assert_eq!(paths["r3"].cost, 2);
        // Two equal paths to r3; the one through the first declared neighbour wins.
        assert_eq!(paths["r3"].first_hop.peer, "r2");
        assert_eq!(paths["r3"].path, vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn test_isolated_router_has_no_paths() {
        let graph = ring().router_graph();
        assert!(calculate_shortest_paths(&graph, "r9").is_empty());
    }
}
