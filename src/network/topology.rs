use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{EndpointSpec, TopologyConfig};
use crate::error::ConfigurationError;
use crate::network::Interface;
use crate::{LinkId, NetworkId, RouterId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Host,
    Router,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub role: Role,
    /// Address declared on the node itself; endpoints without an explicit
    /// address take this one.
    pub address: NetworkId,
    pub interfaces: Vec<Interface>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkKind {
    /// Router to router.
    Transit,
    /// Host to router.
    Access,
    /// Host to host.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: String,
    pub interface: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub kind: LinkKind,
    pub a: Endpoint,
    pub b: Endpoint,
    pub subnet: NetworkId,
}

/// A router reachable over a transit link, seen from the local side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjacency {
    pub peer: RouterId,
    pub peer_address: Ipv4Addr,
    pub local_interface: String,
    pub link: LinkId,
}

/// Router-only view of a topology: one edge per connected router pair.
#[derive(Debug, Clone, Default)]
pub struct RouterGraph {
    routers: Vec<RouterId>,
    adjacency: HashMap<RouterId, Vec<Adjacency>>,
}

/// A validated, immutable topology.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    links: Vec<Link>,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => write!(f, "host"),
            Role::Router => write!(f, "router"),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.interface)
    }
}

impl Node {
    pub fn is_router(&self) -> bool {
        self.role == Role::Router
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    /// Subnets the node is directly attached to, in interface order.
    pub fn attached_subnets(&self) -> Vec<NetworkId> {
        let mut subnets = Vec::new();
        for interface in &self.interfaces {
            let subnet = interface.subnet();
            if !subnets.contains(&subnet) {
                subnets.push(subnet);
            }
        }
        subnets
    }

    pub fn default_route(&self) -> Option<(&Interface, Ipv4Addr)> {
        self.interfaces
            .iter()
            .find_map(|i| i.default_via.map(|via| (i, via)))
    }
}

impl Link {
    pub fn endpoints(&self) -> [&Endpoint; 2] {
        [&self.a, &self.b]
    }
}

impl RouterGraph {
    pub fn routers(&self) -> &[RouterId] {
        &self.routers
    }

    pub fn neighbors(&self, router: &str) -> &[Adjacency] {
        self.adjacency.get(router).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum::<usize>() / 2
    }
}

/// Per-node bookkeeping while links are being resolved.
struct NodeSlots {
    explicit_names: HashSet<String>,
    used_names: HashSet<String>,
    used_addresses: HashSet<Ipv4Addr>,
    next_auto: usize,
}

impl NodeSlots {
    fn next_name(&mut self, node: &str) -> String {
        loop {
            let candidate = format!("{}-eth{}", node, self.next_auto);
            self.next_auto += 1;
            if !self.used_names.contains(&candidate) && !self.explicit_names.contains(&candidate) {
                return candidate;
            }
        }
    }
}

impl Topology {
    /// Validates a declaration and turns it into a topology. Pure; the
    /// emulation platform is not involved.
    pub fn build(config: &TopologyConfig) -> Result<Self, ConfigurationError> {
        let mut nodes = Vec::new();
        let mut index = HashMap::new();

        let declared = config
            .hosts
            .iter()
            .map(|h| (&h.name, Role::Host, h.address))
            .chain(config.routers.iter().map(|r| (&r.name, Role::Router, r.address)));
        for (name, role, address) in declared {
            if index.insert(name.clone(), nodes.len()).is_some() {
                return Err(ConfigurationError::DuplicateNode(name.clone()));
            }
            nodes.push(Node {
                name: name.clone(),
                role,
                address,
                interfaces: Vec::new(),
            });
        }

        let mut slots: Vec<NodeSlots> = nodes
            .iter()
            .map(|_| NodeSlots {
                explicit_names: HashSet::new(),
                used_names: HashSet::new(),
                used_addresses: HashSet::new(),
                next_auto: 0,
            })
            .collect();

        for (id, link) in config.links.iter().enumerate() {
            for endpoint in [&link.endpoint_a, &link.endpoint_b] {
                let position = *index.get(&endpoint.node).ok_or_else(|| ConfigurationError::UnknownNode {
                    link: id,
                    node: endpoint.node.clone(),
                })?;
                if let Some(name) = &endpoint.if_name {
                    slots[position].explicit_names.insert(name.clone());
                }
            }
        }

        let mut links = Vec::with_capacity(config.links.len());
        for (id, spec) in config.links.iter().enumerate() {
            let a = index[&spec.endpoint_a.node];
            let b = index[&spec.endpoint_b.node];
            if a == b {
                return Err(ConfigurationError::SelfLink {
                    link: id,
                    node: spec.endpoint_a.node.clone(),
                });
            }

            let iface_a = Self::resolve_endpoint(id, &nodes[a], &mut slots[a], &spec.endpoint_a)?;
            let iface_b = Self::resolve_endpoint(id, &nodes[b], &mut slots[b], &spec.endpoint_b)?;
            if iface_a.subnet() != iface_b.subnet() {
                return Err(ConfigurationError::SubnetMismatch {
                    link: id,
                    a: iface_a.address,
                    b: iface_b.address,
                });
            }

            let kind = match (nodes[a].role, nodes[b].role) {
                (Role::Router, Role::Router) => LinkKind::Transit,
                (Role::Host, Role::Host) => LinkKind::Direct,
                _ => LinkKind::Access,
            };
            debug!("Link #{} {:?} {}:{} <-> {}:{}", id, kind,
                   nodes[a].name, iface_a.name, nodes[b].name, iface_b.name);

            links.push(Link {
                id,
                kind,
                a: Endpoint { node: nodes[a].name.clone(), interface: iface_a.name.clone() },
                b: Endpoint { node: nodes[b].name.clone(), interface: iface_b.name.clone() },
                subnet: iface_a.subnet(),
            });
            nodes[a].interfaces.push(iface_a);
            nodes[b].interfaces.push(iface_b);
        }

        for host in &config.hosts {
            let Some(gateway) = host.default_route_via else { continue };
            let node = &mut nodes[index[&host.name]];
            let Some(interface) = node.interfaces.iter_mut().find(|i| i.reaches(gateway)) else {
                return Err(ConfigurationError::UnreachableGateway {
                    host: host.name.clone(),
                    gateway,
                });
            };
            interface.default_via = Some(gateway);
        }

        for node in nodes.iter().filter(|n| !n.interfaces.is_empty()) {
            if !node.interfaces.iter().any(|i| i.address == node.address) {
                return Err(ConfigurationError::DeclaredAddressUnused {
                    node: node.name.clone(),
                    address: node.address,
                });
            }
        }

        Self::check_host_subnets(&nodes, &links)?;

        Ok(Self { nodes, index, links })
    }

    fn resolve_endpoint(
        link: LinkId,
        node: &Node,
        slots: &mut NodeSlots,
        spec: &EndpointSpec,
    ) -> Result<Interface, ConfigurationError> {
        let name = match &spec.if_name {
            Some(name) => {
                if !slots.used_names.insert(name.clone()) {
                    return Err(ConfigurationError::DuplicateInterface {
                        node: node.name.clone(),
                        interface: name.clone(),
                    });
                }
                name.clone()
            }
            None => {
                let name = slots.next_name(&node.name);
                slots.used_names.insert(name.clone());
                name
            }
        };

        let address = match spec.address {
            Some(address) => address,
            None if !slots.used_addresses.contains(&node.address.addr()) => node.address,
            None => {
                return Err(ConfigurationError::MissingAddress {
                    link,
                    node: node.name.clone(),
                    interface: name,
                });
            }
        };
        if !slots.used_addresses.insert(address.addr()) {
            return Err(ConfigurationError::DuplicateAddress {
                node: node.name.clone(),
                address,
            });
        }

        Ok(Interface::new(name, address, link))
    }

    /// Every subnet carrying a host must be disjoint from every other subnet.
    /// A host without links still claims the subnet of its declared address.
    fn check_host_subnets(nodes: &[Node], links: &[Link]) -> Result<(), ConfigurationError> {
        let overlaps = |a: &NetworkId, b: &NetworkId| a.contains(b) || b.contains(a);

        for link in links.iter().filter(|l| l.kind != LinkKind::Transit) {
            for other in links.iter().filter(|o| o.id != link.id) {
                if overlaps(&link.subnet, &other.subnet) {
                    return Err(ConfigurationError::OverlappingSubnets {
                        subnet: link.subnet,
                        other: other.subnet,
                    });
                }
            }
        }

        let unlinked: Vec<&Node> = nodes
            .iter()
            .filter(|n| n.role == Role::Host && n.interfaces.is_empty())
            .collect();
        for (i, host) in unlinked.iter().enumerate() {
            let subnet = host.address.trunc();
            let claimed = links
                .iter()
                .map(|l| l.subnet)
                .chain(unlinked[i + 1..].iter().map(|h| h.address.trunc()));
            for other in claimed {
                if overlaps(&subnet, &other) {
                    return Err(ConfigurationError::OverlappingSubnets { subnet, other });
                }
            }
        }
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn routers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.role == Role::Router)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.role == Role::Host)
    }

    pub fn interface(&self, endpoint: &Endpoint) -> Option<&Interface> {
        self.node(&endpoint.node)?.interface(&endpoint.interface)
    }

    /// Subnets reached through access links, in link declaration order,
    /// paired with the router that owns them.
    pub fn access_subnets(&self) -> Vec<(NetworkId, &str)> {
        self.links
            .iter()
            .filter(|l| l.kind == LinkKind::Access)
            .filter_map(|l| {
                let router = l.endpoints().into_iter().find(|e| {
                    self.node(&e.node).is_some_and(Node::is_router)
                })?;
                Some((l.subnet, router.node.as_str()))
            })
            .collect()
    }

    pub fn router_graph(&self) -> RouterGraph {
        let mut graph = RouterGraph {
            routers: self.routers().map(|r| r.name.clone()).collect(),
            adjacency: HashMap::new(),
        };

        for link in self.links.iter().filter(|l| l.kind == LinkKind::Transit) {
            for (local, remote) in [(&link.a, &link.b), (&link.b, &link.a)] {
                let Some(remote_interface) = self.interface(remote) else { continue };
                let neighbors = graph.adjacency.entry(local.node.clone()).or_default();
                if neighbors.iter().any(|n| n.peer == remote.node) {
                    debug!("Ignoring parallel transit link #{} between {} and {}",
                           link.id, local.node, remote.node);
                    continue;
                }
                neighbors.push(Adjacency {
                    peer: remote.node.clone(),
                    peer_address: remote_interface.ip(),
                    local_interface: local.interface.clone(),
                    link: link.id,
                });
            }
        }

        graph
    }
}
