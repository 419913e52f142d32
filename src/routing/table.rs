use std::fmt;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::NetworkId;
use crate::error::ProvisioningError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Connected, // installed by the kernel for an interface address
    Static,
}

/// One line of `ip -4 route show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: NetworkId,
    pub next_hop: Option<Ipv4Addr>,
    pub interface: Option<String>,
    pub source: RouteSource,
}

/// Snapshot of a node's IPv4 main table.
#[derive(Debug, Clone, Default)]
pub struct ForwardingTable {
    routes: Vec<RouteEntry>,
}

const ROUTE_TYPES: &[&str] = &[
    "unicast", "local", "broadcast", "multicast", "throw", "unreachable", "prohibit", "blackhole", "nat",
];

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.destination)?;
        if let Some(next_hop) = self.next_hop {
            write!(f, " via {}", next_hop)?;
        }
        if let Some(interface) = &self.interface {
            write!(f, " dev {}", interface)?;
        }
        Ok(())
    }
}

impl RouteEntry {
    fn parse(line: &str) -> Option<Self> {
        let mut words: Vec<&str> = line.split_whitespace().collect();
        if words.first().is_some_and(|w| ROUTE_TYPES.contains(w)) {
            words.remove(0);
        }
        let (destination, rest) = words.split_first()?;

        let destination = match *destination {
            "default" => Ipv4Net::default(),
            token => match token.parse::<Ipv4Net>() {
                Ok(net) => net.trunc(),
                Err(_) => Ipv4Net::from(token.parse::<Ipv4Addr>().ok()?),
            },
        };

        let mut entry = RouteEntry {
            destination,
            next_hop: None,
            interface: None,
            source: RouteSource::Static,
        };
        for pair in rest.windows(2) {
            match pair {
                ["via", gateway] => entry.next_hop = Some(gateway.parse().ok()?),
                ["dev", interface] => entry.interface = Some(interface.to_string()),
                ["proto", "kernel"] => entry.source = RouteSource::Connected,
                _ => {}
            }
        }
        Some(entry)
    }
}

impl ForwardingTable {
    /// Parses `ip -4 route show` output. Multipath continuation lines are
    /// ignored.
    pub fn parse(node: &str, output: &str) -> Result<Self, ProvisioningError> {
        let mut routes = Vec::new();
        for line in output.lines() {
            if line.trim().is_empty() || line.starts_with(char::is_whitespace) {
                continue;
            }
            let entry = RouteEntry::parse(line).ok_or_else(|| ProvisioningError::UnparsableRoute {
                node: node.to_string(),
                line: line.to_string(),
            })?;
            routes.push(entry);
        }
        Ok(Self { routes })
    }

    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    pub fn find_route(&self, destination: &NetworkId) -> Option<&RouteEntry> {
        self.routes.iter().find(|r| r.destination == *destination)
    }

    pub fn insert(&mut self, entry: RouteEntry) {
        self.routes.push(entry);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn static_routes(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.iter().filter(|r| r.source == RouteSource::Static)
    }
}
