use std::collections::HashMap;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use log::debug;

use super::{CommandOutput, EmulationPlatform};
use crate::NetworkId;
use crate::error::ProvisioningError;
use crate::network::{Endpoint, Role};

const FILE_EXISTS: &str = "RTNETLINK answers: File exists";
const NO_SUCH_PROCESS: &str = "RTNETLINK answers: No such process";

/// Everything the simulated platform was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    NodeCreated(String),
    LinkCreated { a: Endpoint, b: Endpoint },
    Command { node: String, command: String },
    NodeDestroyed(String),
}

#[derive(Debug, Clone)]
struct SimInterface {
    name: String,
    address: Option<NetworkId>,
    up: bool,
}

#[derive(Debug, Clone)]
struct SimRoute {
    destination: NetworkId,
    gateway: Option<Ipv4Addr>,
    device: String,
}

#[derive(Debug, Clone)]
struct SimNode {
    interfaces: Vec<SimInterface>,
    forwarding: bool,
    routes: Vec<SimRoute>,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    node: String,
    pattern: String,
    stderr: String,
}

/// In-memory platform that interprets the `ip`/`sysctl` subset the lab
/// issues and keeps a kernel-like IPv4 table per node.
#[derive(Debug, Default)]
pub struct SimulatedPlatform {
    nodes: HashMap<String, SimNode>,
    events: Vec<PlatformEvent>,
    failures: Vec<InjectedFailure>,
}

fn parse_destination(token: &str) -> Result<NetworkId, CommandOutput> {
    if token == "default" {
        return Ok(Ipv4Net::default());
    }
    let destination = match token.parse::<NetworkId>() {
        Ok(net) => net,
        Err(_) => match token.parse::<Ipv4Addr>() {
            Ok(addr) => Ipv4Net::from(addr),
            Err(_) => {
                return Err(CommandOutput::failed(
                    1,
                    format!("Error: any valid prefix is expected rather than \"{}\".", token),
                ));
            }
        },
    };
    if destination != destination.trunc() {
        return Err(CommandOutput::failed(1, "Error: Invalid prefix for given prefix length."));
    }
    Ok(destination)
}

fn format_destination(destination: &NetworkId) -> String {
    if destination.prefix_len() == 0 {
        "default".to_string()
    } else if destination.prefix_len() == 32 {
        destination.addr().to_string()
    } else {
        destination.to_string()
    }
}

fn keyword<'a>(words: &[&'a str], key: &str) -> Option<&'a str> {
    words.windows(2).find(|w| w[0] == key).map(|w| w[1])
}

impl SimNode {
    fn new() -> Self {
        Self {
            interfaces: Vec::new(),
            forwarding: false,
            routes: Vec::new(),
        }
    }

    fn interpret(&mut self, words: &[&str]) -> CommandOutput {
        match words {
            ["sysctl", "-w", setting] | ["sysctl", setting] if setting.starts_with("net.ipv4.ip_forward=") => {
                self.set_forwarding(setting)
            }
            ["sysctl", "-n", "net.ipv4.ip_forward"] => CommandOutput::ok(format!("{}\n", u8::from(self.forwarding))),
            ["ip", "addr" | "address" | "a", "add", cidr, "dev", device] => self.add_address(cidr, device),
            ["ip", "link", "set", "dev", device, "up"] | ["ip", "link", "set", device, "up"] => self.link_up(device),
            ["ip", "route", "add", rest @ ..] => self.add_route(rest),
            ["ip", "route", "del", rest @ ..] => self.del_route(rest),
            ["ip", "-4", "route", "show", rest @ ..] | ["ip", "route", "show", rest @ ..] => self.show_routes(rest),
            ["ip", "-4", "route"] | ["ip", "route"] | ["route"] => self.show_routes(&[]),
            [program, ..] => CommandOutput::failed(
                127,
                format!("{}: not available on the simulated platform", program),
            ),
            [] => CommandOutput::failed(127, "empty command"),
        }
    }

    fn set_forwarding(&mut self, setting: &str) -> CommandOutput {
        match setting.split_once('=').map(|(_, v)| v) {
            Some("1") => self.forwarding = true,
            Some("0") => self.forwarding = false,
            _ => return CommandOutput::failed(255, format!("sysctl: setting key \"{}\": Invalid argument", setting)),
        }
        CommandOutput::ok(format!("net.ipv4.ip_forward = {}\n", u8::from(self.forwarding)))
    }

    fn interface_mut(&mut self, device: &str) -> Result<&mut SimInterface, CommandOutput> {
        self.interfaces
            .iter_mut()
            .find(|i| i.name == device)
            .ok_or_else(|| CommandOutput::failed(1, format!("Cannot find device \"{}\"", device)))
    }

    fn add_address(&mut self, cidr: &str, device: &str) -> CommandOutput {
        let Ok(address) = cidr.parse::<NetworkId>() else {
            return CommandOutput::failed(1, format!("Error: inet prefix is expected rather than \"{}\".", cidr));
        };
        match self.interface_mut(device) {
            Ok(interface) if interface.address == Some(address) => CommandOutput::failed(2, FILE_EXISTS),
            Ok(interface) => {
                interface.address = Some(address);
                CommandOutput::ok("")
            }
            Err(output) => output,
        }
    }

    fn link_up(&mut self, device: &str) -> CommandOutput {
        match self.interface_mut(device) {
            Ok(interface) => {
                interface.up = true;
                CommandOutput::ok("")
            }
            Err(output) => output,
        }
    }

    fn connected(&self) -> impl Iterator<Item = (&SimInterface, NetworkId)> {
        self.interfaces
            .iter()
            .filter(|i| i.up)
            .filter_map(|i| i.address.map(|a| (i, a)))
    }

    fn add_route(&mut self, rest: &[&str]) -> CommandOutput {
        let Some((dest, tail)) = rest.split_first() else {
            return CommandOutput::failed(1, "Error: destination is missing.");
        };
        let destination = match parse_destination(dest) {
            Ok(destination) => destination,
            Err(output) => return output,
        };

        let exists = self.routes.iter().any(|r| r.destination == destination)
            || self.connected().any(|(_, a)| a.trunc() == destination);
        if exists {
            return CommandOutput::failed(2, FILE_EXISTS);
        }

        let route = match (keyword(tail, "via"), keyword(tail, "dev")) {
            (Some(via), _) => {
                let Ok(gateway) = via.parse::<Ipv4Addr>() else {
                    return CommandOutput::failed(1, format!("Error: inet address is expected rather than \"{}\".", via));
                };
                let Some((interface, _)) = self.connected().find(|(_, a)| a.contains(&gateway)) else {
                    return CommandOutput::failed(2, "Error: Nexthop has invalid gateway.");
                };
                SimRoute {
                    destination,
                    gateway: Some(gateway),
                    device: interface.name.clone(),
                }
            }
            (None, Some(device)) => {
                if !self.interfaces.iter().any(|i| i.name == device) {
                    return CommandOutput::failed(1, format!("Cannot find device \"{}\"", device));
                }
                SimRoute {
                    destination,
                    gateway: None,
                    device: device.to_string(),
                }
            }
            (None, None) => return CommandOutput::failed(2, "Error: Device for nexthop is not up."),
        };

        self.routes.push(route);
        CommandOutput::ok("")
    }

    fn del_route(&mut self, rest: &[&str]) -> CommandOutput {
        let Some((dest, tail)) = rest.split_first() else {
            return CommandOutput::failed(1, "Error: destination is missing.");
        };
        let destination = match parse_destination(dest) {
            Ok(destination) => destination,
            Err(output) => return output,
        };
        let gateway = keyword(tail, "via").and_then(|v| v.parse::<Ipv4Addr>().ok());

        let before = self.routes.len();
        self.routes
            .retain(|r| !(r.destination == destination && (gateway.is_none() || r.gateway == gateway)));
        if self.routes.len() == before {
            CommandOutput::failed(2, NO_SUCH_PROCESS)
        } else {
            CommandOutput::ok("")
        }
    }

    fn show_routes(&self, filter: &[&str]) -> CommandOutput {
        let filter = match filter {
            [] => None,
            ["to", dest] | [dest] => match parse_destination(dest) {
                Ok(destination) => Some(destination),
                Err(output) => return output,
            },
            _ => return CommandOutput::failed(1, "Error: unsupported route selector."),
        };

        let mut lines: Vec<(NetworkId, String)> = Vec::new();
        for (interface, address) in self.connected() {
            lines.push((
                address.trunc(),
                format!(
                    "{} dev {} proto kernel scope link src {}",
                    format_destination(&address.trunc()),
                    interface.name,
                    address.addr()
                ),
            ));
        }
        for route in &self.routes {
            let line = match route.gateway {
                Some(gateway) => format!("{} via {} dev {}", format_destination(&route.destination), gateway, route.device),
                None => format!("{} dev {} scope link", format_destination(&route.destination), route.device),
            };
            lines.push((route.destination, line));
        }

        lines.retain(|(destination, _)| filter.is_none_or(|f| f == *destination));
        lines.sort_by_key(|(destination, _)| (destination.network(), destination.prefix_len()));

        let mut stdout = String::new();
        for (_, line) in lines {
            stdout.push_str(&line);
            stdout.push('\n');
        }
        CommandOutput::ok(stdout)
    }
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later command on `node` containing `pattern` fail with
    /// exit status 2 and the given stderr.
    pub fn fail_when(&mut self, node: &str, pattern: &str, stderr: &str) {
        self.failures.push(InjectedFailure {
            node: node.to_string(),
            pattern: pattern.to_string(),
            stderr: stderr.to_string(),
        });
    }

    pub fn events(&self) -> &[PlatformEvent] {
        &self.events
    }

    pub fn commands_on(&self, node: &str) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PlatformEvent::Command { node: n, command } if n == node => Some(command.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn forwarding(&self, node: &str) -> Option<bool> {
        self.nodes.get(node).map(|n| n.forwarding)
    }

    /// Non-connected routes of a node, in insertion order.
    pub fn static_routes(&self, node: &str) -> Vec<(NetworkId, Option<Ipv4Addr>)> {
        self.nodes
            .get(node)
            .map(|n| n.routes.iter().map(|r| (r.destination, r.gateway)).collect())
            .unwrap_or_default()
    }
}

impl EmulationPlatform for SimulatedPlatform {
    async fn create_node(&mut self, name: &str, role: Role) -> Result<(), ProvisioningError> {
        if self.nodes.contains_key(name) {
            return Err(ProvisioningError::CommandFailed {
                node: name.to_string(),
                command: format!("create {} {}", role, name),
                status: 1,
                stderr: FILE_EXISTS.to_string(),
            });
        }
        self.nodes.insert(name.to_string(), SimNode::new());
        self.events.push(PlatformEvent::NodeCreated(name.to_string()));
        debug!("Simulated {} {} created", role, name);
        Ok(())
    }

    async fn create_link(&mut self, a: &Endpoint, b: &Endpoint) -> Result<(), ProvisioningError> {
        for endpoint in [a, b] {
            let node = self
                .nodes
                .get(&endpoint.node)
                .ok_or_else(|| ProvisioningError::UnknownNode(endpoint.node.clone()))?;
            if node.interfaces.iter().any(|i| i.name == endpoint.interface) {
                return Err(ProvisioningError::CommandFailed {
                    node: endpoint.node.clone(),
                    command: format!("link {} <-> {}", a, b),
                    status: 2,
                    stderr: FILE_EXISTS.to_string(),
                });
            }
        }

        for endpoint in [a, b] {
            if let Some(node) = self.nodes.get_mut(&endpoint.node) {
                node.interfaces.push(SimInterface {
                    name: endpoint.interface.clone(),
                    address: None,
                    up: false,
                });
            }
        }
        self.events.push(PlatformEvent::LinkCreated { a: a.clone(), b: b.clone() });
        Ok(())
    }

    async fn exec(&mut self, node: &str, argv: &[String]) -> Result<CommandOutput, ProvisioningError> {
        if argv.is_empty() {
            return Err(ProvisioningError::EmptyCommand(node.to_string()));
        }
        if !self.nodes.contains_key(node) {
            return Err(ProvisioningError::UnknownNode(node.to_string()));
        }

        let command = argv.join(" ");
        self.events.push(PlatformEvent::Command {
            node: node.to_string(),
            command: command.clone(),
        });

        if let Some(failure) = self
            .failures
            .iter()
            .find(|f| f.node == node && command.contains(&f.pattern))
        {
            return Ok(CommandOutput::failed(2, failure.stderr.clone()));
        }

        let words: Vec<&str> = argv.iter().map(String::as_str).collect();
        match self.nodes.get_mut(node) {
            Some(state) => Ok(state.interpret(&words)),
            None => Err(ProvisioningError::UnknownNode(node.to_string())),
        }
    }

    async fn destroy_node(&mut self, name: &str) -> Result<(), ProvisioningError> {
        if self.nodes.remove(name).is_none() {
            return Err(ProvisioningError::UnknownNode(name.to_string()));
        }
        self.events.push(PlatformEvent::NodeDestroyed(name.to_string()));
        Ok(())
    }

    fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }
}
