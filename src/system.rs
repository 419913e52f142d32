//! Command lines understood by the OS forwarding control surface of a node.

use std::net::Ipv4Addr;
use crate::NetworkId;

pub struct SystemIntegration;

pub(crate) fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

impl SystemIntegration {
    pub fn set_forwarding(enabled: bool) -> Vec<String> {
        let value = if enabled { "1" } else { "0" };
        args(&["sysctl", "-w", &format!("net.ipv4.ip_forward={}", value)])
    }

    pub fn query_forwarding() -> Vec<String> {
        args(&["sysctl", "-n", "net.ipv4.ip_forward"])
    }

    pub fn add_address(interface: &str, address: &NetworkId) -> Vec<String> {
        args(&["ip", "addr", "add", &address.to_string(), "dev", interface])
    }

    pub fn link_up(interface: &str) -> Vec<String> {
        args(&["ip", "link", "set", interface, "up"])
    }

    pub fn add_route(destination: &NetworkId, next_hop: Ipv4Addr) -> Vec<String> {
        args(&["ip", "route", "add", &destination.to_string(), "via", &next_hop.to_string()])
    }

    pub fn add_default_route(next_hop: Ipv4Addr) -> Vec<String> {
        args(&["ip", "route", "add", "default", "via", &next_hop.to_string()])
    }

    pub fn show_routes() -> Vec<String> {
        args(&["ip", "-4", "route", "show"])
    }
}
