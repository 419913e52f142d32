use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use crate::{LinkId, NetworkId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    /// Host address together with the prefix length of the attached subnet.
    pub address: NetworkId,
    /// Gateway for the node's default route, hosts only.
    pub default_via: Option<Ipv4Addr>,
    pub link: LinkId,
}

impl Interface {
    pub fn new(name: String, address: NetworkId, link: LinkId) -> Self {
        Self {
            name,
            address,
            default_via: None,
            link,
        }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.address.addr()
    }

    pub fn subnet(&self) -> NetworkId {
        self.address.trunc()
    }

    pub fn reaches(&self, target: Ipv4Addr) -> bool {
        self.address.contains(&target)
    }
}
