//! Parametrized topologies.
//!
//! Hosts get `172.16.(100 + i).1/24` with their router at `.2` of the same
//! subnet; the k-th transit link between neighbouring routers uses
//! `172.16.(9 + k).0/24` with the left router at `.2` and the right one at
//! `.3`.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use super::{EndpointSpec, TopologyConfig};
use crate::NetworkId;
use crate::error::ConfigurationError;

const MAX_HOSTS: usize = 155;
const MAX_ROUTERS: usize = 90;

fn subnet_address(third: usize, host: u8) -> Result<NetworkId, ConfigurationError> {
    let third = u8::try_from(third)
        .map_err(|_| ConfigurationError::Preset(format!("subnet octet {} out of range", third)))?;
    Ipv4Net::new(Ipv4Addr::new(172, 16, third, host), 24)
        .map_err(|e| ConfigurationError::Preset(e.to_string()))
}

/// Routers `r1..rN` connected in a line, each with `hosts_per_router` hosts.
///
/// `chain(2, 1)` and `chain(2, 3)` follow the address plans of the
/// two-subnet and six-subnet labs; hosts are numbered round-robin so `r1`
/// owns `h1, h3, h5`. Router interfaces are numbered from `eth1`, transit
/// links first, so a single access interface is `r1-eth2`, not `r1-eth0`.
pub fn chain(routers: usize, hosts_per_router: usize) -> Result<TopologyConfig, ConfigurationError> {
    if routers == 0 {
        return Err(ConfigurationError::Preset("a chain needs at least one router".into()));
    }
    if routers > MAX_ROUTERS {
        return Err(ConfigurationError::Preset(format!("at most {} routers", MAX_ROUTERS)));
    }
    if routers * hosts_per_router > MAX_HOSTS {
        return Err(ConfigurationError::Preset(format!("at most {} hosts", MAX_HOSTS)));
    }

    let mut config = TopologyConfig::new();
    let mut next_if = vec![1usize; routers];
    let mut if_name = |router: usize| {
        let name = format!("r{}-eth{}", router + 1, next_if[router]);
        next_if[router] += 1;
        name
    };

    let mut transit_links = Vec::new();
    for k in 1..routers {
        let left = k - 1;
        let right = k;
        transit_links.push((
            EndpointSpec::new(format!("r{}", left + 1))
                .named(if_name(left))
                .addressed(subnet_address(9 + k, 2)?),
            EndpointSpec::new(format!("r{}", right + 1))
                .named(if_name(right))
                .addressed(subnet_address(9 + k, 3)?),
        ));
    }

    let mut access_links = Vec::new();
    for slot in 0..hosts_per_router {
        for router in 0..routers {
            let index = slot * routers + router + 1;
            let host_address = subnet_address(100 + index, 1)?;
            let router_address = subnet_address(100 + index, 2)?;
            let host = format!("h{}", index);

            config = config.host(&host, host_address, Some(router_address.addr()));
            access_links.push((
                EndpointSpec::new(host),
                EndpointSpec::new(format!("r{}", router + 1))
                    .named(if_name(router))
                    .addressed(router_address),
            ));
        }
    }

    for router in 0..routers {
        let address = if hosts_per_router > 0 {
            subnet_address(100 + router + 1, 2)?
        } else if router + 1 < routers {
            subnet_address(10 + router, 2)?
        } else if router > 0 {
            subnet_address(9 + router, 3)?
        } else {
            subnet_address(100, 2)?
        };
        config = config.router(&format!("r{}", router + 1), address);
    }

    for (a, b) in transit_links.into_iter().chain(access_links) {
        config = config.link(a, b);
    }

    Ok(config)
}

/// One router `r1` with `hosts` directly attached hosts and no transit link.
pub fn single_router(hosts: usize) -> Result<TopologyConfig, ConfigurationError> {
    chain(1, hosts)
}
