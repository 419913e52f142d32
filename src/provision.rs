use log::{debug, info};

use crate::error::{LabError, ProvisioningError};
use crate::network::{Endpoint, Link, LinkKind, Topology};
use crate::platform::{run_checked, EmulationPlatform};
use crate::router::LifecycleController;
use crate::system::SystemIntegration;

/// Realizes a topology's nodes and links on an emulation platform.
pub struct LinkProvisioner;

impl LinkProvisioner {
    /// Transit links first, then everything else in declaration order.
    /// Forwarding between routers breaks when a transit link is created
    /// after the access links depending on it.
    pub fn realization_order(topology: &Topology) -> Vec<&Link> {
        let (transit, others): (Vec<&Link>, Vec<&Link>) =
            topology.links().iter().partition(|l| l.kind == LinkKind::Transit);
        transit.into_iter().chain(others).collect()
    }

    pub async fn realize<P: EmulationPlatform>(
        platform: &mut P,
        topology: &Topology,
        lifecycle: &mut LifecycleController,
    ) -> Result<(), LabError> {
        info!("*** Creating {} nodes", topology.nodes().len());
        for node in topology.nodes() {
            platform.create_node(&node.name, node.role).await?;
        }

        let order = Self::realization_order(topology);
        info!("*** Creating {} links", order.len());
        for link in order {
            platform.create_link(&link.a, &link.b).await?;
            for endpoint in link.endpoints() {
                Self::configure_endpoint(platform, topology, endpoint).await?;
            }
            debug!("Link #{} {} <-> {} ready", link.id, link.a, link.b);
        }

        for host in topology.hosts() {
            if let Some((interface, via)) = host.default_route() {
                debug!("Default route on {} via {} ({})", host.name, via, interface.name);
                run_checked(platform, &host.name, &SystemIntegration::add_default_route(via)).await?;
            }
        }

        for router in topology.routers() {
            lifecycle.begin_configuring(&router.name)?;
        }
        Ok(())
    }

    async fn configure_endpoint<P: EmulationPlatform>(
        platform: &mut P,
        topology: &Topology,
        endpoint: &Endpoint,
    ) -> Result<(), ProvisioningError> {
        let interface = topology
            .interface(endpoint)
            .ok_or_else(|| ProvisioningError::UnknownNode(endpoint.to_string()))?;

        run_checked(platform, &endpoint.node, &SystemIntegration::add_address(&interface.name, &interface.address)).await?;
        run_checked(platform, &endpoint.node, &SystemIntegration::link_up(&interface.name)).await?;
        Ok(())
    }
}
