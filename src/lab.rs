use log::{error, info, warn};

use crate::error::{LabError, ProvisioningError};
use crate::network::Topology;
use crate::platform::{run_checked, CommandOutput, EmulationPlatform};
use crate::provision::LinkProvisioner;
use crate::router::{LifecycleController, RouterState};
use crate::routing::{ForwardingTable, InstallReport, Route, RouteInstaller, RouteSource, RoutePlan};
use crate::system::SystemIntegration;

/// A topology realized on a platform, with its routers and route plan.
pub struct Lab<P: EmulationPlatform> {
    topology: Topology,
    platform: P,
    lifecycle: LifecycleController,
    plan: RoutePlan,
}

impl<P: EmulationPlatform> Lab<P> {
    pub fn new(topology: Topology, platform: P) -> Self {
        let lifecycle = LifecycleController::for_topology(&topology);
        let plan = RoutePlan::compute(&topology);
        Self {
            topology,
            platform,
            lifecycle,
            plan,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn plan(&self) -> &RoutePlan {
        &self.plan
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Realize links, activate every router, then install the plan.
    pub async fn setup(&mut self) -> Result<Vec<InstallReport>, LabError> {
        self.realize_links().await?;
        self.activate_routers().await?;
        self.install_routes().await
    }

    pub async fn realize_links(&mut self) -> Result<(), LabError> {
        info!("*** Realizing topology ({} nodes, {} links)", self.topology.nodes().len(), self.topology.links().len());
        LinkProvisioner::realize(&mut self.platform, &self.topology, &mut self.lifecycle).await
    }

    pub async fn activate_routers(&mut self) -> Result<(), LabError> {
        info!("*** Enabling IP forwarding on routers");
        let routers: Vec<String> = self.lifecycle.routers().map(str::to_string).collect();
        for router in routers {
            self.lifecycle.activate(&mut self.platform, &router).await?;
        }
        Ok(())
    }

    pub async fn install_routes(&mut self) -> Result<Vec<InstallReport>, LabError> {
        info!("*** Installing {} static routes", self.plan.len());
        let reports = RouteInstaller::apply(&mut self.platform, &self.lifecycle, &self.plan).await?;
        let installed: usize = reports.iter().map(|r| r.installed.len()).sum();
        let present: usize = reports.iter().map(|r| r.already_present.len()).sum();
        info!("*** Routes installed: {} new, {} already present", installed, present);
        Ok(reports)
    }

    /// Runs an arbitrary command inside a node.
    pub async fn exec(&mut self, node: &str, argv: &[String]) -> Result<CommandOutput, ProvisioningError> {
        if self.topology.node(node).is_none() {
            return Err(ProvisioningError::UnknownNode(node.to_string()));
        }
        self.platform.exec(node, argv).await
    }

    /// Planned routes missing from the live tables.
    pub async fn verify(&mut self) -> Result<Vec<Route>, ProvisioningError> {
        RouteInstaller::verify(&mut self.platform, &self.plan).await
    }

    /// Live forwarding table and forwarding flag of every router.
    pub async fn routing_report(&mut self) -> Result<String, ProvisioningError> {
        let mut output = String::new();
        let routers: Vec<String> = self.topology.routers().map(|r| r.name.clone()).collect();
        for router in routers {
            let table = RouteInstaller::read_table(&mut self.platform, &router).await?;
            let forwarding = run_checked(&mut self.platform, &router, &SystemIntegration::query_forwarding()).await?;
            let state = self.lifecycle.state(&router).unwrap_or(RouterState::Created);
            Self::write_table(&mut output, &router, state, forwarding.trim() == "1", &table);
        }
        Ok(output)
    }

    fn write_table(output: &mut String, router: &str, state: RouterState, forwarding: bool, table: &ForwardingTable) {
        output.push_str(&format!("Routing Table of {} ({}, forwarding {}):\n", router, state,
                                 if forwarding { "on" } else { "off" }));
        output.push_str(&format!("{:<18} {:<15} {:<12} {:<10}\n", "Network", "Next Hop", "Interface", "Source"));
        output.push_str(&format!("{}\n", "-".repeat(58)));

        if table.is_empty() {
            output.push_str("No routes found\n");
        }
        for entry in table.routes() {
            let next_hop = entry.next_hop.map_or_else(|| "Direct".to_string(), |h| h.to_string());
            let source = match entry.source {
                RouteSource::Connected => "connected",
                RouteSource::Static => "static",
            };
            output.push_str(&format!("{:<18} {:<15} {:<12} {:<10}\n",
                                     entry.destination.to_string(),
                                     next_hop,
                                     entry.interface.as_deref().unwrap_or("-"),
                                     source));
        }
        output.push('\n');
    }

    /// Deactivates every active router, then destroys every node that
    /// exists. Keeps going past failures and returns the first one.
    pub async fn teardown(&mut self) -> Result<(), LabError> {
        info!("*** Stopping lab");
        let mut first_error: Option<LabError> = None;

        let routers: Vec<String> = self.lifecycle.routers().map(str::to_string).collect();
        for router in &routers {
            if self.lifecycle.state(router) != Some(RouterState::Active) {
                continue;
            }
            if let Err(e) = self.lifecycle.deactivate(&mut self.platform, router).await {
                error!("Failed to deactivate router {}: {}", router, e);
                first_error.get_or_insert(e);
            }
        }

        let names: Vec<String> = self.topology.nodes().iter().rev().map(|n| n.name.clone()).collect();
        for name in names {
            if !self.platform.has_node(&name) {
                continue;
            }
            if routers.contains(&name) {
                if let Err(e) = self.lifecycle.ensure_released(&name) {
                    warn!("Destroying router {} without releasing it: {}", name, e);
                }
            }
            if let Err(e) = self.platform.destroy_node(&name).await {
                error!("Failed to destroy node {}: {}", name, e);
                first_error.get_or_insert(e.into());
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("*** Lab stopped");
                Ok(())
            }
        }
    }
}
