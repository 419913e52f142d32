use log::{debug, info};

use super::plan::{Route, RoutePlan};
use super::table::{ForwardingTable, RouteEntry, RouteSource};
use crate::RouterId;
use crate::error::{LabError, ProvisioningError};
use crate::platform::{run_checked, EmulationPlatform};
use crate::router::LifecycleController;
use crate::system::SystemIntegration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub router: RouterId,
    pub installed: Vec<Route>,
    pub already_present: Vec<Route>,
}

/// Writes route plans into router forwarding tables.
pub struct RouteInstaller;

impl RouteInstaller {
    pub async fn read_table<P: EmulationPlatform>(platform: &mut P, node: &str) -> Result<ForwardingTable, ProvisioningError> {
        let output = run_checked(platform, node, &SystemIntegration::show_routes()).await?;
        ForwardingTable::parse(node, &output)
    }

    /// Applies the plan router by router, stopping at the first failure.
    /// Routers handled before the failure keep what was installed.
    pub async fn apply<P: EmulationPlatform>(
        platform: &mut P,
        lifecycle: &LifecycleController,
        plan: &RoutePlan,
    ) -> Result<Vec<InstallReport>, LabError> {
        let mut reports = Vec::new();
        for router in plan.routers() {
            let routes: Vec<&Route> = plan.for_router(router).collect();
            reports.push(Self::apply_router(platform, lifecycle, router, &routes).await?);
        }
        Ok(reports)
    }

    pub async fn apply_router<P: EmulationPlatform>(
        platform: &mut P,
        lifecycle: &LifecycleController,
        router: &str,
        routes: &[&Route],
    ) -> Result<InstallReport, LabError> {
        lifecycle.ensure_active(router)?;

        let mut table = Self::read_table(platform, router).await?;
        let mut report = InstallReport {
            router: router.to_string(),
            ..Default::default()
        };

        for route in routes {
            if let Some(existing) = table.find_route(&route.destination) {
                if existing.next_hop == Some(route.next_hop) {
                    debug!("Route to {} via {} already present on {}", route.destination, route.next_hop, router);
                    report.already_present.push((*route).clone());
                    continue;
                }
                return Err(ProvisioningError::ConflictingRoute {
                    router: router.to_string(),
                    route: (*route).clone(),
                    existing: existing.to_string(),
                }
                .into());
            }

            let argv = SystemIntegration::add_route(&route.destination, route.next_hop);
            run_checked(platform, router, &argv)
                .await
                .map_err(|e| ProvisioningError::RouteInstall {
                    router: router.to_string(),
                    route: (*route).clone(),
                    source: Box::new(e),
                })?;

            info!("Installed route on {}: {} via {}", router, route.destination, route.next_hop);
            table.insert(RouteEntry {
                destination: route.destination,
                next_hop: Some(route.next_hop),
                interface: None,
                source: RouteSource::Static,
            });
            report.installed.push((*route).clone());
        }

        Ok(report)
    }

    /// Planned routes that are missing from, or differ in, the live tables.
    pub async fn verify<P: EmulationPlatform>(platform: &mut P, plan: &RoutePlan) -> Result<Vec<Route>, ProvisioningError> {
        let mut missing = Vec::new();
        for router in plan.routers() {
            let table = Self::read_table(platform, router).await?;
            for route in plan.for_router(router) {
                let present = table
                    .find_route(&route.destination)
                    .is_some_and(|r| r.next_hop == Some(route.next_hop));
                if !present {
                    missing.push(route.clone());
                }
            }
        }
        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets;
    use crate::error::LifecycleError;
    use crate::network::Topology;
    use crate::platform::SimulatedPlatform;
    use crate::provision::LinkProvisioner;

    async fn provisioned(routers: usize, hosts: usize) -> (SimulatedPlatform, LifecycleController, RoutePlan) {
        let topology = Topology::build(&presets::chain(routers, hosts).unwrap()).unwrap();
        let mut platform = SimulatedPlatform::new();
        let mut lifecycle = LifecycleController::for_topology(&topology);
        LinkProvisioner::realize(&mut platform, &topology, &mut lifecycle).await.unwrap();
        (platform, lifecycle, RoutePlan::compute(&topology))
    }

    async fn activate_all(platform: &mut SimulatedPlatform, lifecycle: &mut LifecycleController) {
        let routers: Vec<String> = lifecycle.routers().map(str::to_string).collect();
        for router in routers {
            lifecycle.activate(platform, &router).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_install_before_activation_fails() {
        let (mut platform, lifecycle, plan) = provisioned(2, 1).await;

        let err = RouteInstaller::apply(&mut platform, &lifecycle, &plan).await.unwrap_err();
        assert!(matches!(err, LabError::Lifecycle(LifecycleError::NotActive { .. })));
        assert!(platform.static_routes("r1").is_empty());
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let (mut platform, mut lifecycle, plan) = provisioned(2, 3).await;
        activate_all(&mut platform, &mut lifecycle).await;

        let first = RouteInstaller::apply(&mut platform, &lifecycle, &plan).await.unwrap();
        assert_eq!(first.iter().map(|r| r.installed.len()).sum::<usize>(), 6);

        let second = RouteInstaller::apply(&mut platform, &lifecycle, &plan).await.unwrap();
        assert!(second.iter().all(|r| r.installed.is_empty()));
        assert_eq!(second[0].already_present.len(), 3);

        assert_eq!(platform.static_routes("r1").len(), 3);
        assert_eq!(platform.static_routes("r2").len(), 3);
        assert!(RouteInstaller::verify(&mut platform, &plan).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_route_is_refused() {
        let (mut platform, mut lifecycle, plan) = provisioned(2, 1).await;
        activate_all(&mut platform, &mut lifecycle).await;

        // Same destination, different next hop: r1's own transit address.
        let stale = SystemIntegration::add_route(&"172.16.102.0/24".parse().unwrap(), "172.16.10.2".parse().unwrap());
        assert!(platform.exec("r1", &stale).await.unwrap().success());

        let err = RouteInstaller::apply(&mut platform, &lifecycle, &plan).await.unwrap_err();
        match err {
            LabError::Provisioning(ProvisioningError::ConflictingRoute { router, route, existing }) => {
                assert_eq!(router, "r1");
                assert_eq!(route.next_hop, "172.16.10.3".parse::<std::net::Ipv4Addr>().unwrap());
                assert!(existing.contains("via 172.16.10.2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            platform.static_routes("r1"),
            vec![("172.16.102.0/24".parse().unwrap(), Some("172.16.10.2".parse().unwrap()))]
        );
        // Nothing past the failing router was touched.
        assert!(platform.static_routes("r2").is_empty());

        let missing = RouteInstaller::verify(&mut platform, &plan).await.unwrap();
        assert_eq!(missing.len(), 2);
    }

    #[tokio::test]
    async fn test_command_failure_names_router_and_route() {
        let (mut platform, mut lifecycle, plan) = provisioned(2, 1).await;
        activate_all(&mut platform, &mut lifecycle).await;
        platform.fail_when("r2", "ip route add", "RTNETLINK answers: Operation not permitted");

        let reports_or_err = RouteInstaller::apply(&mut platform, &lifecycle, &plan).await;
        let err = reports_or_err.unwrap_err();
        assert!(matches!(
            err,
            LabError::Provisioning(ProvisioningError::RouteInstall { ref router, .. }) if router == "r2"
        ));
        assert_eq!(platform.static_routes("r1").len(), 1);
    }
}
