use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::RouterId;
use crate::error::{LabError, LifecycleError};
use crate::network::Topology;
use crate::platform::{run_checked, EmulationPlatform};
use crate::system::SystemIntegration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterState {
    Created,
    Configuring,
    Active,
    Terminating,
    Terminated,
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouterState::Created => "Created",
            RouterState::Configuring => "Configuring",
            RouterState::Active => "Active",
            RouterState::Terminating => "Terminating",
            RouterState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStatus {
    pub state: RouterState,
    /// Last known value of the node's IP forwarding flag.
    pub forwarding: bool,
    pub last_transition: DateTime<Utc>,
    pub activations: u32,
}

impl RouterStatus {
    fn new() -> Self {
        Self {
            state: RouterState::Created,
            forwarding: false,
            last_transition: Utc::now(),
            activations: 0,
        }
    }

    fn transition(&mut self, state: RouterState) {
        self.state = state;
        self.last_transition = Utc::now();
    }
}

/// Forwarding state machine of every router in a lab.
#[derive(Debug, Clone, Default)]
pub struct LifecycleController {
    routers: HashMap<RouterId, RouterStatus>,
    order: Vec<RouterId>,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_topology(topology: &Topology) -> Self {
        let mut controller = Self::new();
        for router in topology.routers() {
            controller.register(&router.name);
        }
        controller
    }

    pub fn register(&mut self, router: &str) {
        if !self.routers.contains_key(router) {
            self.routers.insert(router.to_string(), RouterStatus::new());
            self.order.push(router.to_string());
        }
    }

    /// Routers in registration order.
    pub fn routers(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn status(&self, router: &str) -> Option<&RouterStatus> {
        self.routers.get(router)
    }

    pub fn state(&self, router: &str) -> Option<RouterState> {
        self.status(router).map(|s| s.state)
    }

    fn status_mut(&mut self, router: &str) -> Result<&mut RouterStatus, LifecycleError> {
        self.routers
            .get_mut(router)
            .ok_or_else(|| LifecycleError::UnknownRouter(router.to_string()))
    }

    /// Created -> Configuring, once the router's links exist.
    pub fn begin_configuring(&mut self, router: &str) -> Result<(), LifecycleError> {
        let status = self.status_mut(router)?;
        match status.state {
            RouterState::Created => {
                status.transition(RouterState::Configuring);
                Ok(())
            }
            RouterState::Configuring => Ok(()),
            from => Err(LifecycleError::InvalidTransition {
                router: router.to_string(),
                from,
                to: RouterState::Configuring,
            }),
        }
    }

    /// Enables forwarding. A no-op on an already active router.
    pub async fn activate<P: EmulationPlatform>(&mut self, platform: &mut P, router: &str) -> Result<(), LabError> {
        let status = self.status_mut(router)?;
        match status.state {
            RouterState::Active => {
                debug!("Router {} already active", router);
                return Ok(());
            }
            RouterState::Terminating => {
                return Err(LifecycleError::InvalidTransition {
                    router: router.to_string(),
                    from: RouterState::Terminating,
                    to: RouterState::Active,
                }
                .into());
            }
            RouterState::Created => debug!("Activating router {} before its links were realized", router),
            RouterState::Configuring | RouterState::Terminated => {}
        }

        run_checked(platform, router, &SystemIntegration::set_forwarding(true)).await?;

        status.forwarding = true;
        status.activations += 1;
        status.transition(RouterState::Active);
        info!("Router {} active, IP forwarding enabled", router);
        Ok(())
    }

    /// Disables forwarding: Active -> Terminating -> Terminated.
    ///
    /// If the platform refuses, the router still ends up Terminated and the
    /// failure is reported as `ForwardingLeftEnabled`.
    pub async fn deactivate<P: EmulationPlatform>(&mut self, platform: &mut P, router: &str) -> Result<(), LabError> {
        let status = self.status_mut(router)?;
        match status.state {
            RouterState::Active => {}
            RouterState::Terminated => return Err(LifecycleError::AlreadyTerminated(router.to_string()).into()),
            state => {
                return Err(LifecycleError::NotActive {
                    router: router.to_string(),
                    state,
                }
                .into());
            }
        }

        status.transition(RouterState::Terminating);
        let result = run_checked(platform, router, &SystemIntegration::set_forwarding(false)).await;
        status.transition(RouterState::Terminated);

        match result {
            Ok(_) => {
                status.forwarding = false;
                info!("Router {} terminated, IP forwarding disabled", router);
                Ok(())
            }
            Err(e) => {
                warn!("Forwarding left enabled on router {}: {}", router, e);
                Err(LifecycleError::ForwardingLeftEnabled {
                    router: router.to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    pub fn ensure_active(&self, router: &str) -> Result<(), LifecycleError> {
        match self.state(router) {
            Some(RouterState::Active) => Ok(()),
            Some(state) => Err(LifecycleError::NotActive {
                router: router.to_string(),
                state,
            }),
            None => Err(LifecycleError::UnknownRouter(router.to_string())),
        }
    }

    /// Checked before the platform destroys a router node.
    pub fn ensure_released(&self, router: &str) -> Result<(), LifecycleError> {
        match self.state(router) {
            Some(RouterState::Active) => Err(LifecycleError::StillActive(router.to_string())),
            Some(_) => Ok(()),
            None => Err(LifecycleError::UnknownRouter(router.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Role;
    use crate::platform::SimulatedPlatform;

    async fn setup() -> (LifecycleController, SimulatedPlatform) {
        let mut platform = SimulatedPlatform::new();
        platform.create_node("r1", Role::Router).await.unwrap();
        let mut controller = LifecycleController::new();
        controller.register("r1");
        (controller, platform)
    }

    #[tokio::test]
    async fn test_activate_is_idempotent() {
        let (mut controller, mut platform) = setup().await;
        controller.begin_configuring("r1").unwrap();

        controller.activate(&mut platform, "r1").await.unwrap();
        controller.activate(&mut platform, "r1").await.unwrap();

        assert_eq!(controller.state("r1"), Some(RouterState::Active));
        assert_eq!(controller.status("r1").unwrap().activations, 1);
        assert_eq!(platform.forwarding("r1"), Some(true));
        assert_eq!(platform.commands_on("r1"), vec!["sysctl -w net.ipv4.ip_forward=1"]);
    }

    #[tokio::test]
    async fn test_deactivate_before_activate_fails() {
        let (mut controller, mut platform) = setup().await;

        let err = controller.deactivate(&mut platform, "r1").await.unwrap_err();
        assert!(matches!(
            err,
            LabError::Lifecycle(LifecycleError::NotActive { state: RouterState::Created, .. })
        ));
        assert!(platform.commands_on("r1").is_empty());
    }

    #[tokio::test]
    async fn test_reactivation_cycle() {
        let (mut controller, mut platform) = setup().await;

        controller.activate(&mut platform, "r1").await.unwrap();
        controller.deactivate(&mut platform, "r1").await.unwrap();
        assert_eq!(controller.state("r1"), Some(RouterState::Terminated));
        assert_eq!(platform.forwarding("r1"), Some(false));

        let err = controller.deactivate(&mut platform, "r1").await.unwrap_err();
        assert!(matches!(err, LabError::Lifecycle(LifecycleError::AlreadyTerminated(_))));

        controller.activate(&mut platform, "r1").await.unwrap();
        assert_eq!(controller.state("r1"), Some(RouterState::Active));
        assert_eq!(controller.status("r1").unwrap().activations, 2);
        assert_eq!(platform.forwarding("r1"), Some(true));
    }

    #[tokio::test]
    async fn test_failed_deactivation_is_reported() {
        let (mut controller, mut platform) = setup().await;
        controller.activate(&mut platform, "r1").await.unwrap();
        platform.fail_when("r1", "ip_forward=0", "sysctl: Read-only file system");

        let err = controller.deactivate(&mut platform, "r1").await.unwrap_err();
        assert!(matches!(err, LabError::Lifecycle(LifecycleError::ForwardingLeftEnabled { .. })));
        assert_eq!(controller.state("r1"), Some(RouterState::Terminated));
        assert!(controller.status("r1").unwrap().forwarding);
        assert!(controller.ensure_released("r1").is_ok());
    }

    #[tokio::test]
    async fn test_failed_activation_keeps_state() {
        let (mut controller, mut platform) = setup().await;
        controller.begin_configuring("r1").unwrap();
        platform.fail_when("r1", "ip_forward=1", "sysctl: permission denied");

        let err = controller.activate(&mut platform, "r1").await.unwrap_err();
        assert!(matches!(err, LabError::Provisioning(_)));
        assert_eq!(controller.state("r1"), Some(RouterState::Configuring));
    }

    #[test]
    fn test_guards() {
        let mut controller = LifecycleController::new();
        controller.register("r1");

        assert!(matches!(controller.ensure_active("r1"), Err(LifecycleError::NotActive { .. })));
        assert!(matches!(controller.ensure_active("h1"), Err(LifecycleError::UnknownRouter(_))));
        assert!(controller.ensure_released("r1").is_ok());

        controller.begin_configuring("r1").unwrap();
        controller.begin_configuring("r1").unwrap();
        assert_eq!(controller.state("r1"), Some(RouterState::Configuring));
    }
}
