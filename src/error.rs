use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;

use crate::NetworkId;
use crate::router::RouterState;
use crate::routing::Route;

/// Structural problems in a topology description. Raised before anything
/// touches the emulation platform.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("node '{0}' is declared more than once")]
    DuplicateNode(String),

    #[error("link #{link} references undeclared node '{node}'")]
    UnknownNode { link: usize, node: String },

    #[error("link #{link} connects node '{node}' to itself")]
    SelfLink { link: usize, node: String },

    #[error("interface '{interface}' is declared twice on node '{node}'")]
    DuplicateInterface { node: String, interface: String },

    #[error("address {address} is assigned twice on node '{node}'")]
    DuplicateAddress { node: String, address: NetworkId },

    #[error("link #{link}: endpoints {a} and {b} are not in the same subnet")]
    SubnetMismatch { link: usize, a: NetworkId, b: NetworkId },

    #[error("link #{link}: node '{node}' has no address left for interface '{interface}'")]
    MissingAddress { link: usize, node: String, interface: String },

    #[error("host subnet {subnet} overlaps subnet {other}")]
    OverlappingSubnets { subnet: NetworkId, other: NetworkId },

    #[error("default route of host '{host}' via {gateway} is outside its attached subnets")]
    UnreachableGateway { host: String, gateway: Ipv4Addr },

    #[error("node '{node}' declares {address} but none of its interfaces carries it")]
    DeclaredAddressUnused { node: String, address: NetworkId },

    #[error("invalid preset: {0}")]
    Preset(String),
}

/// Violations of the router forwarding state machine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("'{0}' is not a router of this lab")]
    UnknownRouter(String),

    #[error("router '{router}' is {state}, expected Active")]
    NotActive { router: String, state: RouterState },

    #[error("router '{router}' cannot go from {from} to {to}")]
    InvalidTransition {
        router: String,
        from: RouterState,
        to: RouterState,
    },

    #[error("router '{0}' is already terminated")]
    AlreadyTerminated(String),

    #[error("router '{0}' still forwards and cannot be destroyed")]
    StillActive(String),

    #[error("forwarding was left enabled on router '{router}': {reason}")]
    ForwardingLeftEnabled { router: String, reason: String },
}

/// Failures reported by the emulation platform or the kernel tables it
/// exposes.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("empty command for node '{0}'")]
    EmptyCommand(String),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` on '{node}' exited with status {status}: {stderr}")]
    CommandFailed {
        node: String,
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("`{command}` on '{node}' did not finish within {timeout:?}")]
    TimedOut {
        node: String,
        command: String,
        timeout: Duration,
    },

    #[error("node '{0}' does not exist on the emulation platform")]
    UnknownNode(String),

    #[error("unparsable route on '{node}': {line}")]
    UnparsableRoute { node: String, line: String },

    #[error(
        "router '{router}' already routes {} via {existing}, refusing next hop {}",
        .route.destination,
        .route.next_hop
    )]
    ConflictingRoute {
        router: String,
        route: Route,
        existing: String,
    },

    #[error(
        "installing {} via {} on router '{router}' failed: {source}",
        .route.destination,
        .route.next_hop
    )]
    RouteInstall {
        router: String,
        route: Route,
        #[source]
        source: Box<ProvisioningError>,
    },
}

#[derive(Debug, Error)]
pub enum LabError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
}
