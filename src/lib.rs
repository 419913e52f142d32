pub mod algorithms;
pub mod config;
pub mod error;
pub mod lab;
pub mod network;
pub mod platform;
pub mod provision;
pub mod router;
pub mod routing;
pub mod shell;
pub mod system;

pub use config::TopologyConfig;
pub use error::{ConfigurationError, LabError, LifecycleError, ProvisioningError};
pub use lab::Lab;
pub use network::{Interface, Link, LinkKind, Node, Role, Topology};
pub use router::{LifecycleController, RouterState};
pub use routing::{Route, RoutePlan};

pub type RouterId = String;
pub type NetworkId = ipnet::Ipv4Net;
pub type LinkId = usize;
