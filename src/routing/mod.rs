pub mod installer;
pub mod plan;
pub mod table;

pub use installer::{InstallReport, RouteInstaller};
pub use plan::{Route, RoutePlan};
pub use table::{ForwardingTable, RouteEntry, RouteSource};
