//! Seam to the virtual network emulation platform.
//!
//! The lab never manages virtual interfaces itself: it asks the platform for
//! nodes and links, then configures them by running commands inside nodes.

pub mod netns;
pub mod simulated;

pub use netns::NetnsPlatform;
pub use simulated::{PlatformEvent, SimulatedPlatform};

use log::debug;

use crate::error::ProvisioningError;
use crate::network::{Endpoint, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Turns a non-zero exit status into an error, returning stdout otherwise.
    pub fn into_result(self, node: &str, argv: &[String]) -> Result<String, ProvisioningError> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(ProvisioningError::CommandFailed {
                node: node.to_string(),
                command: argv.join(" "),
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait EmulationPlatform {
    async fn create_node(&mut self, name: &str, role: Role) -> Result<(), ProvisioningError>;

    /// Connects two nodes with a point-to-point link; interfaces come up
    /// without addresses and administratively down.
    async fn create_link(&mut self, a: &Endpoint, b: &Endpoint) -> Result<(), ProvisioningError>;

    /// Runs a command inside a node. A non-zero exit status is not an error
    /// at this level.
    async fn exec(&mut self, node: &str, argv: &[String]) -> Result<CommandOutput, ProvisioningError>;

    async fn destroy_node(&mut self, name: &str) -> Result<(), ProvisioningError>;

    fn has_node(&self, name: &str) -> bool;
}

/// Runs a command and requires it to succeed.
pub async fn run_checked<P: EmulationPlatform>(
    platform: &mut P,
    node: &str,
    argv: &[String],
) -> Result<String, ProvisioningError> {
    debug!("[{}] {}", node, argv.join(" "));
    platform.exec(node, argv).await?.into_result(node, argv)
}
