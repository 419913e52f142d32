use std::collections::HashMap;
use std::time::Duration;

use log::{debug, info};
use tokio::process::Command;
use tokio::time::timeout;
use uuid::Uuid;

use super::{CommandOutput, EmulationPlatform};
use crate::error::ProvisioningError;
use crate::network::{Endpoint, Role};
use crate::system::args;

/// Label used in errors for commands that run in the initial namespace.
const ROOT: &str = "<root>";

/// Linux backend: one network namespace per node, veth pairs for links.
/// Needs `ip` (iproute2) and CAP_NET_ADMIN.
pub struct NetnsPlatform {
    prefix: String,
    command_timeout: Duration,
    namespaces: HashMap<String, String>,
}

impl NetnsPlatform {
    pub fn new(prefix: Option<String>, command_timeout: Duration) -> Self {
        let prefix = prefix.unwrap_or_else(Self::session_prefix);
        info!("Using namespace prefix '{}'", prefix);
        Self {
            prefix,
            command_timeout,
            namespaces: HashMap::new(),
        }
    }

    /// `srl-` followed by eight hex characters, unique per run.
    pub fn session_prefix() -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("srl-{}-", &id[..8])
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn namespace(&self, node: &str) -> Result<&str, ProvisioningError> {
        self.namespaces
            .get(node)
            .map(String::as_str)
            .ok_or_else(|| ProvisioningError::UnknownNode(node.to_string()))
    }

    async fn run(&self, node: &str, argv: &[String]) -> Result<CommandOutput, ProvisioningError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(ProvisioningError::EmptyCommand(node.to_string()));
        };
        let command = argv.join(" ");
        debug!("Running `{}`", command);

        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);

        let output = match timeout(self.command_timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| ProvisioningError::Spawn {
                command: command.clone(),
                source,
            })?,
            Err(_) => {
                return Err(ProvisioningError::TimedOut {
                    node: node.to_string(),
                    command,
                    timeout: self.command_timeout,
                });
            }
        };

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run_checked(&self, node: &str, argv: Vec<String>) -> Result<String, ProvisioningError> {
        self.run(node, &argv).await?.into_result(node, &argv)
    }
}

impl EmulationPlatform for NetnsPlatform {
    async fn create_node(&mut self, name: &str, role: Role) -> Result<(), ProvisioningError> {
        let namespace = format!("{}{}", self.prefix, name);
        self.run_checked(ROOT, args(&["ip", "netns", "add", &namespace])).await?;
        self.namespaces.insert(name.to_string(), namespace.clone());

        self.run_checked(name, args(&["ip", "netns", "exec", &namespace, "ip", "link", "set", "lo", "up"]))
            .await?;
        debug!("Created {} {} in namespace {}", role, name, namespace);
        Ok(())
    }

    async fn create_link(&mut self, a: &Endpoint, b: &Endpoint) -> Result<(), ProvisioningError> {
        let ns_a = self.namespace(&a.node)?.to_string();
        let ns_b = self.namespace(&b.node)?.to_string();

        self.run_checked(
            ROOT,
            args(&[
                "ip", "link", "add", &a.interface, "netns", &ns_a,
                "type", "veth", "peer", "name", &b.interface, "netns", &ns_b,
            ]),
        )
        .await?;
        Ok(())
    }

    async fn exec(&mut self, node: &str, argv: &[String]) -> Result<CommandOutput, ProvisioningError> {
        let namespace = self.namespace(node)?;
        let mut full = args(&["ip", "netns", "exec", namespace]);
        full.extend_from_slice(argv);
        self.run(node, &full).await
    }

    async fn destroy_node(&mut self, name: &str) -> Result<(), ProvisioningError> {
        let namespace = self.namespace(name)?.to_string();
        self.run_checked(ROOT, args(&["ip", "netns", "delete", &namespace])).await?;
        self.namespaces.remove(name);
        Ok(())
    }

    fn has_node(&self, name: &str) -> bool {
        self.namespaces.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_prefix_shape() {
        let prefix = NetnsPlatform::session_prefix();
        assert!(prefix.starts_with("srl-"));
        assert!(prefix.ends_with('-'));
        assert_eq!(prefix.len(), 13);
        assert_ne!(prefix, NetnsPlatform::session_prefix());
    }

    #[test]
    fn test_unknown_namespace() {
        let platform = NetnsPlatform::new(Some("t-".into()), Duration::from_secs(1));
        assert_eq!(platform.prefix(), "t-");
        assert!(!platform.has_node("r1"));
        assert!(matches!(platform.namespace("r1"), Err(ProvisioningError::UnknownNode(_))));
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let platform = NetnsPlatform::new(Some("t-".into()), Duration::from_secs(1));
        let err = platform.run("r1", &[]).await.unwrap_err();
        assert!(matches!(err, ProvisioningError::EmptyCommand(node) if node == "r1"));
    }

    #[tokio::test]
    async fn test_hung_command_times_out() {
        let platform = NetnsPlatform::new(Some("t-".into()), Duration::from_millis(200));
        let started = std::time::Instant::now();

        let err = platform.run("r1", &args(&["sleep", "5"])).await.unwrap_err();
        match err {
            ProvisioningError::TimedOut { node, command, timeout } => {
                assert_eq!(node, "r1");
                assert_eq!(command, "sleep 5");
                assert_eq!(timeout, Duration::from_millis(200));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let platform = NetnsPlatform::new(Some("t-".into()), Duration::from_secs(5));

        let err = platform.run("r1", &args(&["srl-no-such-program", "-v"])).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisioningError::Spawn { ref command, .. } if command == "srl-no-such-program -v"
        ));
    }

    #[tokio::test]
    async fn test_exit_status_and_output_are_captured() {
        let platform = NetnsPlatform::new(Some("t-".into()), Duration::from_secs(5));

        let out = platform.run("r1", &args(&["sh", "-c", "echo up; echo down >&2; exit 3"])).await.unwrap();
        assert_eq!(out.status, 3);
        assert_eq!(out.stdout, "up\n");
        assert_eq!(out.stderr, "down\n");
    }
}
