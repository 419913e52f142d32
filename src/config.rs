pub mod presets;

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use anyhow::{Context, Result};

use crate::NetworkId;

/// Declarative description of a lab, as read from a JSON topology file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub settings: LabSettings,
    #[serde(default)]
    pub hosts: Vec<HostSpec>,
    #[serde(default)]
    pub routers: Vec<RouterSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabSettings {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
    pub name: String,
    pub address: NetworkId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_route_via: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterSpec {
    pub name: String,
    pub address: NetworkId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub endpoint_a: EndpointSpec,
    pub endpoint_b: EndpointSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<NetworkId>,
}

fn default_command_timeout() -> u64 {
    10
}

impl Default for LabSettings {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            namespace_prefix: None,
        }
    }
}

impl LabSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl EndpointSpec {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            if_name: None,
            address: None,
        }
    }

    pub fn named(mut self, if_name: impl Into<String>) -> Self {
        self.if_name = Some(if_name.into());
        self
    }

    pub fn addressed(mut self, address: NetworkId) -> Self {
        self.address = Some(address);
        self
    }
}

impl TopologyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, name: &str, address: NetworkId, default_route_via: Option<Ipv4Addr>) -> Self {
        self.hosts.push(HostSpec {
            name: name.to_string(),
            address,
            default_route_via,
        });
        self
    }

    pub fn router(mut self, name: &str, address: NetworkId) -> Self {
        self.routers.push(RouterSpec {
            name: name.to_string(),
            address,
        });
        self
    }

    pub fn link(mut self, endpoint_a: EndpointSpec, endpoint_b: EndpointSpec) -> Self {
        self.links.push(LinkSpec { endpoint_a, endpoint_b });
        self
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: TopologyConfig = serde_json::from_str(content)?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading topology file {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("parsing topology file {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const TWO_ROUTERS: &str = r#"
{
  "hosts": [
    { "name": "h1", "address": "172.16.101.1/24", "default_route_via": "172.16.101.2" },
    { "name": "h2", "address": "172.16.102.1/24", "default_route_via": "172.16.102.2" }
  ],
  "routers": [
    { "name": "r1", "address": "172.16.101.2/24" },
    { "name": "r2", "address": "172.16.102.2/24" }
  ],
  "links": [
    { "endpoint_a": { "node": "h1" },
      "endpoint_b": { "node": "r1", "if_name": "r1-eth0", "address": "172.16.101.2/24" } },
    { "endpoint_a": { "node": "h2" },
      "endpoint_b": { "node": "r2", "if_name": "r2-eth0", "address": "172.16.102.2/24" } },
    { "endpoint_a": { "node": "r1", "if_name": "r1-eth1", "address": "172.16.10.2/24" },
      "endpoint_b": { "node": "r2", "if_name": "r2-eth1", "address": "172.16.10.3/24" } }
  ]
}"#;

    #[test]
    fn test_parse_topology_file() {
        let config = TopologyConfig::from_json(TWO_ROUTERS).unwrap();

        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.routers.len(), 2);
        assert_eq!(config.links.len(), 3);
        assert_eq!(config.settings, LabSettings::default());
        assert_eq!(config.hosts[0].default_route_via, Some("172.16.101.2".parse().unwrap()));
        assert_eq!(config.links[0].endpoint_a.if_name, None);
        assert_eq!(config.links[2].endpoint_b.address, Some("172.16.10.3/24".parse().unwrap()));
    }

    #[test]
    fn test_settings_override() {
        let config = TopologyConfig::from_json(
            r#"{ "settings": { "command_timeout_secs": 3, "namespace_prefix": "lab-" } }"#,
        )
        .unwrap();

        assert_eq!(config.settings.command_timeout(), Duration::from_secs(3));
        assert_eq!(config.settings.namespace_prefix.as_deref(), Some("lab-"));
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn test_rejects_malformed_address() {
        let result = TopologyConfig::from_json(
            r#"{ "routers": [ { "name": "r1", "address": "172.16.300.2/24" } ] }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load() {
        let config = TopologyConfig::from_json(TWO_ROUTERS).unwrap();
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();
        let loaded = TopologyConfig::load(file.path()).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TopologyConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("missing.json"));
    }
}
