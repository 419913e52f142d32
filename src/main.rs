use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info};
use tokio::runtime::Builder;

use static_route_lab::config::presets;
use static_route_lab::platform::{EmulationPlatform, NetnsPlatform, SimulatedPlatform};
use static_route_lab::{shell, Lab, Topology, TopologyConfig};

#[derive(Parser)]
#[command(name = "static-route-lab", about = "Multi-router static routing lab")]
struct Cli {
    /// JSON topology file
    #[arg(long, conflicts_with_all = ["routers", "single_router"])]
    topology: Option<PathBuf>,

    /// Routers in a chain preset
    #[arg(long, default_value_t = 2)]
    routers: usize,

    #[arg(long, default_value_t = 1)]
    hosts_per_router: usize,

    /// One router with H hosts
    #[arg(long, value_name = "H", conflicts_with_all = ["routers", "hosts_per_router"])]
    single_router: Option<usize>,

    /// Run against the in-memory platform instead of network namespaces
    #[arg(long)]
    dry_run: bool,

    /// Print the route plan as JSON
    #[arg(long)]
    print_plan: bool,

    /// Open an interactive shell once the lab is up
    #[arg(long)]
    cli: bool,

    #[arg(long)]
    namespace_prefix: Option<String>,

    /// Seconds before a platform command is considered hung
    #[arg(long, value_name = "SECS")]
    command_timeout: Option<u64>,

    /// Write the resolved topology to FILE
    #[arg(long, value_name = "FILE")]
    save_topology: Option<PathBuf>,
}

impl Cli {
    fn topology_config(&self) -> Result<TopologyConfig> {
        let mut config = match (&self.topology, self.single_router) {
            (Some(path), _) => TopologyConfig::load(path)?,
            (None, Some(hosts)) => presets::single_router(hosts)?,
            (None, None) => presets::chain(self.routers, self.hosts_per_router)?,
        };
        if let Some(prefix) = &self.namespace_prefix {
            config.settings.namespace_prefix = Some(prefix.clone());
        }
        if let Some(secs) = self.command_timeout {
            config.settings.command_timeout_secs = secs;
        }
        Ok(config)
    }
}

async fn run_lab<P: EmulationPlatform>(mut lab: Lab<P>, interactive: bool) -> Result<()> {
    let outcome = async {
        lab.setup().await?;

        let report = lab.routing_report().await?;
        println!("{}", report);

        let missing = lab.verify().await?;
        if !missing.is_empty() {
            bail!("{} planned routes are missing after setup", missing.len());
        }

        if interactive {
            shell::run(&mut lab).await.context("interactive shell failed")?;
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if let Err(e) = &outcome {
        error!("Lab failed: {:#}", e);
    }
    let stopped = lab.teardown().await;
    outcome?;
    stopped?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = cli.topology_config()?;
    if let Some(path) = &cli.save_topology {
        config.save(path)?;
        info!("Topology written to {}", path.display());
    }

    let topology = Topology::build(&config).context("invalid topology")?;
    info!(
        "Topology: {} routers, {} hosts, {} links",
        topology.routers().count(),
        topology.hosts().count(),
        topology.links().len()
    );

    let rt = Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        if cli.dry_run {
            let lab = Lab::new(topology, SimulatedPlatform::new());
            if cli.print_plan {
                println!("{}", lab.plan().to_json()?);
            }
            run_lab(lab, cli.cli).await
        } else {
            let platform = NetnsPlatform::new(
                config.settings.namespace_prefix.clone(),
                config.settings.command_timeout(),
            );
            let lab = Lab::new(topology, platform);
            if cli.print_plan {
                println!("{}", lab.plan().to_json()?);
            }
            run_lab(lab, cli.cli).await
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_router_takes_its_own_host_count() {
        assert!(Cli::try_parse_from(["static-route-lab", "--single-router", "2", "--hosts-per-router", "3"]).is_err());
        assert!(Cli::try_parse_from(["static-route-lab", "--single-router", "2", "--routers", "3"]).is_err());

        let cli = Cli::try_parse_from(["static-route-lab", "--single-router", "2"]).unwrap();
        let config = cli.topology_config().unwrap();
        assert_eq!(config.routers.len(), 1);
        assert_eq!(config.hosts.len(), 2);
    }

    #[test]
    fn test_chain_options() {
        let cli = Cli::try_parse_from(["static-route-lab", "--routers", "3", "--hosts-per-router", "2", "--command-timeout", "4"]).unwrap();
        let config = cli.topology_config().unwrap();
        assert_eq!(config.routers.len(), 3);
        assert_eq!(config.hosts.len(), 6);
        assert_eq!(config.settings.command_timeout_secs, 4);
    }
}
