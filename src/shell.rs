use std::future::Future;

use log::{error, info, warn};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::lab::Lab;
use crate::platform::{CommandOutput, EmulationPlatform};

const HELP: &str = "\
Commands:
  nodes                 list nodes and their interfaces
  routes                show router forwarding tables
  plan                  show the computed route plan
  verify                list planned routes missing from the routers
  <node> <command...>   run a command inside a node, e.g. `h1 ping -c 1 172.16.102.1`
  help                  this text
  exit                  leave the shell and stop the lab
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Nothing,
    Help,
    Nodes,
    Routes,
    Plan,
    Verify,
    Exit,
    Exec { node: String, argv: Vec<String> },
}

impl ShellCommand {
    pub fn parse(line: &str) -> Self {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => ShellCommand::Nothing,
            ["help" | "?"] => ShellCommand::Help,
            ["nodes"] => ShellCommand::Nodes,
            ["routes"] => ShellCommand::Routes,
            ["plan"] => ShellCommand::Plan,
            ["verify"] => ShellCommand::Verify,
            ["exit" | "quit"] => ShellCommand::Exit,
            [node, argv @ ..] => ShellCommand::Exec {
                node: node.to_string(),
                argv: argv.iter().map(|w| w.to_string()).collect(),
            },
        }
    }
}

pub enum Outcome {
    Continue(String),
    Exit,
}

/// Executes one shell line against the lab. Failures are reported in the
/// output and never end the session.
pub async fn execute<P: EmulationPlatform>(lab: &mut Lab<P>, line: &str) -> Outcome {
    let output = match ShellCommand::parse(line) {
        ShellCommand::Nothing => String::new(),
        ShellCommand::Exit => return Outcome::Exit,
        ShellCommand::Help => HELP.to_string(),
        ShellCommand::Nodes => nodes_info(lab),
        ShellCommand::Routes => match lab.routing_report().await {
            Ok(report) => report,
            Err(e) => format!("Error: {}\n", e),
        },
        ShellCommand::Plan => match lab.plan().to_json() {
            Ok(json) => format!("{}\n", json),
            Err(e) => format!("Error: {}\n", e),
        },
        ShellCommand::Verify => match lab.verify().await {
            Ok(missing) if missing.is_empty() => "All planned routes are installed\n".to_string(),
            Ok(missing) => missing
                .iter()
                .map(|r| format!("missing on {}: {} via {}\n", r.router, r.destination, r.next_hop))
                .collect(),
            Err(e) => format!("Error: {}\n", e),
        },
        ShellCommand::Exec { node, argv } if argv.is_empty() => {
            format!("Unknown command: {} (try `help`)\n", node)
        }
        ShellCommand::Exec { node, argv } => match lab.exec(&node, &argv).await {
            Ok(CommandOutput { status, stdout, stderr }) => {
                let mut text = stdout;
                text.push_str(&stderr);
                if status != 0 {
                    text.push_str(&format!("(exit status {})\n", status));
                }
                text
            }
            Err(e) => format!("Error: {}\n", e),
        },
    };
    Outcome::Continue(output)
}

fn nodes_info<P: EmulationPlatform>(lab: &Lab<P>) -> String {
    let mut output = String::new();
    output.push_str(&format!("{:<10} {:<8} {:<12} {:<18} {:<12}\n", "Node", "Role", "Interface", "Address", "State"));
    output.push_str(&format!("{}\n", "-".repeat(64)));

    for node in lab.topology().nodes() {
        let state = lab
            .lifecycle()
            .state(&node.name)
            .map_or_else(|| "-".to_string(), |s| s.to_string());
        if node.interfaces.is_empty() {
            output.push_str(&format!("{:<10} {:<8} {:<12} {:<18} {:<12}\n", node.name, node.role.to_string(), "-", "-", state));
        }
        for (i, interface) in node.interfaces.iter().enumerate() {
            let (name, role, state) = if i == 0 {
                (node.name.as_str(), node.role.to_string(), state.as_str())
            } else {
                ("", String::new(), "")
            };
            output.push_str(&format!("{:<10} {:<8} {:<12} {:<18} {:<12}\n",
                                     name, role, interface.name, interface.address.to_string(), state));
        }
    }
    output
}

/// Reads commands from stdin until `exit`, end of input or Ctrl-C.
pub async fn run<P: EmulationPlatform>(lab: &mut Lab<P>) -> io::Result<()> {
    info!("*** Starting CLI (type `help` for commands, Ctrl-C to stop the lab)");
    let mut stdout = io::stdout();
    session(lab, BufReader::new(io::stdin()), &mut stdout, tokio::signal::ctrl_c()).await
}

/// Shell loop over any line source. Resolving `interrupt` ends the session
/// like `exit`, so the caller still gets to tear the lab down.
pub async fn session<P, R, W, I>(lab: &mut Lab<P>, input: R, output: &mut W, interrupt: I) -> io::Result<()>
where
    P: EmulationPlatform,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    I: Future<Output = io::Result<()>>,
{
    let mut lines = input.lines();
    tokio::pin!(interrupt);

    loop {
        output.write_all(b"lab> ").await?;
        output.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            signal = &mut interrupt => {
                signal?;
                warn!("Interrupted, leaving the shell");
                output.write_all(b"\n").await?;
                break;
            }
        };
        let Some(line) = line else {
            output.write_all(b"\n").await?;
            break;
        };

        match execute(lab, &line).await {
            Outcome::Continue(text) => {
                if let Err(e) = output.write_all(text.as_bytes()).await {
                    error!("Failed to write shell output: {}", e);
                    return Err(e);
                }
            }
            Outcome::Exit => break,
        }
    }
    output.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets;
    use crate::network::Topology;
    use crate::platform::SimulatedPlatform;
    use crate::router::RouterState;

    async fn lab() -> Lab<SimulatedPlatform> {
        let topology = Topology::build(&presets::chain(2, 1).unwrap()).unwrap();
        let mut lab = Lab::new(topology, SimulatedPlatform::new());
        lab.setup().await.unwrap();
        lab
    }

    fn text(outcome: Outcome) -> String {
        match outcome {
            Outcome::Continue(output) => output,
            Outcome::Exit => panic!("shell exited"),
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!(ShellCommand::parse("   "), ShellCommand::Nothing);
        assert_eq!(ShellCommand::parse("quit"), ShellCommand::Exit);
        assert_eq!(ShellCommand::parse(" routes "), ShellCommand::Routes);
        assert_eq!(
            ShellCommand::parse("h1 ping -c 1 172.16.102.1"),
            ShellCommand::Exec {
                node: "h1".into(),
                argv: vec!["ping".into(), "-c".into(), "1".into(), "172.16.102.1".into()],
            }
        );
    }

    #[tokio::test]
    async fn test_exec_in_node() {
        let mut lab = lab().await;
        let output = text(execute(&mut lab, "r1 ip route").await);
        assert!(output.contains("172.16.102.0/24 via 172.16.10.3 dev r1-eth1"));

        let output = text(execute(&mut lab, "h1 traceroute 172.16.102.1").await);
        assert!(output.contains("(exit status 127)"));

        let output = text(execute(&mut lab, "h9 ip route").await);
        assert!(output.starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_builtin_commands() {
        let mut lab = lab().await;

        let nodes = text(execute(&mut lab, "nodes").await);
        assert!(nodes.contains("r1-eth1"));
        assert!(nodes.contains("Active"));

        let verify = text(execute(&mut lab, "verify").await);
        assert_eq!(verify, "All planned routes are installed\n");

        let plan = text(execute(&mut lab, "plan").await);
        assert!(plan.contains("\"nextHopAddress\": \"172.16.10.3\""));

        let unknown = text(execute(&mut lab, "frobnicate").await);
        assert!(unknown.starts_with("Unknown command"));

        assert!(matches!(execute(&mut lab, "exit").await, Outcome::Exit));
    }

    #[tokio::test]
    async fn test_failed_command_shows_output_and_status() {
        let mut lab = lab().await;
        lab.platform_mut().fail_when("r2", "ip route", "RTNETLINK answers: Operation not permitted");

        let output = text(execute(&mut lab, "r2 ip route").await);
        assert_eq!(output, "RTNETLINK answers: Operation not permitted(exit status 2)\n");
    }

    #[tokio::test]
    async fn test_session_runs_until_exit() {
        let mut lab = lab().await;
        let mut output = Vec::new();

        session(&mut lab, &b"nodes\nexit\nroutes\n"[..], &mut output, std::future::pending()).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("r1-eth1"));
        assert!(!output.contains("Routing Table of"));
    }

    #[tokio::test]
    async fn test_interrupt_ends_session_and_lab_can_stop() {
        let mut lab = lab().await;
        // Keep the writing half open so input never ends on its own.
        let (_keyboard, terminal) = io::duplex(64);
        let mut output = Vec::new();

        session(&mut lab, BufReader::new(terminal), &mut output, async { Ok(()) }).await.unwrap();
        assert_eq!(output, b"lab> \n");

        lab.teardown().await.unwrap();
        assert_eq!(lab.lifecycle().state("r1"), Some(RouterState::Terminated));
        assert_eq!(lab.platform().forwarding("r2"), None);
    }
}
