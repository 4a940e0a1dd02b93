//! devhost CLI: launch project instances locally, inspect remote hosts.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::HashMap;

use devhost::supervisor::{LaunchMethod, LaunchSpec};
use devhost::Devhost;
use devhost_protocol::{HostConfig, RelayEvent};

#[derive(Parser)]
#[command(name = "devhost", version, about = "Dev-project launcher and remote host inspector")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a project instance and tail its output.
    Start {
        /// Project key.
        project: String,
        /// Instance id within the project.
        #[arg(long, default_value = "dev")]
        instance: String,
        /// Requested port.
        #[arg(long, short, default_value_t = 3000)]
        port: i64,
        /// Project directory.
        #[arg(long, default_value = ".")]
        cwd: String,
        /// Launch through the container runtime instead of a dev command.
        #[arg(long)]
        container: bool,
        /// Compose services to bring up (container launches only).
        #[arg(long)]
        service: Vec<String>,
        /// Detach immediately instead of tailing output.
        #[arg(long)]
        background: bool,
        /// Extra environment as KEY=VALUE pairs.
        #[arg(long, short)]
        env: Vec<String>,
        /// Command to run (after `--`).
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Request termination of a running instance.
    Stop {
        project: String,
        #[arg(long, default_value = "dev")]
        instance: String,
    },
    /// List running instances.
    Ps,
    /// Open a session to a remote host.
    Connect {
        /// Host id from the config file, or a new id with --host.
        id: String,
        /// Hostname or address for a new host record.
        #[arg(long)]
        host: Option<String>,
        #[arg(long, default_value_t = 22)]
        port: u16,
        #[arg(long, short, env = "USER")]
        username: String,
        /// Private key path; password auth is prompted for new hosts without one.
        #[arg(long, short)]
        key: Option<String>,
    },
    /// Close a remote session.
    Disconnect { id: String },
    /// Run the discovery pipeline over a connected host.
    Discover { id: String },
    /// Run one command on a connected host.
    Exec {
        id: String,
        command: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// List persisted remote hosts.
    Hosts,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let devhost = Devhost::new();

    match cli.command {
        Commands::Start {
            project,
            instance,
            port,
            cwd,
            container,
            service,
            background,
            env,
            command,
        } => {
            let spec = LaunchSpec {
                command,
                requested_port: port,
                method: if container {
                    LaunchMethod::Container
                } else {
                    LaunchMethod::ProcessManager
                },
                cwd,
                background,
                container_services: service,
                env: parse_env_pairs(&env)?,
            };

            let mut events = devhost.subscribe();
            let response = devhost.start(&project, &instance, spec).await;
            let ok = response.success;
            print_json(&response)?;
            if ok && !background {
                tail_until_stopped(&mut events, &project, &instance).await;
            }
        }
        Commands::Stop { project, instance } => {
            print_json(&devhost.stop(&project, &instance).await)?;
        }
        Commands::Ps => print_json(&devhost.list_running().await)?,
        Commands::Connect {
            id,
            host,
            port,
            username,
            key,
        } => {
            let response = match host {
                Some(host) => {
                    let config = match key {
                        Some(path) => {
                            let mut config = HostConfig::with_key_file(&id, host, username, path);
                            config.port = port;
                            config
                        }
                        None => {
                            let password = prompt_password(&id)?;
                            let mut config = HostConfig::with_password(&id, host, username, password);
                            config.port = port;
                            config
                        }
                    };
                    devhost.connect_with(config).await
                }
                None => devhost.connect(&id).await,
            };
            print_json(&response)?;
        }
        Commands::Disconnect { id } => print_json(&devhost.disconnect(&id).await)?,
        Commands::Discover { id } => print_json(&devhost.discover(&id).await)?,
        Commands::Exec {
            id,
            command,
            timeout_ms,
        } => print_json(&devhost.exec(&id, &command, timeout_ms).await)?,
        Commands::Hosts => print_json(&devhost.hosts())?,
    }

    devhost.shutdown().await;
    Ok(())
}

/// Relay log chunks for one identity to stdout until its stop event arrives.
async fn tail_until_stopped(
    events: &mut tokio::sync::broadcast::Receiver<RelayEvent>,
    project: &str,
    instance: &str,
) {
    while let Ok(event) = events.recv().await {
        match event {
            RelayEvent::LogData {
                project: p,
                instance: i,
                chunk,
            } if p == project && i == instance => println!("{chunk}"),
            RelayEvent::PortChanged {
                project: p,
                instance: i,
                port,
            } if p == project && i == instance => eprintln!("serving on port {port}"),
            RelayEvent::Stopped {
                project: p,
                instance: i,
                code,
            } if p == project && i == instance => {
                eprintln!("stopped with {code:?}");
                break;
            }
            _ => {}
        }
    }
}

fn parse_env_pairs(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut env = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            anyhow::bail!("environment entry '{pair}' is not KEY=VALUE");
        };
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

fn prompt_password(id: &str) -> Result<String> {
    use std::io::Write;
    eprint!("password for {id}: ");
    std::io::stderr().flush()?;
    let mut password = String::new();
    std::io::stdin().read_line(&mut password)?;
    Ok(password.trim_end_matches(['\r', '\n']).to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
