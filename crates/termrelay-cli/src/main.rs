mod attach;
mod config;
mod logging;

use clap::{Parser, Subcommand};
use config::CliConfig;
use std::path::PathBuf;
use termrelay_core::TerminalTarget;

#[derive(Parser)]
#[command(
    name = "termrelay",
    version,
    about = "Attach to remote terminal sessions over WebSocket"
)]
struct Cli {
    /// TOML config file
    #[arg(long, env = "TERMRELAY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Relay endpoint, e.g. wss://console.example.com
    #[arg(long, env = "TERMRELAY_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Bearer token sent during the handshake
    #[arg(long, env = "TERMRELAY_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Attach stdin/stdout to a terminal path
    Attach {
        /// Terminal path, e.g. /ws/v1/terminal/cluster-1/web-0
        path: String,
        /// Bind to an existing session after connecting
        #[arg(long)]
        session: Option<String>,
        #[arg(long, requires = "cols")]
        rows: Option<u16>,
        #[arg(long, requires = "rows")]
        cols: Option<u16>,
    },
    /// Print the terminal path for a pod
    Path {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        pod: String,
        #[arg(long)]
        container: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref())?.overlay(cli.endpoint, cli.token);
    logging::init(&config.log.filter)?;

    match cli.command {
        Command::Attach {
            path,
            session,
            rows,
            cols,
        } => {
            let size = rows.zip(cols);
            attach::run(
                config.relay,
                attach::AttachOptions {
                    path,
                    session,
                    size,
                },
            )
            .await
        }
        Command::Path {
            cluster,
            pod,
            container,
        } => {
            let mut target = TerminalTarget::new(cluster, pod)?;
            if let Some(container) = container {
                target = target.with_container(container)?;
            }
            println!("{target}");
            Ok(())
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
