//! hopline CLI
//!
//! Drive a remote machine over SSH:
//! - run a command with a chosen working directory and environment
//! - hold local (`-L`) and remote (`-R`) port forwards open
//! - upload and download files over SFTP
//! - report a session's capabilities and seeded state

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hl_core::config::HoplineConfig;
use hopline::commands::{self, ForwardSpec, Target, Transfer};
use hopline::output::print_error;

#[derive(Parser)]
#[command(name = "hopline")]
#[command(author, version, about = "Remote commands and port tunnels over chained SSH hops")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "HOPLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct TargetArgs {
    /// Host profile name or [user@]host[:port]
    target: String,

    /// Private key to authenticate with (overrides config)
    #[arg(short, long)]
    identity: Option<PathBuf>,
}

impl From<TargetArgs> for Target {
    fn from(args: TargetArgs) -> Self {
        Target {
            name: args.target,
            identity: args.identity,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command on the remote host
    Exec {
        #[command(flatten)]
        target: TargetArgs,
        /// Remote working directory
        #[arg(long)]
        cwd: Option<String>,
        /// Environment variable, KEY=VALUE (repeatable)
        #[arg(short, long = "env")]
        env: Vec<String>,
        /// Command to run
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Forward a local port to a host reachable from the remote side
    Forward {
        #[command(flatten)]
        target: TargetArgs,
        /// [bind:]port:host:hostport
        #[arg(short = 'L', value_name = "SPEC")]
        spec: ForwardSpec,
    },

    /// Forward a remote port back to a host reachable from here
    Reverse {
        #[command(flatten)]
        target: TargetArgs,
        /// [bind:]port:host:hostport
        #[arg(short = 'R', value_name = "SPEC")]
        spec: ForwardSpec,
    },

    /// Copy a local file to the remote host
    Upload {
        #[command(flatten)]
        target: TargetArgs,
        /// Local file to send
        local: PathBuf,
        /// Remote destination path
        remote: String,
    },

    /// Copy a remote file to this machine
    Download {
        #[command(flatten)]
        target: TargetArgs,
        /// Remote file to fetch
        remote: String,
        /// Local destination path
        local: PathBuf,
    },

    /// Show capabilities and session state as JSON
    Caps {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli.config.as_deref();

    if let Commands::Config { action } = cli.command {
        return match action {
            ConfigAction::Show => commands::config_show(config_path),
            ConfigAction::Init { force } => commands::config_init(config_path, force),
            ConfigAction::Path => {
                commands::config_path(config_path);
                Ok(())
            }
        };
    }

    let config = HoplineConfig::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let outcome = match cli.command {
        Commands::Exec {
            target,
            cwd,
            env,
            command,
        } => {
            let code =
                commands::exec_command(&config, &target.into(), &command, cwd.as_deref(), &env)
                    .await;
            match code {
                Ok(code) => std::process::exit(code),
                Err(e) => Err(e),
            }
        }
        Commands::Forward { target, spec } => {
            commands::forward_command(&config, &target.into(), spec).await
        }
        Commands::Reverse { target, spec } => {
            commands::reverse_command(&config, &target.into(), spec).await
        }
        Commands::Upload {
            target,
            local,
            remote,
        } => {
            commands::transfer_command(&config, &target.into(), Transfer::Upload { local, remote })
                .await
        }
        Commands::Download {
            target,
            remote,
            local,
        } => {
            commands::transfer_command(&config, &target.into(), Transfer::Download { remote, local })
                .await
        }
        Commands::Caps { target } => commands::caps_command(&config, &target.into()).await,
        Commands::Config { .. } => Ok(()),
    };

    if let Err(e) = &outcome {
        print_error(&format!("{:#}", e));
    }
    outcome
}
