//! replscaled — replication instance autoscaler.
//!
//! One binary for every entry point:
//! - `handle` runs a single invocation for an alert or wake payload
//! - `run` fires store-backed wakes on a timer
//! - `instance`, `task`, `wakes`, `outbox` manage the local provider
//! - `config init` prints a starting `replscale.toml`
//!
//! # Usage
//!
//! ```text
//! replscaled --config replscale.toml handle --payload alarm.json
//! replscaled run --tick-secs 5
//! ```

mod inventory;
mod invoke;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use replscale_autoscale::ScaleError;
use replscale_core::{CoreError, ScalerConfig};

#[derive(Parser)]
#[command(name = "replscaled", about = "Replication instance autoscaler")]
struct Cli {
    /// Path to replscale.toml. Defaults apply when the file is missing.
    #[arg(long, global = true, default_value = "replscale.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Handle one alert or wake payload and print the outcome.
    Handle {
        /// JSON payload file, or `-` for stdin.
        #[arg(long, default_value = "-")]
        payload: String,
    },

    /// Fire due wakes until interrupted.
    Run {
        /// Seconds between wake scans.
        #[arg(long, default_value = "5")]
        tick_secs: u64,
    },

    /// List installed wakes.
    Wakes,

    /// Manage replication instances in the local store.
    Instance {
        #[command(subcommand)]
        command: InstanceCommand,
    },

    /// Manage replication tasks in the local store.
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// List sent notifications.
    Outbox,

    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum InstanceCommand {
    /// Create or replace an instance.
    Put {
        #[arg(long)]
        name: String,
        #[arg(long)]
        arn: String,
        #[arg(long)]
        class: String,
        #[arg(long, default_value = replscale_core::STATUS_AVAILABLE)]
        status: String,
    },
    /// Apply a pending resize and mark the instance available.
    Settle {
        #[arg(long)]
        name: String,
    },
    /// List instances.
    List,
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Create or replace a task.
    Put {
        #[arg(long)]
        id: String,
        #[arg(long)]
        arn: String,
        #[arg(long)]
        instance_arn: String,
        #[arg(long)]
        status: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print a scaffold replscale.toml.
    Init {
        /// Notification topic to put in the scaffold.
        #[arg(long)]
        topic: Option<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,replscaled=debug,replscale_autoscale=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "replscaled failed");
            if is_config_error(&e) {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    if let Command::Config {
        command: ConfigCommand::Init { topic },
    } = &cli.command
    {
        print!("{}", ScalerConfig::scaffold(topic.as_deref()).to_toml_string()?);
        return Ok(());
    }

    let config = invoke::load_config(&cli.config)?;
    if let Command::Run { tick_secs } = cli.command {
        return invoke::run(config, tick_secs).await;
    }
    let store = invoke::open_store(&config)?;

    match cli.command {
        Command::Handle { payload } => invoke::handle(&config, &store, &payload).await,
        Command::Run { .. } => Ok(()),
        Command::Wakes => inventory::print_json(&store.list_wakes()?),
        Command::Outbox => inventory::print_json(&store.list_notifications()?),
        Command::Instance { command } => match command {
            InstanceCommand::Put {
                name,
                arn,
                class,
                status,
            } => inventory::put_instance(&store, name, arn, class, status),
            InstanceCommand::Settle { name } => inventory::settle_instance(&store, &name),
            InstanceCommand::List => inventory::print_json(&store.list_instances()?),
        },
        Command::Task { command } => match command {
            TaskCommand::Put {
                id,
                arn,
                instance_arn,
                status,
            } => inventory::put_task(&store, id, arn, instance_arn, status),
        },
        Command::Config { .. } => Ok(()),
    }
}

/// Configuration problems exit with 2 so operators can tell them apart
/// from transient provider failures.
fn is_config_error(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause.downcast_ref::<CoreError>().is_some()
            || cause
                .downcast_ref::<ScaleError>()
                .is_some_and(ScaleError::is_config)
    })
}
