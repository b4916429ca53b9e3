mod commands;
mod ui;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "resmon")]
#[command(
    about = "Periodic CPU and memory telemetry with Prometheus and OTLP exporters",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Config file (YAML, TOML, or JSON); environment variables take precedence
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seed a model variable, e.g. --var Model/Variable1=42
    #[arg(long = "var", value_name = "PATH=VALUE", global = true)]
    vars: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample continuously and publish until interrupted
    Run {
        /// Stop after this long instead of waiting for Ctrl-C (e.g. "30s")
        #[arg(short, long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,
    },

    /// Take a single sample and print it
    Sample {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the resolved configuration as YAML
    Config,
}

fn init_logging(verbose: bool, quiet: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else if quiet {
        LevelFilter::ERROR
    } else {
        LevelFilter::INFO
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let console = fmt::layer().with_target(false).with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "resmon.log"));
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_logging(cli.verbose, cli.quiet, cli.log_dir.as_deref());

    let config = resmon_agent::load_config(cli.config.as_deref()).await?;
    let store = commands::variable_store(&cli.vars)?;

    match cli.command {
        Commands::Run { duration } => {
            commands::run::execute(config, store, duration).await?;
        }

        Commands::Sample { json } => {
            commands::sample::execute(config, store, json).await?;
        }

        Commands::Config => {
            commands::config::execute(&config)?;
        }
    }

    Ok(())
}
