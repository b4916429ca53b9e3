use crate::ui::{self, Status};
use anyhow::Result;
use colored::Colorize;
use resmon_agent::{AgentConfig, MetricsAgent, StartupOutcome};
use resmon_core::VariableStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub async fn execute(
    config: AgentConfig,
    store: Arc<dyn VariableStore>,
    duration: Option<Duration>,
) -> Result<()> {
    ui::print_header("Resource Monitor");
    print_targets(&config);

    let agent = MetricsAgent::new(config, store);

    match agent.on_activate().await {
        StartupOutcome::Started { backends } => {
            ui::print_status(Status::Ok, &format!("Publishing via {}", backends.join(", ")));
        }
        StartupOutcome::Inert { reason } => {
            ui::print_status(Status::Failed, "No metrics backend could be started");
            agent.on_deactivate().await;
            anyhow::bail!("metrics are disabled: {}", reason);
        }
    }

    match duration {
        Some(duration) => {
            ui::print_status(
                Status::Info,
                &format!(
                    "Running for {} (Ctrl-C to stop early)",
                    humantime::format_duration(duration)
                ),
            );
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                signal = tokio::signal::ctrl_c() => signal?,
            }
        }
        None => {
            ui::print_status(Status::Info, "Press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
        }
    }

    info!("Shutting down resource metrics");
    agent.on_deactivate().await;

    println!(
        "\nCompleted {} sampling cycles ({} ticks skipped)",
        agent.scheduler().cycles_completed(),
        agent.scheduler().skipped_ticks()
    );
    ui::print_status(Status::Ok, "Stopped");

    Ok(())
}

fn print_targets(config: &AgentConfig) {
    println!("\n{}", "Exporters:".bold());
    if config.prometheus.enabled {
        ui::print_field(
            "Prometheus",
            format!("http://{}/metrics", config.prometheus_config().socket_addr()),
        );
    } else {
        ui::print_field("Prometheus", "disabled".dimmed());
    }

    if config.otlp.enabled {
        let otlp = config.otlp_config();
        ui::print_field("OTLP", format!("{} ({:?})", otlp.endpoint(), otlp.protocol));
    } else {
        ui::print_field("OTLP", "disabled".dimmed());
    }

    ui::print_field("Interval", humantime::format_duration(config.sampling.interval));
    if !config.sampling.start_delay.is_zero() {
        ui::print_field(
            "Start delay",
            humantime::format_duration(config.sampling.start_delay),
        );
    }
}
