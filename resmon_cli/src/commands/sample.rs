use crate::ui::{self, Status};
use anyhow::Result;
use resmon_agent::AgentConfig;
use resmon_core::{
    probe_for_current_platform, MetricKind, SampleCycleResult, Sampler, VariableStore,
};
use serde_json::json;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    metric: &'static str,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Unit")]
    unit: &'static str,
    #[tabled(rename = "Status")]
    status: String,
}

pub async fn execute(config: AgentConfig, store: Arc<dyn VariableStore>, json: bool) -> Result<()> {
    let probe = probe_for_current_platform(config.sampling.command_timeout);
    let sampler = Sampler::new(probe, store, config.sampler_config());

    let result = sampler.run_cycle().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&to_json(&result))?);
        return Ok(());
    }

    ui::print_header("Resource Sample");
    println!("{}", Table::new(rows(&result)).with(Style::rounded()));
    println!("Sampled in {:?}", result.duration);

    if !result.is_complete() {
        ui::print_status(
            Status::Warning,
            &format!("{} metric(s) could not be sampled", result.failures.len()),
        );
    }

    Ok(())
}

fn rows(result: &SampleCycleResult) -> Vec<MetricRow> {
    MetricKind::ALL
        .iter()
        .map(|kind| {
            let definition = kind.definition();
            let (value, status) = match result.reading(definition.name) {
                Some(reading) => (format!("{:.2}", reading.value), "ok".to_string()),
                None => {
                    let error = result
                        .failures
                        .iter()
                        .find(|f| f.metric == definition.name)
                        .map(|f| f.error.to_string())
                        .unwrap_or_default();
                    ("-".to_string(), error)
                }
            };

            MetricRow {
                metric: definition.name,
                value,
                unit: definition.unit,
                status,
            }
        })
        .collect()
}

fn to_json(result: &SampleCycleResult) -> serde_json::Value {
    let failures: Vec<_> = result
        .failures
        .iter()
        .map(|f| {
            json!({
                "metric": f.metric,
                "error": f.error.to_string(),
                "retryable": f.error.is_retryable(),
            })
        })
        .collect();

    json!({
        "readings": result.readings,
        "failures": failures,
        "duration_ms": result.duration.as_secs_f64() * 1000.0,
    })
}
