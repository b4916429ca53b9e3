use crate::{
    error::{ResmonError, Result},
    metric::{MetricKind, MetricReading},
    probe::{DynProbe, Scope, DEFAULT_CPU_WINDOW},
    store::VariableStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_VARIABLE_PATH: &str = "Model/Variable1";

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub cpu_window: Duration,
    pub variable_path: String,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            cpu_window: DEFAULT_CPU_WINDOW,
            variable_path: DEFAULT_VARIABLE_PATH.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct SampleFailure {
    pub metric: &'static str,
    pub error: ResmonError,
}

/// Everything one sampling cycle produced.
#[derive(Debug, Default)]
pub struct SampleCycleResult {
    pub readings: Vec<MetricReading>,
    pub failures: Vec<SampleFailure>,
    pub duration: Duration,
}

impl SampleCycleResult {
    fn record(&mut self, kind: MetricKind, outcome: Result<f64>) {
        let name = kind.name();
        let outcome = outcome.and_then(|value| {
            if value.is_finite() {
                Ok(value)
            } else {
                Err(ResmonError::parse(format!("non-finite value {}", value)))
            }
        });

        match outcome {
            Ok(value) => self.readings.push(MetricReading::new(name, value)),
            Err(error) => {
                warn!(
                    metric = name,
                    retryable = error.is_retryable(),
                    "Failed to refresh metric: {}",
                    error
                );
                self.failures.push(SampleFailure {
                    metric: name,
                    error,
                });
            }
        }
    }

    pub fn reading(&self, name: &str) -> Option<&MetricReading> {
        self.readings.iter().find(|r| r.name == name)
    }

    pub fn failed(&self, name: &str) -> bool {
        self.failures.iter().any(|f| f.metric == name)
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} readings, {} failures in {:?}",
            self.readings.len(),
            self.failures.len(),
            self.duration
        )
    }
}

/// Measures every tracked metric once per call, isolating failures per metric.
pub struct Sampler {
    probe: DynProbe,
    store: Arc<dyn VariableStore>,
    config: SamplerConfig,
}

impl Sampler {
    pub fn new(probe: DynProbe, store: Arc<dyn VariableStore>, config: SamplerConfig) -> Self {
        Self {
            probe,
            store,
            config,
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub async fn run_cycle(&self) -> SampleCycleResult {
        let started = Instant::now();
        let mut result = SampleCycleResult::default();

        result.record(
            MetricKind::SystemMemory,
            self.probe.sample_memory(Scope::System).await,
        );
        result.record(
            MetricKind::ProcessMemory,
            self.probe.sample_memory(Scope::Process).await,
        );

        // Both scopes share one measurement window.
        let window = self.config.cpu_window;
        let (system_cpu, process_cpu) = tokio::join!(
            self.probe.sample_cpu_delta(Scope::System, window),
            self.probe.sample_cpu_delta(Scope::Process, window),
        );
        result.record(MetricKind::SystemCpu, system_cpu);
        result.record(MetricKind::ProcessCpu, process_cpu);

        result.record(
            MetricKind::ModelVariable,
            self.store.get_scalar(&self.config.variable_path),
        );

        result.duration = started.elapsed();
        debug!("Sampling cycle: {}", result.summary());

        result
    }
}
