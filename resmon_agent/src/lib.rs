pub mod bootstrap;
pub mod config;
pub mod parser;
pub mod pipeline;
pub mod scheduler;

pub use bootstrap::{MetricsAgent, StartupOutcome};
pub use config::{AgentConfig, ConfigFile, OtlpSettings, PrometheusSettings, SamplingSettings};
pub use parser::{load_config, parse_config_from_file, parse_config_from_str};
pub use pipeline::SamplingPipeline;
pub use scheduler::{CycleHandler, Scheduler, SchedulerState};
