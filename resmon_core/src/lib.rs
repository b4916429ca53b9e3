pub mod error;
pub mod metric;
pub mod probe;
pub mod sampler;
pub mod store;

pub use error::{ResmonError, Result};
pub use metric::{MetricDefinition, MetricKind, MetricReading, MetricRegistry};
pub use probe::{
    probe_for, probe_for_current_platform, DynProbe, Platform, Probe, Scope, UnsupportedProbe,
};
pub use sampler::{SampleCycleResult, SampleFailure, Sampler, SamplerConfig};
pub use store::{InMemoryVariableStore, VariableStore};

// Re-export commonly used types
pub use async_trait::async_trait;
