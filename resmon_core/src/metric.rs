use crate::error::{ResmonError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const SYSTEM_RAM_USAGE: &str = "system_ram_usage_megabytes";
pub const PROCESS_MEMORY_USAGE: &str = "process_memory_usage_megabytes";
pub const SYSTEM_CPU_USAGE: &str = "system_cpu_usage_percent";
pub const PROCESS_CPU_USAGE: &str = "process_cpu_usage_percent";
pub const MODEL_VARIABLE: &str = "model_variable_1";

/// The metric families sampled on every cycle, in sampling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    SystemMemory,
    ProcessMemory,
    SystemCpu,
    ProcessCpu,
    ModelVariable,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::SystemMemory,
        MetricKind::ProcessMemory,
        MetricKind::SystemCpu,
        MetricKind::ProcessCpu,
        MetricKind::ModelVariable,
    ];

    pub fn name(self) -> &'static str {
        self.definition().name
    }

    pub fn definition(self) -> MetricDefinition {
        match self {
            MetricKind::SystemMemory => MetricDefinition::new(
                SYSTEM_RAM_USAGE,
                "Total RAM utilization in MB",
                "MB",
            ),
            MetricKind::ProcessMemory => MetricDefinition::new(
                PROCESS_MEMORY_USAGE,
                "Memory usage of the current process in MB",
                "MB",
            ),
            MetricKind::SystemCpu => {
                MetricDefinition::new(SYSTEM_CPU_USAGE, "Total CPU usage percent", "%")
            }
            MetricKind::ProcessCpu => MetricDefinition::new(
                PROCESS_CPU_USAGE,
                "CPU usage percent of the current process",
                "%",
            ),
            MetricKind::ModelVariable => MetricDefinition::new(
                MODEL_VARIABLE,
                "Variable1 from Model folder",
                "1",
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
}

impl MetricDefinition {
    pub const fn new(name: &'static str, description: &'static str, unit: &'static str) -> Self {
        Self {
            name,
            description,
            unit,
        }
    }
}

/// A single point value produced by one sampling cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReading {
    pub name: &'static str,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricReading {
    pub fn new(name: &'static str, value: f64) -> Self {
        Self {
            name,
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Set of metric definitions shared read-only by the sampler and every exporter.
///
/// Built once during bootstrap; names are unique for the lifetime of the registry.
#[derive(Debug, Clone, Default)]
pub struct MetricRegistry {
    definitions: Vec<MetricDefinition>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        Self {
            definitions: MetricKind::ALL.iter().map(|k| k.definition()).collect(),
        }
    }

    pub fn register(&mut self, definition: MetricDefinition) -> Result<()> {
        if self.get(definition.name).is_some() {
            return Err(ResmonError::DuplicateMetric(definition.name.to_string()));
        }
        self.definitions.push(definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MetricDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.definitions.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.definitions.iter().map(|d| d.name).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
