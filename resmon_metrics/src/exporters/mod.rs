pub mod otlp;
pub mod prometheus;

use async_trait::async_trait;
use resmon_core::{MetricReading, MetricRegistry, Result};
use serde::Serialize;
use std::sync::Arc;

pub use otlp::{OtlpConfig, OtlpFactory, OtlpProtocol, OtlpPushClient};
pub use prometheus::{PrometheusConfig, PrometheusFactory, PrometheusServer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    /// Holds the latest value per metric and answers scrape requests.
    Pull,
    /// Forwards readings to a remote collector.
    Push,
}

/// A running metrics backend
#[async_trait]
pub trait Exporter: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ExporterKind;

    /// Hand one reading to the backend
    async fn publish(&self, reading: &MetricReading) -> Result<()>;

    /// Stop reporting a metric until its next reading arrives.
    async fn clear(&self, _metric: &str) -> Result<()> {
        Ok(())
    }

    /// Release the backend's resources. Calling it more than once is a no-op.
    async fn shutdown(&self) -> Result<()>;
}

pub type DynExporter = Arc<dyn Exporter>;

/// Starts one kind of backend from its configuration
#[async_trait]
pub trait ExporterFactory: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self, metrics: &MetricRegistry) -> Result<DynExporter>;
}

pub type DynExporterFactory = Box<dyn ExporterFactory>;
