pub mod exporters;
pub mod registry;

pub use exporters::{
    DynExporter, DynExporterFactory, Exporter, ExporterFactory, ExporterKind, OtlpConfig,
    OtlpFactory, OtlpProtocol, PrometheusConfig, PrometheusFactory,
};
pub use registry::{Activation, ExporterRegistry};
