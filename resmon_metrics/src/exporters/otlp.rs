use super::{DynExporter, Exporter, ExporterFactory, ExporterKind};
use async_trait::async_trait;
use opentelemetry::metrics::{MeterProvider as _, ObservableGauge, Unit};
use opentelemetry::KeyValue;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::{runtime, Resource};
use resmon_core::{MetricReading, MetricRegistry, ResmonError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_OTLP_TARGET: &str = "localhost";
pub const DEFAULT_OTLP_PORT: u16 = 4317;
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

const BACKEND_NAME: &str = "otlp";
const METER_NAME: &str = "resmon";
const SERVICE_NAME: &str = "resmon";

static ERROR_HANDLER: Once = Once::new();
static EXPORT_ERRORS: AtomicU64 = AtomicU64::new(0);

/// Export failures happen on the SDK's reader task, away from `publish`.
/// Route them into the log once per process.
fn install_error_handler() {
    ERROR_HANDLER.call_once(|| {
        let installed = opentelemetry::global::set_error_handler(|err| {
            EXPORT_ERRORS.fetch_add(1, Ordering::Relaxed);
            warn!(backend = BACKEND_NAME, "Failed to push metrics: {}", err);
        });
        if let Err(e) = installed {
            warn!("Could not route OpenTelemetry errors to the log: {}", e);
        }
    });
}

/// OpenTelemetry errors reported since the first client connected.
pub fn export_errors() -> u64 {
    EXPORT_ERRORS.load(Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtlpProtocol {
    Grpc,
    HttpProtobuf,
}

impl OtlpProtocol {
    /// `"0"` selects gRPC, any other selector selects HTTP/protobuf.
    pub fn from_selector(selector: &str) -> Self {
        if selector.trim() == "0" {
            OtlpProtocol::Grpc
        } else {
            OtlpProtocol::HttpProtobuf
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtlpConfig {
    pub target: String,
    pub port: u16,
    pub protocol: OtlpProtocol,
    pub export_interval: Duration,
    pub timeout: Duration,
}

impl Default for OtlpConfig {
    fn default() -> Self {
        Self {
            target: DEFAULT_OTLP_TARGET.to_string(),
            port: DEFAULT_OTLP_PORT,
            protocol: OtlpProtocol::Grpc,
            export_interval: DEFAULT_EXPORT_INTERVAL,
            timeout: DEFAULT_EXPORT_TIMEOUT,
        }
    }
}

impl OtlpConfig {
    pub fn endpoint(&self) -> String {
        if self.target.contains("://") {
            format!("{}:{}", self.target.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.target, self.port)
        }
    }

    fn build_provider(&self) -> opentelemetry::metrics::Result<SdkMeterProvider> {
        let pipeline = opentelemetry_otlp::new_pipeline()
            .metrics(runtime::Tokio)
            .with_period(self.export_interval)
            .with_timeout(self.timeout)
            .with_resource(Resource::new(vec![KeyValue::new(
                "service.name",
                SERVICE_NAME,
            )]));

        match self.protocol {
            OtlpProtocol::Grpc => pipeline
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(self.endpoint())
                        .with_timeout(self.timeout),
                )
                .build(),
            OtlpProtocol::HttpProtobuf => pipeline
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .http()
                        .with_protocol(Protocol::HttpBinary)
                        .with_endpoint(self.endpoint())
                        .with_timeout(self.timeout),
                )
                .build(),
        }
    }
}

pub struct OtlpFactory {
    config: OtlpConfig,
}

impl OtlpFactory {
    pub fn new(config: OtlpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ExporterFactory for OtlpFactory {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn start(&self, metrics: &MetricRegistry) -> Result<DynExporter> {
        Ok(Arc::new(OtlpPushClient::connect(&self.config, metrics)?))
    }
}

/// Last published value of one metric, read from the SDK's collection callback.
#[derive(Debug, Default)]
struct LatestValue {
    bits: AtomicU64,
    present: AtomicBool,
}

impl LatestValue {
    fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        self.present.store(true, Ordering::Release);
    }

    fn clear(&self) {
        self.present.store(false, Ordering::Release);
    }

    fn get(&self) -> Option<f64> {
        self.present
            .load(Ordering::Acquire)
            .then(|| f64::from_bits(self.bits.load(Ordering::Relaxed)))
    }
}

/// Keeps the latest reading per metric and lets the periodic reader push it
/// to the collector as an observable gauge.
pub struct OtlpPushClient {
    endpoint: String,
    provider: Mutex<Option<SdkMeterProvider>>,
    values: HashMap<&'static str, Arc<LatestValue>>,
    _gauges: Vec<ObservableGauge<f64>>,
}

impl OtlpPushClient {
    /// The collector connection is established lazily; only a malformed
    /// endpoint fails here.
    pub fn connect(config: &OtlpConfig, metrics: &MetricRegistry) -> Result<Self> {
        install_error_handler();

        let endpoint = config.endpoint();
        let provider = config
            .build_provider()
            .map_err(|e| ResmonError::backend_init(BACKEND_NAME, e))?;

        let meter = provider.meter(METER_NAME);
        let mut values = HashMap::new();
        let mut gauges = Vec::new();

        for definition in metrics.iter() {
            let latest = Arc::new(LatestValue::default());
            let observed = Arc::clone(&latest);
            let gauge = meter
                .f64_observable_gauge(definition.name)
                .with_description(definition.description)
                .with_unit(Unit::new(definition.unit))
                .with_callback(move |observer| {
                    if let Some(value) = observed.get() {
                        observer.observe(value, &[]);
                    }
                })
                .init();

            values.insert(definition.name, latest);
            gauges.push(gauge);
        }

        info!(
            "Pushing metrics to {} over {:?} every {:?}",
            endpoint, config.protocol, config.export_interval
        );

        Ok(Self {
            endpoint,
            provider: Mutex::new(Some(provider)),
            values,
            _gauges: gauges,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Value the next export will carry for `name`.
    pub fn latest(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(|value| value.get())
    }

    fn slot(&self, name: &str) -> Result<&LatestValue> {
        self.values
            .get(name)
            .map(|value| value.as_ref())
            .ok_or_else(|| ResmonError::BackendPublish {
                backend: BACKEND_NAME.to_string(),
                metric: name.to_string(),
                reason: "no instrument for metric".to_string(),
            })
    }
}

#[async_trait]
impl Exporter for OtlpPushClient {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn kind(&self) -> ExporterKind {
        ExporterKind::Push
    }

    async fn publish(&self, reading: &MetricReading) -> Result<()> {
        self.slot(reading.name)?.set(reading.value);
        Ok(())
    }

    async fn clear(&self, metric: &str) -> Result<()> {
        self.slot(metric)?.clear();
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(provider) = self.provider.lock().await.take() else {
            return Ok(());
        };

        debug!("Flushing OTLP meter provider for {}", self.endpoint);
        // The SDK blocks on its reader thread during shutdown.
        tokio::task::spawn_blocking(move || provider.shutdown())
            .await
            .map_err(|e| ResmonError::Other(e.into()))?
            .map_err(|e| ResmonError::Other(e.into()))
    }
}
