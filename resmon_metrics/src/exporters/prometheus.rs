use super::{DynExporter, Exporter, ExporterFactory, ExporterKind};
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, Gauge, Opts, Registry, TextEncoder};
use resmon_core::{MetricReading, MetricRegistry, ResmonError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const DEFAULT_PROMETHEUS_PORT: u16 = 1234;
const BACKEND_NAME: &str = "prometheus";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrometheusConfig {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PROMETHEUS_PORT,
        }
    }
}

impl PrometheusConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

pub struct PrometheusFactory {
    config: PrometheusConfig,
}

impl PrometheusFactory {
    pub fn new(config: PrometheusConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ExporterFactory for PrometheusFactory {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn start(&self, metrics: &MetricRegistry) -> Result<DynExporter> {
        Ok(Arc::new(PrometheusServer::bind(&self.config, metrics).await?))
    }
}

#[derive(Clone)]
struct ScrapeState {
    registry: Registry,
    metric_names: Arc<Vec<&'static str>>,
    /// Metrics whose latest sample failed; left out of the scrape.
    withheld: Arc<HashMap<&'static str, AtomicBool>>,
}

impl ScrapeState {
    fn is_withheld(&self, name: &str) -> bool {
        self.withheld
            .get(name)
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn set_withheld(&self, name: &str, withheld: bool) -> Result<()> {
        let flag = self
            .withheld
            .get(name)
            .ok_or_else(|| ResmonError::BackendPublish {
                backend: BACKEND_NAME.to_string(),
                metric: name.to_string(),
                reason: "metric is not registered".to_string(),
            })?;
        flag.store(withheld, Ordering::Relaxed);
        Ok(())
    }

    fn render(&self) -> Result<String> {
        let families: Vec<_> = self
            .registry
            .gather()
            .into_iter()
            .filter(|family| !self.is_withheld(family.get_name()))
            .collect();

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|e| ResmonError::Other(e.into()))?;
        String::from_utf8(buffer).map_err(|e| ResmonError::Other(e.into()))
    }
}

/// HTTP endpoint exposing the latest value of every registered gauge.
pub struct PrometheusServer {
    state: ScrapeState,
    gauges: HashMap<&'static str, Gauge>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PrometheusServer {
    pub async fn bind(config: &PrometheusConfig, metrics: &MetricRegistry) -> Result<Self> {
        let registry = Registry::new();
        let mut gauges = HashMap::new();

        for definition in metrics.iter() {
            let gauge = Gauge::with_opts(Opts::new(definition.name, definition.description))
                .map_err(|e| ResmonError::backend_init(BACKEND_NAME, e))?;
            registry
                .register(Box::new(gauge.clone()))
                .map_err(|e| ResmonError::backend_init(BACKEND_NAME, e))?;
            gauges.insert(definition.name, gauge);
        }

        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            ResmonError::backend_init(BACKEND_NAME, format!("failed to bind {}: {}", addr, e))
        })?;
        let local_addr = listener.local_addr()?;

        let withheld = metrics
            .iter()
            .map(|definition| (definition.name, AtomicBool::new(false)))
            .collect();
        let state = ScrapeState {
            registry,
            metric_names: Arc::new(metrics.names()),
            withheld: Arc::new(withheld),
        };

        let app = Router::new()
            .route("/metrics", get(scrape))
            .route("/health", get(health))
            .with_state(state.clone());

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(e) = result {
                error!("Prometheus server stopped with error: {}", e);
            }
        });

        info!("Metrics are exposed on http://{}/metrics", local_addr);

        Ok(Self {
            state,
            gauges,
            local_addr,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current scrape body in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        self.state.render()
    }

    /// Value a scrape would report for `name`, if it reports one.
    pub fn value(&self, name: &str) -> Option<f64> {
        if self.state.is_withheld(name) {
            return None;
        }
        self.gauges.get(name).map(|gauge| gauge.get())
    }
}

#[async_trait]
impl Exporter for PrometheusServer {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn kind(&self) -> ExporterKind {
        ExporterKind::Pull
    }

    async fn publish(&self, reading: &MetricReading) -> Result<()> {
        let gauge = self
            .gauges
            .get(reading.name)
            .ok_or_else(|| ResmonError::BackendPublish {
                backend: BACKEND_NAME.to_string(),
                metric: reading.name.to_string(),
                reason: "metric is not registered".to_string(),
            })?;
        gauge.set(reading.value);
        self.state.set_withheld(reading.name, false)
    }

    async fn clear(&self, metric: &str) -> Result<()> {
        self.state.set_withheld(metric, true)
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };

        info!("Stopping Prometheus server on {}", self.local_addr);
        self.shutdown.cancel();

        match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ResmonError::Other(e.into())),
            Err(_) => {
                warn!(
                    "Prometheus server did not stop within {:?}, abandoning it",
                    SHUTDOWN_GRACE
                );
                Ok(())
            }
        }
    }
}

async fn scrape(State(state): State<ScrapeState>) -> Response {
    match state.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn health(State(state): State<ScrapeState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "metrics": state.metric_names.as_slice(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use resmon_core::metric::{MODEL_VARIABLE, SYSTEM_CPU_USAGE};

    fn loopback(port: u16) -> PrometheusConfig {
        PrometheusConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
        }
    }

    #[tokio::test]
    async fn test_published_value_is_scraped() {
        let server = PrometheusServer::bind(&loopback(0), &MetricRegistry::standard())
            .await
            .unwrap();

        server
            .publish(&MetricReading::new(SYSTEM_CPU_USAGE, 37.5))
            .await
            .unwrap();
        assert_eq!(server.value(SYSTEM_CPU_USAGE), Some(37.5));

        let url = format!("http://{}/metrics", server.local_addr());
        let body = reqwest::get(&url).await.unwrap().text().await.unwrap();

        assert!(body.contains("# HELP system_cpu_usage_percent Total CPU usage percent"));
        assert!(body.contains("system_cpu_usage_percent 37.5"));
        assert!(body.contains("model_variable_1 0"));

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_latest_value_wins() {
        let server = PrometheusServer::bind(&loopback(0), &MetricRegistry::standard())
            .await
            .unwrap();

        server.publish(&MetricReading::new(MODEL_VARIABLE, 1.0)).await.unwrap();
        server.publish(&MetricReading::new(MODEL_VARIABLE, 2.0)).await.unwrap();

        assert!(server.render().unwrap().contains("model_variable_1 2"));
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_metric_is_left_out_until_resampled() {
        let server = PrometheusServer::bind(&loopback(0), &MetricRegistry::standard())
            .await
            .unwrap();

        server
            .publish(&MetricReading::new(SYSTEM_CPU_USAGE, 12.0))
            .await
            .unwrap();
        server.clear(SYSTEM_CPU_USAGE).await.unwrap();

        let url = format!("http://{}/metrics", server.local_addr());
        let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
        assert!(!body.contains(SYSTEM_CPU_USAGE));
        assert!(body.contains("model_variable_1 0"));
        assert_eq!(server.value(SYSTEM_CPU_USAGE), None);

        server
            .publish(&MetricReading::new(SYSTEM_CPU_USAGE, 15.0))
            .await
            .unwrap();
        assert!(server.render().unwrap().contains("system_cpu_usage_percent 15"));
        assert_eq!(server.value(SYSTEM_CPU_USAGE), Some(15.0));

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_and_unknown_paths() {
        let server = PrometheusServer::bind(&loopback(0), &MetricRegistry::standard())
            .await
            .unwrap();
        let base = format!("http://{}", server.local_addr());

        let health: serde_json::Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["metrics"].as_array().unwrap().len(), 5);

        let missing = reqwest::get(format!("{}/nope", base)).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_port_in_use_fails_to_bind() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let result = PrometheusServer::bind(&loopback(port), &MetricRegistry::standard()).await;

        assert!(matches!(result, Err(ResmonError::BackendInit { .. })));
    }

    #[tokio::test]
    async fn test_unknown_metric_is_rejected() {
        let server = PrometheusServer::bind(&loopback(0), &MetricRegistry::standard())
            .await
            .unwrap();

        let err = server
            .publish(&MetricReading::new("not_registered", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ResmonError::BackendPublish { .. }));

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let server = PrometheusServer::bind(&loopback(0), &MetricRegistry::standard())
            .await
            .unwrap();
        let addr = server.local_addr();

        server.shutdown().await.unwrap();
        server.shutdown().await.unwrap();

        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
