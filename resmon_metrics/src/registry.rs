use crate::exporters::{DynExporter, DynExporterFactory};
use futures::future::join_all;
use resmon_core::{MetricReading, MetricRegistry};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Outcome of bringing the backends up.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Activation {
    pub activated: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl Activation {
    pub fn is_active(&self) -> bool {
        !self.activated.is_empty()
    }
}

/// Owns every live backend and fans readings out to them.
pub struct ExporterRegistry {
    metrics: Arc<MetricRegistry>,
    backends: RwLock<Vec<DynExporter>>,
    shut_down: AtomicBool,
}

impl ExporterRegistry {
    pub fn new(metrics: Arc<MetricRegistry>) -> Self {
        Self {
            metrics,
            backends: RwLock::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Start each backend independently; one failing never prevents another from activating.
    pub async fn initialize(&self, factories: Vec<DynExporterFactory>) -> Activation {
        let mut activation = Activation::default();

        if self.shut_down.load(Ordering::SeqCst) {
            warn!("Exporter registry already shut down, not starting backends");
            return activation;
        }

        let mut backends = self.backends.write().await;
        if !backends.is_empty() {
            warn!("Exporter registry already initialized");
            activation.activated = backends.iter().map(|b| b.name().to_string()).collect();
            return activation;
        }

        for factory in factories {
            match factory.start(&self.metrics).await {
                Ok(backend) => {
                    info!("Started {} exporter ({:?})", backend.name(), backend.kind());
                    activation.activated.push(backend.name().to_string());
                    backends.push(backend);
                }
                Err(e) => {
                    error!("Failed to start the {} exporter: {}", factory.name(), e);
                    activation
                        .failed
                        .push((factory.name().to_string(), e.to_string()));
                }
            }
        }

        activation
    }

    /// Publish to every active backend, returning how many accepted the reading.
    pub async fn publish(&self, reading: &MetricReading) -> usize {
        let backends = self.backends.read().await;
        let outcomes = join_all(backends.iter().map(|backend| backend.publish(reading))).await;

        let mut delivered = 0;
        for (backend, outcome) in backends.iter().zip(outcomes) {
            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "Failed to publish {} to {}: {}",
                    reading.name,
                    backend.name(),
                    e
                ),
            }
        }
        delivered
    }

    pub async fn publish_all(&self, readings: &[MetricReading]) {
        for reading in readings {
            self.publish(reading).await;
        }
    }

    /// Withdraw a metric from every backend after it failed to sample.
    pub async fn clear(&self, metric: &str) {
        let backends = self.backends.read().await;
        let outcomes = join_all(backends.iter().map(|backend| backend.clear(metric))).await;

        for (backend, outcome) in backends.iter().zip(outcomes) {
            if let Err(e) = outcome {
                warn!("Failed to clear {} on {}: {}", metric, backend.name(), e);
            }
        }
    }

    pub async fn active_backends(&self) -> Vec<String> {
        self.backends
            .read()
            .await
            .iter()
            .map(|b| b.name().to_string())
            .collect()
    }

    pub fn metrics(&self) -> &MetricRegistry {
        &self.metrics
    }

    /// Release every backend exactly once; later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let backends = std::mem::take(&mut *self.backends.write().await);
        if backends.is_empty() {
            return;
        }

        info!("Shutting down {} exporter(s)", backends.len());
        for backend in backends {
            if let Err(e) = backend.shutdown().await {
                warn!("Failed to shut down {} exporter: {}", backend.name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporters::{
        Exporter, ExporterFactory, ExporterKind, PrometheusConfig, PrometheusFactory,
    };
    use async_trait::async_trait;
    use resmon_core::metric::PROCESS_CPU_USAGE;
    use resmon_core::{ResmonError, Result};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        published: Mutex<Vec<(String, f64)>>,
        shutdowns: AtomicUsize,
        fail_publish: bool,
    }

    struct RecordingExporter(Arc<Recorder>);

    #[async_trait]
    impl Exporter for RecordingExporter {
        fn name(&self) -> &str {
            if self.0.fail_publish {
                "broken"
            } else {
                "recording"
            }
        }

        fn kind(&self) -> ExporterKind {
            ExporterKind::Push
        }

        async fn publish(&self, reading: &MetricReading) -> Result<()> {
            if self.0.fail_publish {
                return Err(ResmonError::BackendPublish {
                    backend: "broken".to_string(),
                    metric: reading.name.to_string(),
                    reason: "collector unavailable".to_string(),
                });
            }
            self.0
                .published
                .lock()
                .unwrap()
                .push((reading.name.to_string(), reading.value));
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            self.0.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RecordingFactory(Arc<Recorder>);

    #[async_trait]
    impl ExporterFactory for RecordingFactory {
        fn name(&self) -> &str {
            "recording"
        }

        async fn start(&self, _metrics: &MetricRegistry) -> Result<DynExporter> {
            Ok(Arc::new(RecordingExporter(self.0.clone())))
        }
    }

    struct UnreachableFactory;

    #[async_trait]
    impl ExporterFactory for UnreachableFactory {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn start(&self, _metrics: &MetricRegistry) -> Result<DynExporter> {
            Err(ResmonError::backend_init("unreachable", "connection refused"))
        }
    }

    fn registry() -> ExporterRegistry {
        ExporterRegistry::new(Arc::new(MetricRegistry::standard()))
    }

    #[tokio::test]
    async fn test_pull_port_in_use_leaves_push_active() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();
        let recorder = Arc::new(Recorder::default());

        let registry = registry();
        let activation = registry
            .initialize(vec![
                Box::new(PrometheusFactory::new(PrometheusConfig {
                    bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                    port,
                })),
                Box::new(RecordingFactory(recorder.clone())),
            ])
            .await;

        assert!(activation.is_active());
        assert_eq!(activation.activated, vec!["recording".to_string()]);
        assert_eq!(activation.failed.len(), 1);
        assert_eq!(activation.failed[0].0, "prometheus");
    }

    #[tokio::test]
    async fn test_no_backend_reachable() {
        let registry = registry();
        let activation = registry
            .initialize(vec![Box::new(UnreachableFactory), Box::new(UnreachableFactory)])
            .await;

        assert!(!activation.is_active());
        assert_eq!(activation.failed.len(), 2);
        assert!(registry.active_backends().await.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_is_isolated() {
        let healthy = Arc::new(Recorder::default());
        let broken = Arc::new(Recorder {
            fail_publish: true,
            ..Recorder::default()
        });

        let registry = registry();
        registry
            .initialize(vec![
                Box::new(RecordingFactory(broken)),
                Box::new(RecordingFactory(healthy.clone())),
            ])
            .await;

        let delivered = registry
            .publish(&MetricReading::new(PROCESS_CPU_USAGE, 3.0))
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(
            *healthy.published.lock().unwrap(),
            vec![(PROCESS_CPU_USAGE.to_string(), 3.0)]
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let recorder = Arc::new(Recorder::default());
        let registry = registry();
        registry
            .initialize(vec![Box::new(RecordingFactory(recorder.clone()))])
            .await;

        registry.shutdown().await;
        registry.shutdown().await;

        assert_eq!(recorder.shutdowns.load(Ordering::SeqCst), 1);
        assert!(registry.active_backends().await.is_empty());

        let activation = registry
            .initialize(vec![Box::new(RecordingFactory(recorder.clone()))])
            .await;
        assert!(!activation.is_active());
    }

    #[tokio::test]
    async fn test_shutdown_without_initialize() {
        let registry = registry();
        registry.shutdown().await;
        assert_eq!(registry.publish(&MetricReading::new(PROCESS_CPU_USAGE, 1.0)).await, 0);
    }
}
