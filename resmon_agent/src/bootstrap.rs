use crate::config::AgentConfig;
use crate::pipeline::SamplingPipeline;
use crate::scheduler::Scheduler;
use resmon_core::{probe_for_current_platform, DynProbe, MetricRegistry, Sampler, VariableStore};
use resmon_metrics::{DynExporterFactory, ExporterRegistry, OtlpFactory, PrometheusFactory};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// What activation left running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum StartupOutcome {
    Started { backends: Vec<String> },
    /// Nothing is sampled; the host keeps running without metrics.
    Inert { reason: String },
}

impl StartupOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, StartupOutcome::Started { .. })
    }
}

/// Ties configuration, exporters and the scheduler to the host's
/// activate/deactivate hooks.
pub struct MetricsAgent {
    config: AgentConfig,
    probe: DynProbe,
    store: Arc<dyn VariableStore>,
    exporters: Arc<ExporterRegistry>,
    scheduler: Scheduler,
}

impl MetricsAgent {
    pub fn new(config: AgentConfig, store: Arc<dyn VariableStore>) -> Self {
        let probe = probe_for_current_platform(config.sampling.command_timeout);
        let exporters = Arc::new(ExporterRegistry::new(Arc::new(MetricRegistry::standard())));
        let scheduler =
            Scheduler::new(config.sampling.interval).with_start_delay(config.sampling.start_delay);

        Self {
            config,
            probe,
            store,
            exporters,
            scheduler,
        }
    }

    pub fn with_probe(mut self, probe: DynProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn exporters(&self) -> &Arc<ExporterRegistry> {
        &self.exporters
    }

    /// Factories for every backend enabled in the configuration.
    pub fn default_factories(&self) -> Vec<DynExporterFactory> {
        let mut factories: Vec<DynExporterFactory> = Vec::new();

        if self.config.prometheus.enabled {
            factories.push(Box::new(PrometheusFactory::new(
                self.config.prometheus_config(),
            )));
        }

        if self.config.otlp.enabled {
            factories.push(Box::new(OtlpFactory::new(self.config.otlp_config())));
        }

        factories
    }

    pub async fn on_activate(&self) -> StartupOutcome {
        self.activate_with(self.default_factories()).await
    }

    /// Start whichever backends come up and, if any did, the sampling schedule.
    pub async fn activate_with(&self, factories: Vec<DynExporterFactory>) -> StartupOutcome {
        if let Err(reason) = self.config.validate() {
            error!("Invalid metrics configuration: {}", reason);
            return StartupOutcome::Inert { reason };
        }

        if factories.is_empty() {
            let reason = "no metrics backend is enabled".to_string();
            error!("Resource metrics disabled: {}", reason);
            return StartupOutcome::Inert { reason };
        }

        let activation = self.exporters.initialize(factories).await;
        if !activation.is_active() {
            let reason = activation
                .failed
                .iter()
                .map(|(name, e)| format!("{}: {}", name, e))
                .collect::<Vec<_>>()
                .join("; ");
            error!("No metrics backend could be started, resource metrics disabled");
            return StartupOutcome::Inert { reason };
        }

        let sampler = Sampler::new(
            Arc::clone(&self.probe),
            Arc::clone(&self.store),
            self.config.sampler_config(),
        );
        let pipeline = Arc::new(SamplingPipeline::new(sampler, Arc::clone(&self.exporters)));

        if let Err(e) = self.scheduler.start(pipeline).await {
            error!("Failed to start metrics scheduler: {}", e);
            self.exporters.shutdown().await;
            return StartupOutcome::Inert {
                reason: e.to_string(),
            };
        }

        info!(
            "Resource metrics active via {}",
            activation.activated.join(", ")
        );
        StartupOutcome::Started {
            backends: activation.activated,
        }
    }

    /// Stop sampling, then release the backends. Repeated calls are no-ops.
    pub async fn on_deactivate(&self) {
        self.scheduler.stop().await;
        self.exporters.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OtlpSettings;
    use crate::scheduler::SchedulerState;
    use async_trait::async_trait;
    use resmon_core::{
        InMemoryVariableStore, MetricReading, ResmonError, Result, UnsupportedProbe,
    };
    use resmon_metrics::{
        DynExporter, Exporter, ExporterFactory, ExporterKind, OtlpProtocol, PrometheusConfig,
    };
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingPush {
        published: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl Exporter for CountingPush {
        fn name(&self) -> &str {
            "push"
        }

        fn kind(&self) -> ExporterKind {
            ExporterKind::Push
        }

        async fn publish(&self, _reading: &MetricReading) -> Result<()> {
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct PushFactory(Arc<CountingPush>);

    #[async_trait]
    impl ExporterFactory for PushFactory {
        fn name(&self) -> &str {
            "push"
        }

        async fn start(&self, _metrics: &MetricRegistry) -> Result<DynExporter> {
            let exporter: DynExporter = self.0.clone();
            Ok(exporter)
        }
    }

    struct UnreachablePush;

    #[async_trait]
    impl ExporterFactory for UnreachablePush {
        fn name(&self) -> &str {
            "push"
        }

        async fn start(&self, _metrics: &MetricRegistry) -> Result<DynExporter> {
            Err(ResmonError::backend_init("push", "collector unreachable"))
        }
    }

    fn test_config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.sampling.start_delay = Duration::ZERO;
        config
    }

    fn agent(config: AgentConfig) -> MetricsAgent {
        let store = Arc::new(InMemoryVariableStore::new().with_value("Model/Variable1", 1.0));
        MetricsAgent::new(config, store).with_probe(Arc::new(UnsupportedProbe::new("test")))
    }

    fn occupied_pull_factory(listener: &std::net::TcpListener) -> DynExporterFactory {
        let addr = listener.local_addr().unwrap();
        Box::new(PrometheusFactory::new(PrometheusConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: addr.port(),
        }))
    }

    #[tokio::test]
    async fn test_push_only_still_starts() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let push = Arc::new(CountingPush::default());
        let agent = agent(test_config());

        let outcome = agent
            .activate_with(vec![
                occupied_pull_factory(&listener),
                Box::new(PushFactory(push.clone())),
            ])
            .await;

        assert_eq!(
            outcome,
            StartupOutcome::Started {
                backends: vec!["push".to_string()]
            }
        );
        assert_eq!(agent.scheduler().state().await, SchedulerState::Running);

        // Let the first tick fire.
        tokio::time::sleep(Duration::from_millis(50)).await;
        agent.on_deactivate().await;
        assert_eq!(agent.scheduler().state().await, SchedulerState::Stopped);
        assert_eq!(push.shutdowns.load(Ordering::SeqCst), 1);
        assert!(push.published.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_no_backend_leaves_agent_inert() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let agent = agent(test_config());

        let outcome = agent
            .activate_with(vec![
                occupied_pull_factory(&listener),
                Box::new(UnreachablePush),
            ])
            .await;

        match outcome {
            StartupOutcome::Inert { reason } => {
                assert!(reason.contains("prometheus"));
                assert!(reason.contains("collector unreachable"));
            }
            other => panic!("expected inert agent, got {:?}", other),
        }
        assert_eq!(agent.scheduler().state().await, SchedulerState::Idle);
        assert!(agent.exporters().active_backends().await.is_empty());

        agent.on_deactivate().await;
    }

    #[tokio::test]
    async fn test_deactivate_is_idempotent() {
        let push = Arc::new(CountingPush::default());
        let agent = agent(test_config());
        assert!(agent
            .activate_with(vec![Box::new(PushFactory(push.clone()))])
            .await
            .is_started());

        agent.on_deactivate().await;
        agent.on_deactivate().await;

        assert_eq!(push.shutdowns.load(Ordering::SeqCst), 1);
        assert!(!agent
            .activate_with(vec![Box::new(PushFactory(push.clone()))])
            .await
            .is_started());
    }

    #[tokio::test]
    async fn test_deactivate_without_activate() {
        let agent = agent(test_config());
        agent.on_deactivate().await;
        assert_eq!(agent.scheduler().state().await, SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_config_is_inert() {
        let mut config = test_config();
        config.otlp = OtlpSettings {
            target: String::new(),
            ..OtlpSettings::default()
        };
        let agent = agent(config);

        let outcome = agent.on_activate().await;
        assert!(!outcome.is_started());
        assert_eq!(agent.scheduler().state().await, SchedulerState::Idle);
    }

    #[test]
    fn test_factories_follow_configuration() {
        let vars: HashMap<&str, &str> = [
            ("PROM_PORT", "9999"),
            ("OTEL_PORT", "4318"),
            ("OTEL_PROTOCOL", "1"),
        ]
        .into_iter()
        .collect();
        let config = AgentConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.prometheus_config().port, 9999);
        assert_eq!(config.otlp_config().port, 4318);
        assert_eq!(config.otlp_config().protocol, OtlpProtocol::HttpProtobuf);

        let names: Vec<String> = agent(config.clone())
            .default_factories()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, vec!["prometheus", "otlp"]);

        let mut pull_only = config;
        pull_only.otlp.enabled = false;
        assert_eq!(agent(pull_only).default_factories().len(), 1);
    }
}
