use crate::scheduler::CycleHandler;
use async_trait::async_trait;
use resmon_core::{SampleCycleResult, Sampler};
use resmon_metrics::ExporterRegistry;
use std::sync::Arc;

/// One tick of work: sample everything, then hand the readings to every backend.
///
/// Metrics that failed this cycle are cleared so no backend keeps reporting
/// the previous value.
pub struct SamplingPipeline {
    sampler: Sampler,
    exporters: Arc<ExporterRegistry>,
}

impl SamplingPipeline {
    pub fn new(sampler: Sampler, exporters: Arc<ExporterRegistry>) -> Self {
        Self { sampler, exporters }
    }

    pub async fn sample_and_publish(&self) -> SampleCycleResult {
        let result = self.sampler.run_cycle().await;
        self.exporters.publish_all(&result.readings).await;
        for failure in &result.failures {
            self.exporters.clear(failure.metric).await;
        }
        result
    }
}

#[async_trait]
impl CycleHandler for SamplingPipeline {
    async fn run_cycle(&self) {
        self.sample_and_publish().await;
    }
}
