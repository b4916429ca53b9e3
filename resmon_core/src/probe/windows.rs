use super::{core_count, CommandRunner, CurrentProcess, Platform, Probe, Scope};
use crate::error::{ResmonError, Result};
use async_trait::async_trait;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::Mutex;
use tracing::debug;

pub struct WindowsProbe {
    commands: CommandRunner,
    process: CurrentProcess,
    processes: Mutex<System>,
}

impl WindowsProbe {
    pub fn new(commands: CommandRunner) -> Self {
        Self {
            commands,
            process: CurrentProcess::new(),
            processes: Mutex::new(System::new()),
        }
    }

    /// Sum processor time over every process that can be read at both sample points.
    ///
    /// Processes that exit or deny access between the two refreshes drop out of
    /// the sum instead of failing the reading.
    async fn system_cpu(&self, window: Duration) -> Result<f64> {
        self.processes.lock().await.refresh_processes();

        tokio::time::sleep(window).await;

        let mut system = self.processes.lock().await;
        system.refresh_processes();

        let per_core_total: f64 = system
            .processes()
            .values()
            .map(|process| process.cpu_usage() as f64)
            .filter(|usage| usage.is_finite())
            .sum();
        debug!(
            "Aggregated CPU over {} processes: {:.2}%",
            system.processes().len(),
            per_core_total
        );

        Ok((per_core_total / core_count()).clamp(0.0, 100.0))
    }

    async fn system_memory(&self) -> Result<f64> {
        let output = self
            .commands
            .output(
                "wmic",
                &["OS", "get", "FreePhysicalMemory,TotalVisibleMemorySize", "/Value"],
            )
            .await?;
        parse_wmic_used(&output)
    }
}

#[async_trait]
impl Probe for WindowsProbe {
    async fn sample_cpu_delta(&self, scope: Scope, window: Duration) -> Result<f64> {
        match scope {
            Scope::System => self.system_cpu(window).await,
            Scope::Process => self.process.cpu_percent_over(window).await,
        }
    }

    async fn sample_memory(&self, scope: Scope) -> Result<f64> {
        match scope {
            Scope::System => self.system_memory().await,
            Scope::Process => self.process.resident_megabytes().await,
        }
    }

    fn platform(&self) -> Option<Platform> {
        Some(Platform::Windows)
    }
}

/// Used megabytes from `wmic OS get FreePhysicalMemory,TotalVisibleMemorySize /Value`.
///
/// Both values are reported in kilobytes, one `Key=Value` pair per line.
pub fn parse_wmic_used(output: &str) -> Result<f64> {
    let mut free = None;
    let mut total = None;

    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };

        let parsed = value
            .trim()
            .parse::<f64>()
            .map_err(|e| ResmonError::parse(format!("invalid {} '{}': {}", key, value, e)));

        match key.trim() {
            "FreePhysicalMemory" => free = Some(parsed?),
            "TotalVisibleMemorySize" => total = Some(parsed?),
            _ => {}
        }
    }

    let free = free.ok_or_else(|| ResmonError::parse("missing FreePhysicalMemory"))?;
    let total = total.ok_or_else(|| ResmonError::parse("missing TotalVisibleMemorySize"))?;

    Ok((total - free) / 1024.0)
}
