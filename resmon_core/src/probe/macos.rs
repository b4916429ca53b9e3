use super::{bytes_to_megabytes, CommandRunner, CurrentProcess, Platform, Probe, Scope};
use crate::error::{ResmonError, Result};
use async_trait::async_trait;
use std::time::Duration;

const DEFAULT_PAGE_SIZE: u64 = 4096;

pub struct MacProbe {
    commands: CommandRunner,
    process: CurrentProcess,
}

impl MacProbe {
    pub fn new(commands: CommandRunner) -> Self {
        Self {
            commands,
            process: CurrentProcess::new(),
        }
    }

    /// `top` already reports usage over its own sampling interval, so no window is waited here.
    async fn system_cpu(&self) -> Result<f64> {
        let output = self.commands.output("top", &["-l", "1", "-n", "0"]).await?;
        parse_top_cpu_usage(&output)
    }

    async fn system_memory(&self) -> Result<f64> {
        let output = self.commands.output("vm_stat", &[]).await?;
        parse_vm_stat_active(&output)
    }
}

#[async_trait]
impl Probe for MacProbe {
    async fn sample_cpu_delta(&self, scope: Scope, window: Duration) -> Result<f64> {
        match scope {
            Scope::System => self.system_cpu().await,
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
        Some(Platform::MacOs)
    }
}

/// Busy percentage from the `CPU usage:` line of `top -l 1`.
///
/// `CPU usage: 7.69% user, 15.38% sys, 76.92% idle` yields `100 - idle`.
pub fn parse_top_cpu_usage(output: &str) -> Result<f64> {
    let line = output
        .lines()
        .find(|line| line.contains("CPU usage"))
        .ok_or_else(|| ResmonError::parse("no 'CPU usage' line in top output"))?;

    let (_, figures) = line
        .split_once(':')
        .ok_or_else(|| ResmonError::parse(format!("malformed CPU usage line '{}'", line)))?;

    let mut user = None;
    let mut sys = None;
    let mut idle = None;

    for part in figures.split(',') {
        let mut tokens = part.split_whitespace();
        let (Some(value), Some(label)) = (tokens.next(), tokens.next()) else {
            continue;
        };

        let value = value
            .trim_end_matches('%')
            .parse::<f64>()
            .map_err(|e| {
                ResmonError::parse(format!("invalid {} value '{}': {}", label, value, e))
            })?;

        match label {
            "user" => user = Some(value),
            "sys" => sys = Some(value),
            "idle" => idle = Some(value),
            _ => {}
        }
    }

    match (idle, user, sys) {
        (Some(idle), _, _) => Ok((100.0 - idle).clamp(0.0, 100.0)),
        (None, Some(user), Some(sys)) => Ok((user + sys).clamp(0.0, 100.0)),
        _ => Err(ResmonError::parse(format!(
            "CPU usage line lacks idle or user/sys figures: '{}'",
            line
        ))),
    }
}

/// Active memory in megabytes from `vm_stat` output.
pub fn parse_vm_stat_active(output: &str) -> Result<f64> {
    let page_size = output
        .lines()
        .next()
        .and_then(|header| {
            let (_, rest) = header.split_once("page size of ")?;
            rest.split_whitespace().next()?.parse::<u64>().ok()
        })
        .unwrap_or(DEFAULT_PAGE_SIZE);

    let line = output
        .lines()
        .find(|line| line.starts_with("Pages active"))
        .ok_or_else(|| ResmonError::parse("no 'Pages active' line in vm_stat output"))?;

    let (_, count) = line
        .split_once(':')
        .ok_or_else(|| ResmonError::parse(format!("malformed vm_stat line '{}'", line)))?;

    let count = count.trim().trim_end_matches('.');
    let pages = count
        .parse::<u64>()
        .map_err(|e| ResmonError::parse(format!("invalid active page count '{}': {}", count, e)))?;

    Ok(bytes_to_megabytes(pages.saturating_mul(page_size)))
}
