use super::{core_count, usage_percent, CommandRunner, CurrentProcess, Platform, Probe, Scope};
use crate::error::{ResmonError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

const PROC_STAT: &str = "/proc/stat";
const PROC_SELF_STAT: &str = "/proc/self/stat";

/// Aggregate jiffies from the `cpu ` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub active: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Busy share of the interval between two readings, in percent of all cores.
    pub fn usage_since(&self, earlier: &CpuTimes) -> f64 {
        let total = self.total.saturating_sub(earlier.total);
        if total == 0 {
            return 0.0;
        }
        let active = self.active.saturating_sub(earlier.active);
        (active as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

pub struct LinuxProbe {
    commands: CommandRunner,
    process: CurrentProcess,
}

impl LinuxProbe {
    pub fn new(commands: CommandRunner) -> Self {
        Self {
            commands,
            process: CurrentProcess::new(),
        }
    }

    async fn read_cpu_times(&self) -> Result<CpuTimes> {
        let content = tokio::fs::read_to_string(PROC_STAT).await?;
        parse_proc_stat(&content)
    }

    async fn read_process_ticks(&self) -> Result<u64> {
        let content = tokio::fs::read_to_string(PROC_SELF_STAT).await?;
        parse_process_ticks(&content)
    }

    async fn system_cpu(&self, window: Duration) -> Result<f64> {
        let start = self.read_cpu_times().await?;
        tokio::time::sleep(window).await;
        let end = self.read_cpu_times().await?;

        Ok(end.usage_since(&start))
    }

    async fn process_cpu(&self, window: Duration) -> Result<f64> {
        let started = Instant::now();
        let start = self.read_process_ticks().await?;
        tokio::time::sleep(window).await;
        let end = self.read_process_ticks().await?;
        let elapsed = started.elapsed().as_secs_f64();

        let used = end.saturating_sub(start) as f64 / clock_ticks_per_second();
        Ok(usage_percent(used, elapsed, core_count()))
    }

    async fn system_memory(&self) -> Result<f64> {
        let output = self.commands.output("free", &["-m"]).await?;
        parse_free_used(&output)
    }
}

#[async_trait]
impl Probe for LinuxProbe {
    async fn sample_cpu_delta(&self, scope: Scope, window: Duration) -> Result<f64> {
        match scope {
            Scope::System => self.system_cpu(window).await,
            Scope::Process => self.process_cpu(window).await,
        }
    }

    async fn sample_memory(&self, scope: Scope) -> Result<f64> {
        match scope {
            Scope::System => self.system_memory().await,
            Scope::Process => self.process.resident_megabytes().await,
        }
    }

    fn platform(&self) -> Option<Platform> {
        Some(Platform::Linux)
    }
}

fn clock_ticks_per_second() -> f64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions and only reads a system constant.
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if ticks > 0 {
            return ticks as f64;
        }
    }
    100.0
}

/// Parse the aggregate `cpu ` line: user, nice, system, idle, iowait, irq, softirq.
pub fn parse_proc_stat(content: &str) -> Result<CpuTimes> {
    let line = content
        .lines()
        .find(|line| line.starts_with("cpu "))
        .ok_or_else(|| ResmonError::parse("no aggregate cpu line in /proc/stat"))?;

    let fields = line
        .split_whitespace()
        .skip(1)
        .take(7)
        .map(|field| {
            field
                .parse::<u64>()
                .map_err(|e| ResmonError::parse(format!("invalid cpu field '{}': {}", field, e)))
        })
        .collect::<Result<Vec<u64>>>()?;

    if fields.len() < 7 {
        return Err(ResmonError::parse(format!(
            "expected 7 cpu fields, found {}",
            fields.len()
        )));
    }

    let total: u64 = fields.iter().sum();
    let idle = fields[3];

    Ok(CpuTimes {
        active: total - idle,
        total,
    })
}

/// Sum of `utime` and `stime` (fields 14 and 15) from `/proc/<pid>/stat`.
pub fn parse_process_ticks(content: &str) -> Result<u64> {
    // The command name may contain spaces, so count fields after its closing paren.
    let rest = content
        .rfind(')')
        .map(|idx| &content[idx + 1..])
        .ok_or_else(|| ResmonError::parse("malformed process stat: missing ')'"))?;

    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() < 13 {
        return Err(ResmonError::parse(format!(
            "process stat has {} fields after name",
            fields.len()
        )));
    }

    let parse = |field: &str| {
        field
            .parse::<u64>()
            .map_err(|e| ResmonError::parse(format!("invalid tick count '{}': {}", field, e)))
    };

    Ok(parse(fields[11])? + parse(fields[12])?)
}

/// Used megabytes from the `Mem:` row of `free -m`.
pub fn parse_free_used(output: &str) -> Result<f64> {
    let line = output
        .lines()
        .find(|line| line.trim_start().starts_with("Mem"))
        .ok_or_else(|| ResmonError::parse("no Mem line in free output"))?;

    let values: Vec<&str> = line.split_whitespace().collect();
    let total = values
        .get(1)
        .ok_or_else(|| ResmonError::parse("missing total column"))?;
    total
        .parse::<f64>()
        .map_err(|e| ResmonError::parse(format!("invalid total '{}': {}", total, e)))?;

    let used = values
        .get(2)
        .ok_or_else(|| ResmonError::parse("missing used column"))?;
    used.parse::<f64>()
        .map_err(|e| ResmonError::parse(format!("invalid used '{}': {}", used, e)))
}
