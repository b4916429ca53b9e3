pub mod command;
pub mod linux;
pub mod macos;
pub mod windows;

use crate::error::{ResmonError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use command::CommandRunner;
pub use linux::LinuxProbe;
pub use macos::MacProbe;
pub use windows::WindowsProbe;

pub const DEFAULT_CPU_WINDOW: Duration = Duration::from_millis(500);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Process,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
}

impl Platform {
    pub fn detect() -> Result<Self> {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Result<Self> {
        match os {
            "windows" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            "macos" => Ok(Platform::MacOs),
            other => Err(ResmonError::PlatformUnsupported(other.to_string())),
        }
    }
}

/// Per-OS source of CPU and memory readings.
#[async_trait]
pub trait Probe: Send + Sync {
    /// CPU usage in percent of the whole machine, measured across `window`.
    ///
    /// Suspends the calling task for `window` between the two readings.
    async fn sample_cpu_delta(&self, scope: Scope, window: Duration) -> Result<f64>;

    /// Memory in use, in megabytes.
    async fn sample_memory(&self, scope: Scope) -> Result<f64>;

    /// The platform this probe samples, `None` when sampling is unsupported.
    fn platform(&self) -> Option<Platform>;
}

pub type DynProbe = Arc<dyn Probe>;

/// Select the probe implementation once, for the platform the process runs on.
///
/// On an unsupported OS every reading fails with `PlatformUnsupported` while
/// the rest of the cycle keeps working.
pub fn probe_for_current_platform(command_timeout: Duration) -> DynProbe {
    match Platform::detect() {
        Ok(platform) => probe_for(platform, command_timeout),
        Err(e) => {
            warn!("{}; CPU and memory readings will be unavailable", e);
            Arc::new(UnsupportedProbe::new(std::env::consts::OS))
        }
    }
}

pub fn probe_for(platform: Platform, command_timeout: Duration) -> DynProbe {
    let commands = CommandRunner::new(command_timeout);
    debug!("Selected {:?} probe", platform);

    match platform {
        Platform::Windows => Arc::new(WindowsProbe::new(commands)),
        Platform::Linux => Arc::new(LinuxProbe::new(commands)),
        Platform::MacOs => Arc::new(MacProbe::new(commands)),
    }
}

pub struct UnsupportedProbe {
    os: String,
}

impl UnsupportedProbe {
    pub fn new(os: impl Into<String>) -> Self {
        Self { os: os.into() }
    }
}

#[async_trait]
impl Probe for UnsupportedProbe {
    async fn sample_cpu_delta(&self, _scope: Scope, _window: Duration) -> Result<f64> {
        Err(ResmonError::PlatformUnsupported(self.os.clone()))
    }

    async fn sample_memory(&self, _scope: Scope) -> Result<f64> {
        Err(ResmonError::PlatformUnsupported(self.os.clone()))
    }

    fn platform(&self) -> Option<Platform> {
        None
    }
}

pub fn bytes_to_megabytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MEGABYTE
}

pub(crate) fn core_count() -> f64 {
    num_cpus::get().max(1) as f64
}

/// Usage of `used` seconds of CPU over `elapsed` wall seconds spread across `cores`.
pub(crate) fn usage_percent(used: f64, elapsed: f64, cores: f64) -> f64 {
    if elapsed <= 0.0 || cores <= 0.0 {
        return 0.0;
    }
    (used / (elapsed * cores) * 100.0).max(0.0)
}

/// sysinfo view of the calling process.
///
/// Process CPU usage in sysinfo is the delta since the previous refresh of the
/// same `System`, so each scope keeps its own instance.
pub(crate) struct CurrentProcess {
    pid: Pid,
    system: Mutex<System>,
}

impl CurrentProcess {
    pub(crate) fn new() -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            system: Mutex::new(System::new()),
        }
    }

    pub(crate) async fn resident_megabytes(&self) -> Result<f64> {
        let mut system = self.system.lock().await;
        if !system.refresh_process(self.pid) {
            return Err(ResmonError::parse(format!(
                "process {} not visible to sysinfo",
                self.pid
            )));
        }

        let process = system
            .process(self.pid)
            .ok_or_else(|| ResmonError::parse(format!("process {} vanished", self.pid)))?;

        Ok(bytes_to_megabytes(process.memory()))
    }

    pub(crate) async fn cpu_percent_over(&self, window: Duration) -> Result<f64> {
        self.system.lock().await.refresh_process(self.pid);

        tokio::time::sleep(window).await;

        let mut system = self.system.lock().await;
        system.refresh_process(self.pid);
        let process = system
            .process(self.pid)
            .ok_or_else(|| ResmonError::parse(format!("process {} vanished", self.pid)))?;

        // sysinfo reports percent of a single core.
        Ok(process.cpu_usage() as f64 / core_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_from_os() {
        assert_eq!(Platform::from_os("linux").unwrap(), Platform::Linux);
        assert_eq!(Platform::from_os("windows").unwrap(), Platform::Windows);
        assert_eq!(Platform::from_os("macos").unwrap(), Platform::MacOs);

        let err = Platform::from_os("freebsd").unwrap_err();
        assert!(matches!(err, ResmonError::PlatformUnsupported(os) if os == "freebsd"));
    }

    #[test]
    fn test_usage_percent() {
        assert_eq!(usage_percent(0.25, 0.5, 1.0), 50.0);
        assert_eq!(usage_percent(1.0, 0.5, 4.0), 50.0);
        assert_eq!(usage_percent(1.0, 0.0, 4.0), 0.0);
        assert_eq!(usage_percent(-1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_bytes_to_megabytes() {
        assert_eq!(bytes_to_megabytes(5 * 1024 * 1024), 5.0);
    }

    #[test]
    fn test_probe_selection() {
        let probe = probe_for(Platform::MacOs, DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(probe.platform(), Some(Platform::MacOs));
    }

    #[tokio::test]
    async fn test_unsupported_probe_fails_every_reading() {
        let probe = UnsupportedProbe::new("plan9");
        assert_eq!(probe.platform(), None);

        let err = probe.sample_memory(Scope::System).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(probe
            .sample_cpu_delta(Scope::Process, Duration::ZERO)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_current_process_memory() {
        let process = CurrentProcess::new();
        let megabytes = process.resident_megabytes().await.unwrap();
        assert!(megabytes > 0.0);
    }
}
