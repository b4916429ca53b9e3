use resmon_core::probe::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_CPU_WINDOW};
use resmon_core::sampler::DEFAULT_VARIABLE_PATH;
use resmon_core::SamplerConfig;
use resmon_metrics::exporters::otlp::{
    DEFAULT_EXPORT_TIMEOUT, DEFAULT_OTLP_PORT, DEFAULT_OTLP_TARGET,
};
use resmon_metrics::exporters::prometheus::DEFAULT_PROMETHEUS_PORT;
use resmon_metrics::{OtlpConfig, OtlpProtocol, PrometheusConfig};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{debug, warn};

pub const ENV_PROM_ENABLED: &str = "PROM_ENABLED";
pub const ENV_PROM_PORT: &str = "PROM_PORT";
pub const ENV_PROM_BIND: &str = "PROM_BIND";
pub const ENV_OTEL_ENABLED: &str = "OTEL_ENABLED";
pub const ENV_OTEL_TARGET: &str = "OTEL_TARGET";
pub const ENV_OTEL_PORT: &str = "OTEL_PORT";
pub const ENV_OTEL_PROTOCOL: &str = "OTEL_PROTOCOL";
pub const ENV_INTERVAL: &str = "METRICS_INTERVAL_MS";
pub const ENV_CPU_WINDOW: &str = "CPU_WINDOW_MS";
pub const ENV_COMMAND_TIMEOUT: &str = "COMMAND_TIMEOUT_MS";
pub const ENV_START_DELAY: &str = "METRICS_START_DELAY_MS";
pub const ENV_VARIABLE_PATH: &str = "MODEL_VARIABLE_PATH";

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_START_DELAY: Duration = Duration::from_secs(5);

/// Settings whose absence is worth a warning; the rest fall back quietly.
const WARN_WHEN_DEFAULTED: [&str; 4] = [
    ENV_PROM_PORT,
    ENV_OTEL_TARGET,
    ENV_OTEL_PORT,
    ENV_OTEL_PROTOCOL,
];

/// Fully resolved agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub prometheus: PrometheusSettings,
    pub otlp: OtlpSettings,
    pub sampling: SamplingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrometheusSettings {
    pub enabled: bool,
    pub bind_address: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtlpSettings {
    pub enabled: bool,
    pub target: String,
    pub port: u16,
    pub protocol: OtlpProtocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingSettings {
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    #[serde(with = "duration_serde")]
    pub cpu_window: Duration,
    #[serde(with = "duration_serde")]
    pub command_timeout: Duration,
    /// Zero starts sampling immediately.
    #[serde(with = "duration_serde")]
    pub start_delay: Duration,
    pub variable_path: String,
}

impl Default for PrometheusSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PROMETHEUS_PORT,
        }
    }
}

impl Default for OtlpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            target: DEFAULT_OTLP_TARGET.to_string(),
            port: DEFAULT_OTLP_PORT,
            protocol: OtlpProtocol::Grpc,
        }
    }
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            cpu_window: DEFAULT_CPU_WINDOW,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            start_delay: DEFAULT_START_DELAY,
            variable_path: DEFAULT_VARIABLE_PATH.to_string(),
        }
    }
}

/// Optional settings read from a config file. Anything left out falls
/// through to the built-in default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub prometheus: PrometheusFile,
    pub otlp: OtlpFile,
    pub sampling: SamplingFile,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrometheusFile {
    pub enabled: Option<bool>,
    pub bind_address: Option<IpAddr>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OtlpFile {
    pub enabled: Option<bool>,
    pub target: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<OtlpProtocol>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SamplingFile {
    #[serde(with = "duration_serde_option")]
    pub interval: Option<Duration>,
    #[serde(with = "duration_serde_option")]
    pub cpu_window: Option<Duration>,
    #[serde(with = "duration_serde_option")]
    pub command_timeout: Option<Duration>,
    #[serde(with = "duration_serde_option")]
    pub start_delay: Option<Duration>,
    pub variable_path: Option<String>,
}

impl AgentConfig {
    /// Resolve from the process environment alone.
    pub fn from_env() -> Self {
        Self::resolve(&ConfigFile::default(), |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::resolve(&ConfigFile::default(), lookup)
    }

    /// Environment first, then the config file, then the built-in default.
    pub fn resolve<F>(file: &ConfigFile, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource { lookup };
        let defaults = AgentConfig::default();

        let prometheus = PrometheusSettings {
            enabled: env.resolve(
                ENV_PROM_ENABLED,
                parse_flag,
                file.prometheus.enabled,
                defaults.prometheus.enabled,
            ),
            bind_address: env.resolve(
                ENV_PROM_BIND,
                parse_address,
                file.prometheus.bind_address,
                defaults.prometheus.bind_address,
            ),
            port: env.resolve(
                ENV_PROM_PORT,
                parse_port,
                file.prometheus.port,
                defaults.prometheus.port,
            ),
        };

        let otlp = OtlpSettings {
            enabled: env.resolve(
                ENV_OTEL_ENABLED,
                parse_flag,
                file.otlp.enabled,
                defaults.otlp.enabled,
            ),
            target: env.resolve(
                ENV_OTEL_TARGET,
                parse_text,
                file.otlp.target.clone(),
                defaults.otlp.target,
            ),
            port: env.resolve(ENV_OTEL_PORT, parse_port, file.otlp.port, defaults.otlp.port),
            protocol: env.resolve(
                ENV_OTEL_PROTOCOL,
                parse_protocol,
                file.otlp.protocol,
                defaults.otlp.protocol,
            ),
        };

        let sampling = SamplingSettings {
            interval: env.resolve(
                ENV_INTERVAL,
                parse_millis,
                file.sampling.interval,
                defaults.sampling.interval,
            ),
            cpu_window: env.resolve(
                ENV_CPU_WINDOW,
                parse_millis,
                file.sampling.cpu_window,
                defaults.sampling.cpu_window,
            ),
            command_timeout: env.resolve(
                ENV_COMMAND_TIMEOUT,
                parse_millis,
                file.sampling.command_timeout,
                defaults.sampling.command_timeout,
            ),
            start_delay: env.resolve(
                ENV_START_DELAY,
                parse_millis,
                file.sampling.start_delay,
                defaults.sampling.start_delay,
            ),
            variable_path: env.resolve(
                ENV_VARIABLE_PATH,
                parse_text,
                file.sampling.variable_path.clone(),
                defaults.sampling.variable_path,
            ),
        };

        AgentConfig {
            prometheus,
            otlp,
            sampling,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sampling.interval.is_zero() {
            return Err("Sampling interval must be > 0".to_string());
        }

        if self.sampling.cpu_window.is_zero() {
            return Err("CPU measurement window must be > 0".to_string());
        }

        if self.sampling.command_timeout.is_zero() {
            return Err("Command timeout must be > 0".to_string());
        }

        if self.sampling.variable_path.trim().is_empty() {
            return Err("Model variable path cannot be empty".to_string());
        }

        if self.otlp.enabled && self.otlp.target.trim().is_empty() {
            return Err("OTLP target cannot be empty".to_string());
        }

        Ok(())
    }

    pub fn prometheus_config(&self) -> PrometheusConfig {
        PrometheusConfig {
            bind_address: self.prometheus.bind_address,
            port: self.prometheus.port,
        }
    }

    /// The collector receives one export per sampling interval.
    pub fn otlp_config(&self) -> OtlpConfig {
        OtlpConfig {
            target: self.otlp.target.clone(),
            port: self.otlp.port,
            protocol: self.otlp.protocol,
            export_interval: self.sampling.interval,
            timeout: DEFAULT_EXPORT_TIMEOUT,
        }
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            cpu_window: self.sampling.cpu_window,
            variable_path: self.sampling.variable_path.clone(),
        }
    }
}

struct EnvSource<F> {
    lookup: F,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn resolve<T: Debug>(
        &self,
        key: &'static str,
        parse: fn(&str) -> Result<T, String>,
        file: Option<T>,
        default: T,
    ) -> T {
        if let Some(raw) = (self.lookup)(key).filter(|raw| !raw.trim().is_empty()) {
            match parse(raw.trim()) {
                Ok(value) => {
                    debug!("{} = {:?} (environment)", key, value);
                    return value;
                }
                Err(e) => warn!("Ignoring invalid {}='{}': {}", key, raw, e),
            }
        }

        if let Some(value) = file {
            debug!("{} = {:?} (config file)", key, value);
            return value;
        }

        if WARN_WHEN_DEFAULTED.contains(&key) {
            warn!("{} not set, using default {:?}", key, default);
        } else {
            debug!("{} not set, using default {:?}", key, default);
        }
        default
    }
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected true or false, got '{}'", other)),
    }
}

fn parse_port(raw: &str) -> Result<u16, String> {
    raw.parse::<u16>().map_err(|e| e.to_string())
}

fn parse_address(raw: &str) -> Result<IpAddr, String> {
    raw.parse::<IpAddr>().map_err(|e| e.to_string())
}

fn parse_millis(raw: &str) -> Result<Duration, String> {
    raw.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| e.to_string())
}

fn parse_protocol(raw: &str) -> Result<OtlpProtocol, String> {
    Ok(OtlpProtocol::from_selector(raw))
}

fn parse_text(raw: &str) -> Result<String, String> {
    Ok(raw.to_string())
}

/// A duration as written in a config file: a humantime string such as
/// `"500ms"` or `"5s"`, or a bare number of milliseconds like the `*_MS`
/// environment variables take.
#[derive(Deserialize)]
#[serde(untagged)]
enum DurationValue {
    Millis(u64),
    Text(String),
}

impl DurationValue {
    fn into_duration<E: serde::de::Error>(self) -> Result<Duration, E> {
        match self {
            DurationValue::Millis(ms) => Ok(Duration::from_millis(ms)),
            DurationValue::Text(text) => humantime::parse_duration(text.trim())
                .map_err(|e| E::custom(format!("invalid duration '{}': {}", text, e))),
        }
    }
}

mod duration_serde {
    use super::DurationValue;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        DurationValue::deserialize(deserializer)?.into_duration()
    }
}

mod duration_serde_option {
    use super::DurationValue;
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<DurationValue>::deserialize(deserializer)?
            .map(DurationValue::into_duration)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::from_lookup(lookup(&[]));

        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.prometheus.port, 1234);
        assert_eq!(config.otlp.target, "localhost");
        assert_eq!(config.otlp.port, 4317);
        assert_eq!(config.otlp.protocol, OtlpProtocol::Grpc);
        assert_eq!(config.sampling.interval, Duration::from_millis(500));
        assert_eq!(config.sampling.start_delay, Duration::from_secs(5));
        assert_eq!(config.sampling.variable_path, "Model/Variable1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_overrides() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("PROM_PORT", "9999"),
            ("OTEL_PORT", "4318"),
            ("OTEL_PROTOCOL", "1"),
            ("OTEL_TARGET", "collector.internal"),
            ("METRICS_START_DELAY_MS", "0"),
        ]));

        assert_eq!(config.prometheus_config().port, 9999);
        let otlp = config.otlp_config();
        assert_eq!(otlp.port, 4318);
        assert_eq!(otlp.protocol, OtlpProtocol::HttpProtobuf);
        assert_eq!(otlp.endpoint(), "http://collector.internal:4318");
        assert!(config.sampling.start_delay.is_zero());
    }

    #[test]
    fn test_invalid_values_fall_through() {
        let file = ConfigFile {
            otlp: OtlpFile {
                port: Some(4999),
                ..Default::default()
            },
            ..Default::default()
        };
        let config = AgentConfig::resolve(
            &file,
            lookup(&[
                ("PROM_PORT", "abc"),
                ("OTEL_PORT", "70000"),
                ("PROM_ENABLED", "maybe"),
                ("OTEL_TARGET", "   "),
            ]),
        );

        assert_eq!(config.prometheus.port, DEFAULT_PROMETHEUS_PORT);
        assert_eq!(config.otlp.port, 4999);
        assert!(config.prometheus.enabled);
        assert_eq!(config.otlp.target, "localhost");
    }

    #[test]
    fn test_environment_beats_file() {
        let file = ConfigFile {
            prometheus: PrometheusFile {
                port: Some(8080),
                enabled: Some(false),
                ..Default::default()
            },
            sampling: SamplingFile {
                interval: Some(Duration::from_secs(1)),
                ..Default::default()
            },
            ..Default::default()
        };

        let config = AgentConfig::resolve(&file, lookup(&[("PROM_PORT", "9100")]));

        assert_eq!(config.prometheus.port, 9100);
        assert!(!config.prometheus.enabled);
        assert_eq!(config.sampling.interval, Duration::from_secs(1));
        assert_eq!(config.otlp_config().export_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_validation() {
        let mut config = AgentConfig::default();
        config.sampling.interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.sampling.cpu_window = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = AgentConfig::default();
        config.otlp.target = String::new();
        assert!(config.validate().is_err());
        config.otlp.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_printed_config_reads_back() {
        let mut config = AgentConfig::default();
        config.otlp.protocol = OtlpProtocol::HttpProtobuf;
        config.sampling.start_delay = Duration::ZERO;

        let yaml = serde_yaml::to_string(&config).unwrap();
        let file: ConfigFile = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(AgentConfig::resolve(&file, lookup(&[])), config);
    }

    #[test]
    fn test_sampler_config() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("CPU_WINDOW_MS", "250"),
            ("MODEL_VARIABLE_PATH", "Plant/Pressure"),
        ]));

        let sampler = config.sampler_config();
        assert_eq!(sampler.cpu_window, Duration::from_millis(250));
        assert_eq!(sampler.variable_path, "Plant/Pressure");
    }
}
