use crate::config::{AgentConfig, ConfigFile};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// TOML files keep the settings under an `[agent]` table.
#[derive(Debug, Deserialize)]
struct TomlConfigFile {
    agent: ConfigFile,
}

pub async fn parse_config_from_file(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let format = path
        .extension()
        .and_then(|s| s.to_str())
        .filter(|ext| matches!(*ext, "yaml" | "yml" | "toml" | "json"))
        .ok_or_else(|| {
            anyhow::anyhow!("Unsupported file format. Use .yaml, .yml, .toml, or .json")
        })?;

    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    parse_config_from_str(&contents, format)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

pub fn parse_config_from_str(content: &str, format: &str) -> Result<ConfigFile> {
    match format.to_lowercase().as_str() {
        "yaml" | "yml" => parse_yaml(content),
        "toml" => parse_toml(content),
        "json" => parse_json(content),
        _ => Err(anyhow::anyhow!("Unsupported format: {}", format)),
    }
}

/// Merge the optional file with the process environment and validate the result.
pub async fn load_config(path: Option<&Path>) -> Result<AgentConfig> {
    let file = match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            parse_config_from_file(path).await?
        }
        None => ConfigFile::default(),
    };

    let config = AgentConfig::resolve(&file, |key| std::env::var(key).ok());
    config.validate().map_err(|e| anyhow::anyhow!(e))?;
    Ok(config)
}

fn parse_yaml(content: &str) -> Result<ConfigFile> {
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

fn parse_toml(content: &str) -> Result<ConfigFile> {
    let config: TomlConfigFile = toml::from_str(content)?;
    Ok(config.agent)
}

fn parse_json(content: &str) -> Result<ConfigFile> {
    Ok(serde_json::from_str(content)?)
}
