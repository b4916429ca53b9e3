use anyhow::Result;
use resmon_agent::AgentConfig;

pub fn execute(config: &AgentConfig) -> Result<()> {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}
