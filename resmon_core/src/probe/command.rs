use crate::error::{ResmonError, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Runs external utilities and captures their standard output.
///
/// A command that does not finish within the timeout is killed and reported
/// as `CommandTimeout`, so a hung utility costs one failed reading.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn output(&self, program: &str, args: &[&str]) -> Result<String> {
        let command_line = if args.is_empty() {
            program.to_string()
        } else {
            format!("{} {}", program, args.join(" "))
        };
        debug!("Running '{}'", command_line);

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ResmonError::CommandFailed {
                    command: command_line,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ResmonError::CommandTimeout {
                    command: command_line,
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(ResmonError::CommandFailed {
                command: command_line,
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
