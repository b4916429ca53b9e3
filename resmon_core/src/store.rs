use crate::error::{ResmonError, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Read-only view of the host's project variables.
#[cfg_attr(test, mockall::automock)]
pub trait VariableStore: Send + Sync {
    /// Read a scalar by path, failing with `VariableNotFound` when the path is absent.
    fn get_scalar(&self, path: &str) -> Result<f64>;
}

#[derive(Debug, Default)]
pub struct InMemoryVariableStore {
    values: RwLock<HashMap<String, f64>>,
}

impl InMemoryVariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, path: impl Into<String>, value: f64) -> Self {
        self.set(path, value);
        self
    }

    pub fn set(&self, path: impl Into<String>, value: f64) {
        self.values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), value);
    }

    /// Parse a `PATH=VALUE` assignment as accepted on the command line.
    pub fn parse_assignment(assignment: &str) -> Result<(String, f64)> {
        let (path, value) = assignment.split_once('=').ok_or_else(|| {
            ResmonError::parse(format!("expected PATH=VALUE, got '{}'", assignment))
        })?;

        let path = path.trim();
        if path.is_empty() {
            return Err(ResmonError::parse("variable path cannot be empty"));
        }

        let value = value.trim().parse::<f64>().map_err(|e| {
            ResmonError::parse(format!("invalid value for '{}': {}", path, e))
        })?;

        Ok((path.to_string(), value))
    }
}

impl VariableStore for InMemoryVariableStore {
    fn get_scalar(&self, path: &str) -> Result<f64> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .copied()
            .ok_or_else(|| ResmonError::VariableNotFound(path.to_string()))
    }
}
