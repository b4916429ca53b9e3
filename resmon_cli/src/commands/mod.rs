pub mod config;
pub mod run;
pub mod sample;

use anyhow::Result;
use resmon_core::InMemoryVariableStore;
use std::sync::Arc;

/// Build the variable store from `--var PATH=VALUE` arguments.
pub fn variable_store(assignments: &[String]) -> Result<Arc<InMemoryVariableStore>> {
    let store = InMemoryVariableStore::new();
    for assignment in assignments {
        let (path, value) = InMemoryVariableStore::parse_assignment(assignment)?;
        store.set(path, value);
    }
    Ok(Arc::new(store))
}
