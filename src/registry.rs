//! Named task registry.
//!
//! Chains resolve task names when a node is appended, not when it runs.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;

use crate::task::BoxedTask;

/// Lookup table from task names to task functions.
pub trait TaskRegistry: Send + Sync {
    /// Append `tasks` under `name`. Registering an empty list is a no-op.
    fn register(&self, name: &str, tasks: Vec<BoxedTask>);

    /// Tasks registered under `name`, in registration order. Empty if unknown.
    fn resolve(&self, name: &str) -> Vec<BoxedTask>;

    fn contains(&self, name: &str) -> bool {
        !self.resolve(name).is_empty()
    }
}

/// Thread-safe in-memory registry.
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: RwLock<HashMap<String, Vec<BoxedTask>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskRegistry for InMemoryRegistry {
    fn register(&self, name: &str, mut tasks: Vec<BoxedTask>) {
        if tasks.is_empty() {
            return;
        }
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = entries.entry(name.to_string()).or_default();
        entry.append(&mut tasks);
        debug!(name, total = entry.len(), "tasks registered");
    }

    fn resolve(&self, name: &str) -> Vec<BoxedTask> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

static GLOBAL: OnceLock<Arc<InMemoryRegistry>> = OnceLock::new();

/// Process-wide registry used by chains that were not given one.
pub fn global() -> Arc<dyn TaskRegistry> {
    GLOBAL.get_or_init(|| Arc::new(InMemoryRegistry::new())).clone()
}

/// Register tasks in the process-wide registry.
pub fn register(name: &str, tasks: Vec<BoxedTask>) {
    global().register(name, tasks);
}
