//! Worker factory table.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::WorkerError;
use crate::workers::base::WorkerUnit;
use crate::workers::params::WorkerArgs;

/// Builds a worker from its start parameters, validating them.
pub type WorkerFactory =
    Arc<dyn Fn(&WorkerArgs) -> Result<Box<dyn WorkerUnit>, WorkerError> + Send + Sync>;

/// Wrap a typed constructor as a `WorkerFactory`.
pub fn worker_factory<W, F>(build: F) -> WorkerFactory
where
    W: WorkerUnit + 'static,
    F: Fn(&WorkerArgs) -> Result<W, WorkerError> + Send + Sync + 'static,
{
    Arc::new(move |args| build(args).map(|w| Box::new(w) as Box<dyn WorkerUnit>))
}

/// Registry of worker factories by name.
pub struct WorkerRegistry {
    factories: RwLock<HashMap<String, WorkerFactory>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Register a factory. A later registration under the same name wins.
    pub async fn register(&self, name: &str, factory: WorkerFactory) {
        let previous = self.factories.write().await.insert(name.to_string(), factory);
        log_registration(name, previous.is_some());
    }

    /// Register a factory (sync version for startup).
    pub fn register_sync(&self, name: &str, factory: WorkerFactory) {
        if let Ok(mut factories) = self.factories.try_write() {
            let previous = factories.insert(name.to_string(), factory);
            log_registration(name, previous.is_some());
        }
    }

    pub async fn get(&self, name: &str) -> Option<WorkerFactory> {
        self.factories.read().await.get(name).cloned()
    }

    pub async fn has(&self, name: &str) -> bool {
        self.factories.read().await.contains_key(name)
    }

    /// Registered names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn log_registration(name: &str, replaced: bool) {
    if replaced {
        tracing::warn!(worker = %name, "Duplicate worker name, later registration wins");
    } else {
        tracing::debug!("Registered worker: {}", name);
    }
}
