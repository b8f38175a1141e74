//! Pool of active workers, at most one per name.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::context::SessionContext;
use crate::error::WorkerError;
use crate::report::collect_artifact;
use crate::workers::base::{SupervisorSettings, WorkerHandle};
use crate::workers::params::WorkerArgs;
use crate::workers::registry::WorkerRegistry;
use crate::workers::state::WorkerState;

/// Result of `WorkerPool::start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// An instance with this name is already active; nothing was started.
    AlreadyRunning,
}

/// Tracks active worker instances.
///
/// The active map stays locked for the whole of `start` and `stop`, so a
/// name can only be started again once its previous instance has stopped.
pub struct WorkerPool {
    registry: Arc<WorkerRegistry>,
    settings: SupervisorSettings,
    active: Mutex<HashMap<String, WorkerHandle>>,
}

impl WorkerPool {
    pub fn new(registry: Arc<WorkerRegistry>, config: &WorkerConfig) -> Self {
        Self::with_settings(registry, SupervisorSettings::from_config(config))
    }

    pub fn with_settings(registry: Arc<WorkerRegistry>, settings: SupervisorSettings) -> Self {
        Self {
            registry,
            settings,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Start worker `name` unless an instance is already active.
    pub async fn start(
        &self,
        session: &Arc<SessionContext>,
        name: &str,
        args: WorkerArgs,
    ) -> Result<StartOutcome, WorkerError> {
        let mut active = self.active.lock().await;
        if active.contains_key(name) {
            warn!(worker = %name, "Worker already running, ignoring start");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let Some(factory) = self.registry.get(name).await else {
            error!(worker = %name, "Worker not found");
            return Err(WorkerError::NotFound {
                name: name.to_string(),
            });
        };

        let built = args
            .hook_strategy(name)
            .and_then(|strategy| factory(&args).map(|unit| (unit, strategy)));
        let (unit, strategy) = match built {
            Ok(built) => built,
            Err(e) => {
                error!(worker = %name, error = %e, "Failed to load worker");
                return Err(WorkerError::LoadFailed {
                    name: name.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let handle = WorkerHandle::spawn(
            name,
            unit,
            Arc::clone(session),
            args,
            strategy,
            self.settings,
        );
        active.insert(name.to_string(), handle);
        info!(worker = %name, strategy = ?strategy, "Worker started");
        Ok(StartOutcome::Started)
    }

    /// Stop worker `name` and hand its artifact to the report sink.
    ///
    /// Returns the artifact path, if the worker declared one.
    pub async fn stop(&self, session: &SessionContext, name: &str) -> Option<PathBuf> {
        let mut active = self.active.lock().await;
        let Some(handle) = active.remove(name) else {
            warn!(worker = %name, "Worker not running, ignoring stop");
            return None;
        };

        let artifact = handle.stop().await;
        drop(active);

        if let Some(path) = &artifact {
            collect_artifact(session.report().as_ref(), name, path).await;
        }
        artifact
    }

    /// Stop every active worker concurrently. Safe to call repeatedly.
    pub async fn stop_all(&self, session: &SessionContext) {
        let mut active = self.active.lock().await;
        if active.is_empty() {
            return;
        }
        info!(count = active.len(), "Stopping all workers");

        let stops = active.drain().map(|(name, handle)| async move {
            let artifact = handle.stop().await;
            (name, artifact)
        });
        let stopped = join_all(stops).await;
        drop(active);

        for (name, artifact) in stopped {
            if let Some(path) = artifact {
                collect_artifact(session.report().as_ref(), &name, &path).await;
            }
        }
    }

    pub async fn is_active(&self, name: &str) -> bool {
        self.active.lock().await.contains_key(name)
    }

    /// Names of active workers, sorted.
    pub async fn active_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn state(&self, name: &str) -> Option<WorkerState> {
        self.active.lock().await.get(name).map(WorkerHandle::state)
    }

    pub async fn retry_count(&self, name: &str) -> Option<u32> {
        self.active.lock().await.get(name).map(WorkerHandle::retry_count)
    }
}
