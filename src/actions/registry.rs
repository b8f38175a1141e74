//! Action registry: name → source, with a reload-aware cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::actions::script::{SCRIPT_EXTENSION, ScriptAction};
use crate::actions::{ActionFactory, ActionOutcome, ActionUnit, Args};
use crate::context::SessionContext;
use crate::error::ActionError;

/// How far below the actions directory scripts are discovered.
const MAX_SCAN_DEPTH: usize = 8;

/// Where an action comes from.
#[derive(Clone)]
pub enum ActionSource {
    /// Compiled into the binary.
    Builtin(ActionFactory),
    /// A script file, parsed on load.
    Script(PathBuf),
}

impl std::fmt::Display for ActionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin(_) => write!(f, "<builtin>"),
            Self::Script(path) => write!(f, "{}", path.display()),
        }
    }
}

struct ActionDescriptor {
    source: ActionSource,
    cached: Option<Arc<dyn ActionUnit>>,
    loads: u32,
}

/// Registry of actions.
///
/// Units are loaded on first `run` and cached until `clear_cache` or a
/// reload. Duplicate names resolve to the last registration, with a warning.
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, ActionDescriptor>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a built-in action.
    pub async fn register(&self, name: &str, factory: ActionFactory) {
        let mut actions = self.actions.write().await;
        insert(&mut actions, name, ActionSource::Builtin(factory));
    }

    /// Register a built-in action (sync version for startup).
    pub fn register_sync(&self, name: &str, factory: ActionFactory) {
        if let Ok(mut actions) = self.actions.try_write() {
            insert(&mut actions, name, ActionSource::Builtin(factory));
        }
    }

    /// Register every `*.adb` script below `dir`, keyed by file stem.
    ///
    /// Paths are visited in sorted order so the winner of a duplicate name
    /// is deterministic. Returns the number of scripts found.
    pub fn scan(&self, dir: &Path) -> usize {
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "No actions directory");
            return 0;
        }
        info!(dir = %dir.display(), "Scanning actions");

        let scripts: Vec<(String, PathBuf)> = WalkDir::new(dir)
            .follow_links(false)
            .max_depth(MAX_SCAN_DEPTH)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some(SCRIPT_EXTENSION))
            .filter_map(|e| {
                let name = e.path().file_stem()?.to_str()?.to_string();
                Some((name, e.into_path()))
            })
            .collect();

        let Ok(mut actions) = self.actions.try_write() else {
            warn!("Action registry busy, scan skipped");
            return 0;
        };
        for (name, path) in &scripts {
            insert(&mut actions, name, ActionSource::Script(path.clone()));
        }
        info!(count = scripts.len(), "Action scan complete");
        scripts.len()
    }

    /// Run action `name`, loading it first if it is not cached or `reload`
    /// is set. Failures are logged and returned.
    pub async fn run(
        &self,
        ctx: &SessionContext,
        name: &str,
        args: &Args,
        reload: bool,
    ) -> Result<ActionOutcome, ActionError> {
        let unit = self.load(name, reload).await?;
        info!(action = %name, "Running action");

        match unit.run(ctx, args).await {
            Ok(outcome) => {
                if !outcome.is_success() {
                    warn!(action = %name, message = %outcome.message(), "Action reported failure");
                }
                Ok(outcome)
            }
            Err(e) => {
                error!(action = %name, error = %e, "Action failed");
                Err(e)
            }
        }
    }

    async fn load(&self, name: &str, reload: bool) -> Result<Arc<dyn ActionUnit>, ActionError> {
        let mut actions = self.actions.write().await;
        let Some(descriptor) = actions.get_mut(name) else {
            error!(action = %name, "Action not found");
            return Err(ActionError::NotFound {
                name: name.to_string(),
            });
        };

        if !reload && let Some(unit) = &descriptor.cached {
            return Ok(Arc::clone(unit));
        }

        let loaded = match &descriptor.source {
            ActionSource::Builtin(factory) => factory(),
            ActionSource::Script(path) => ScriptAction::load(name, path)
                .await
                .map(|script| Arc::new(script) as Arc<dyn ActionUnit>),
        };
        match loaded {
            Ok(unit) => {
                descriptor.loads += 1;
                descriptor.cached = Some(Arc::clone(&unit));
                debug!(action = %name, source = %descriptor.source, loads = descriptor.loads, "Loaded action");
                Ok(unit)
            }
            Err(e) => {
                error!(action = %name, source = %descriptor.source, error = %e, "Failed to load action");
                Err(match e {
                    e @ ActionError::LoadFailed { .. } => e,
                    other => ActionError::LoadFailed {
                        name: name.to_string(),
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    /// Drop every cached unit. Returns how many were dropped.
    pub async fn clear_cache(&self) -> usize {
        let mut actions = self.actions.write().await;
        let mut cleared = 0;
        for descriptor in actions.values_mut() {
            if descriptor.cached.take().is_some() {
                cleared += 1;
            }
        }
        info!(cleared, "Action cache cleared");
        cleared
    }

    pub async fn has(&self, name: &str) -> bool {
        self.actions.read().await.contains_key(name)
    }

    /// Registered names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn source(&self, name: &str) -> Option<ActionSource> {
        self.actions.read().await.get(name).map(|d| d.source.clone())
    }

    pub async fn is_cached(&self, name: &str) -> bool {
        self.actions
            .read()
            .await
            .get(name)
            .is_some_and(|d| d.cached.is_some())
    }

    /// How many times `name` has been loaded from its source.
    pub async fn load_count(&self, name: &str) -> u32 {
        self.actions.read().await.get(name).map_or(0, |d| d.loads)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn insert(actions: &mut HashMap<String, ActionDescriptor>, name: &str, source: ActionSource) {
    let incoming = source.to_string();
    let descriptor = ActionDescriptor {
        source,
        cached: None,
        loads: 0,
    };
    if let Some(previous) = actions.insert(name.to_string(), descriptor) {
        warn!(
            action = %name,
            replaced = %previous.source,
            by = %incoming,
            "Duplicate action name, later registration wins"
        );
    } else {
        debug!("Registered action: {}", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::action_factory;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl ActionUnit for Noop {
        async fn run(&self, _ctx: &SessionContext, _args: &Args) -> Result<ActionOutcome, ActionError> {
            Ok(ActionOutcome::Value(serde_json::Value::Bool(true)))
        }
    }

    fn write(dir: &Path, rel: &str, body: &str) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn scan_finds_nested_scripts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "common/home.adb", "shell input keyevent 3");
        write(dir.path(), "deep/nested/tap.adb", "shell input tap {x} {y}");
        write(dir.path(), "common/readme.txt", "not an action");

        let registry = ActionRegistry::new();
        assert_eq!(registry.scan(dir.path()), 2);
        assert_eq!(registry.list().await, vec!["home", "tap"]);
    }

    #[tokio::test]
    async fn duplicate_script_names_last_scanned_wins() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a/home.adb", "shell input keyevent 3");
        let last = write(dir.path(), "b/home.adb", "shell input keyevent 4");

        let registry = ActionRegistry::new();
        registry.register("home", action_factory(|| Noop)).await;
        registry.scan(dir.path());

        match registry.source("home").await {
            Some(ActionSource::Script(path)) => assert_eq!(path, last),
            _ => panic!("expected script source"),
        }
    }

    #[tokio::test]
    async fn loads_once_until_reload_or_clear() {
        let registry = ActionRegistry::new();
        registry.register("noop", action_factory(|| Noop)).await;
        assert!(!registry.is_cached("noop").await);

        registry.load("noop", false).await.unwrap();
        registry.load("noop", false).await.unwrap();
        assert_eq!(registry.load_count("noop").await, 1);
        assert!(registry.is_cached("noop").await);

        registry.load("noop", true).await.unwrap();
        assert_eq!(registry.load_count("noop").await, 2);

        assert_eq!(registry.clear_cache().await, 1);
        assert!(!registry.is_cached("noop").await);
        registry.load("noop", false).await.unwrap();
        assert_eq!(registry.load_count("noop").await, 3);
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let registry = ActionRegistry::new();
        assert!(matches!(
            registry.load("ghost", false).await,
            Err(ActionError::NotFound { .. })
        ));
        assert!(!registry.has("ghost").await);
    }

    #[tokio::test]
    async fn failed_reload_keeps_previous_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "home.adb", "shell input keyevent 3");
        let registry = ActionRegistry::new();
        registry.scan(dir.path());

        registry.load("home", false).await.unwrap();
        std::fs::write(&path, "shell echo {broken").unwrap();

        let err = registry.load("home", true).await.err().unwrap();
        assert!(matches!(err, ActionError::LoadFailed { .. }));
        assert!(registry.is_cached("home").await);
        assert_eq!(registry.load_count("home").await, 1);
    }
}
