//! Session context shared by actions and workers.
//!
//! A `Session` owns one `Arc<SessionContext>` plus the worker pool. Actions
//! receive `&SessionContext`; workers hold the `Arc` for their lifetime.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::actions::{ActionFactory, ActionOutcome, ActionRegistry, Args};
use crate::config::HarnessConfig;
use crate::device::{AdbRunner, CommandRunner, ConnectionManager, DevicePool};
use crate::error::{ActionError, Error, WorkerError};
use crate::report::{FileReportSink, ReportSink};
use crate::workers::{StartOutcome, WorkerArgs, WorkerFactory, WorkerPool, WorkerRegistry};

/// Directory holding script actions, relative to the session root.
pub const ACTIONS_DIR: &str = "actions";
/// Directory holding everything the harness writes.
pub const OUTPUTS_DIR: &str = "outputs";

/// Mutable data shared across a session.
///
/// The two failure flags are monotonic: once set they stay set, so
/// concurrent writers never conflict. The value map is last-write-wins.
#[derive(Debug, Default)]
pub struct SharedData {
    has_crash: AtomicBool,
    soft_failure: AtomicBool,
    values: RwLock<serde_json::Map<String, Value>>,
}

impl SharedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the session as critically failed.
    pub fn mark_crash(&self) {
        self.has_crash.store(true, Ordering::SeqCst);
    }

    pub fn has_crash(&self) -> bool {
        self.has_crash.load(Ordering::SeqCst)
    }

    /// Mark a non-fatal failure.
    pub fn mark_soft_failure(&self) {
        self.soft_failure.store(true, Ordering::SeqCst);
    }

    pub fn soft_failure(&self) -> bool {
        self.soft_failure.load(Ordering::SeqCst)
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.into(), value);
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().ok().and_then(|v| v.get(key).cloned())
    }

    /// Copy every argument into the map.
    pub fn merge(&self, args: &Args) {
        if let Ok(mut values) = self.values.write() {
            for (k, v) in args {
                values.insert(k.clone(), v.clone());
            }
        }
    }
}

/// Everything an action or worker can reach.
pub struct SessionContext {
    id: Uuid,
    root_dir: PathBuf,
    config: HarnessConfig,
    data: SharedData,
    devices: DevicePool,
    actions: ActionRegistry,
    report: Arc<dyn ReportSink>,
}

impl SessionContext {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// `<root>/outputs/<sub>`.
    pub fn output_dir(&self, sub: &str) -> PathBuf {
        self.root_dir.join(OUTPUTS_DIR).join(sub)
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn data(&self) -> &SharedData {
        &self.data
    }

    pub fn devices(&self) -> &DevicePool {
        &self.devices
    }

    /// The primary device.
    pub fn adb(&self) -> Arc<ConnectionManager> {
        self.devices.primary()
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn report(&self) -> &Arc<dyn ReportSink> {
        &self.report
    }

    /// Run an action by name. Arguments are also merged into the shared data.
    pub async fn run(&self, name: &str, args: Args) -> Result<ActionOutcome, ActionError> {
        if !args.is_empty() {
            self.data.merge(&args);
        }
        self.actions.run(self, name, &args, false).await
    }

    /// Run an action after reloading it from source.
    pub async fn run_with_reload(&self, name: &str, args: Args) -> Result<ActionOutcome, ActionError> {
        if !args.is_empty() {
            self.data.merge(&args);
        }
        self.actions.run(self, name, &args, true).await
    }
}

/// A test session: the shared context plus the worker pool.
pub struct Session {
    ctx: Arc<SessionContext>,
    workers: WorkerPool,
}

impl Session {
    /// Open a session at `root` with the real adb runner and a file report
    /// under `outputs/report`.
    pub fn open(root: PathBuf) -> Result<Self, Error> {
        let config = HarnessConfig::load(&root)?;
        Ok(Self::builder(root, config).build())
    }

    pub fn builder(root: PathBuf, config: HarnessConfig) -> SessionBuilder {
        SessionBuilder {
            root,
            config,
            runner: None,
            report: None,
            actions: Vec::new(),
            workers: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn data(&self) -> &SharedData {
        &self.ctx.data
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    pub async fn run(&self, name: &str, args: Args) -> Result<ActionOutcome, ActionError> {
        self.ctx.run(name, args).await
    }

    pub async fn run_with_reload(&self, name: &str, args: Args) -> Result<ActionOutcome, ActionError> {
        self.ctx.run_with_reload(name, args).await
    }

    pub async fn start(&self, name: &str, args: WorkerArgs) -> Result<StartOutcome, WorkerError> {
        self.workers.start(&self.ctx, name, args).await
    }

    /// Stop a worker, returning its artifact path if it produced one.
    pub async fn stop(&self, name: &str) -> Option<PathBuf> {
        self.workers.stop(&self.ctx, name).await
    }

    pub async fn stop_all(&self) {
        self.workers.stop_all(&self.ctx).await;
    }

    /// Drop every cached action so the next run reloads from source.
    pub async fn clear_cache(&self) -> usize {
        self.ctx.actions.clear_cache().await
    }

    /// Teardown: stop all workers, then flush the report.
    pub async fn shutdown(&self) {
        info!(session = %self.ctx.id, "Session shutting down");
        self.stop_all().await;
        if let Err(e) = self.ctx.report.flush().await {
            warn!(session = %self.ctx.id, error = %e, "Failed to flush report");
        }
    }
}

/// Builder for `Session`.
pub struct SessionBuilder {
    root: PathBuf,
    config: HarnessConfig,
    runner: Option<Arc<dyn CommandRunner>>,
    report: Option<Arc<dyn ReportSink>>,
    actions: Vec<(String, ActionFactory)>,
    workers: Vec<(String, WorkerFactory)>,
}

impl SessionBuilder {
    /// Replace the process runner (defaults to `AdbRunner`).
    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Replace the report sink (defaults to `FileReportSink` in `outputs/report`).
    pub fn report(mut self, report: Arc<dyn ReportSink>) -> Self {
        self.report = Some(report);
        self
    }

    /// Register an extra action; it shadows a built-in of the same name.
    pub fn action(mut self, name: impl Into<String>, factory: ActionFactory) -> Self {
        self.actions.push((name.into(), factory));
        self
    }

    /// Register an extra worker; it shadows a built-in of the same name.
    pub fn worker(mut self, name: impl Into<String>, factory: WorkerFactory) -> Self {
        self.workers.push((name.into(), factory));
        self
    }

    pub fn build(self) -> Session {
        let runner = self.runner.unwrap_or_else(|| Arc::new(AdbRunner));
        let report = self.report.unwrap_or_else(|| {
            Arc::new(FileReportSink::new(
                self.root.join(OUTPUTS_DIR).join("report"),
            ))
        });

        let actions = ActionRegistry::new();
        crate::actions::builtin::register_all(&actions);
        for (name, factory) in self.actions {
            actions.register_sync(&name, factory);
        }
        actions.scan(&self.root.join(ACTIONS_DIR));

        let registry = WorkerRegistry::new();
        crate::workers::builtin::register_all(&registry);
        for (name, factory) in self.workers {
            registry.register_sync(&name, factory);
        }

        let devices = DevicePool::from_config(&self.config, runner);
        let workers = WorkerPool::new(Arc::new(registry), &self.config.workers);

        let ctx = SessionContext {
            id: Uuid::new_v4(),
            root_dir: self.root,
            config: self.config,
            data: SharedData::new(),
            devices,
            actions,
            report,
        };
        info!(
            session = %ctx.id,
            root = %ctx.root_dir.display(),
            devices = ctx.devices.len(),
            "Session ready"
        );

        Session {
            ctx: Arc::new(ctx),
            workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flags_are_monotonic() {
        let data = SharedData::new();
        assert!(!data.has_crash());
        data.mark_crash();
        data.mark_crash();
        assert!(data.has_crash());
        assert!(!data.soft_failure());
        data.mark_soft_failure();
        assert!(data.soft_failure());
    }

    #[test]
    fn merge_is_last_write_wins() {
        let data = SharedData::new();
        data.insert("message", json!("first"));
        let mut args = Args::new();
        args.insert("message".into(), json!("second"));
        data.merge(&args);
        assert_eq!(data.get("message"), Some(json!("second")));
    }
}
