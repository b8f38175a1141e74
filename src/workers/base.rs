//! Worker base contract: the supervised `working()` loop.
//!
//! Each started worker runs on its own tokio task. The task calls
//! `working()` until the cancellation token fires. A failed or panicking
//! call is a crash: the retry counter goes up and the loop sleeps
//! `min(max_backoff, 1s * 2^(retries - 1))` before trying again. Any
//! successful call resets the counter. Only `stop()` ends the loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::context::SessionContext;
use crate::error::WorkerError;
use crate::workers::alert::{EscalationStrategy, escalate, notify_callback};
use crate::workers::params::WorkerArgs;
use crate::workers::state::WorkerState;

/// A background unit of work.
#[async_trait]
pub trait WorkerUnit: Send {
    /// One unit of sampling or monitoring work.
    ///
    /// Either do a bounded amount of work, or loop while checking
    /// `ctx.is_stopped()` often. Returning an error counts as a crash.
    async fn working(&mut self, ctx: &WorkerContext) -> Result<(), WorkerError>;

    /// Called once on the worker task after the loop exits.
    async fn on_stop(&mut self, _ctx: &WorkerContext) {}
}

/// Timing knobs for supervised workers.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    /// How long `stop()` waits for the loop to exit.
    pub join_timeout: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            join_timeout: config.join_timeout(),
            max_backoff: config.max_backoff(),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

/// Backoff before retry number `retry` (1-based), capped at `cap`.
pub fn backoff_delay(retry: u32, cap: Duration) -> Duration {
    let exponent = retry.saturating_sub(1).min(32);
    Duration::from_secs(1u64 << exponent).min(cap)
}

/// State shared between a worker task and its handle.
pub struct WorkerControl {
    cancel: CancellationToken,
    state: Mutex<WorkerState>,
    retry_count: AtomicU32,
    artifact: Mutex<Option<PathBuf>>,
    processes: Mutex<Vec<Child>>,
}

impl WorkerControl {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            state: Mutex::new(WorkerState::Idle),
            retry_count: AtomicU32::new(0),
            artifact: Mutex::new(None),
            processes: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state.lock().map(|s| *s).unwrap_or(WorkerState::Stopped)
    }

    fn transition(&self, target: WorkerState) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if !state.can_transition_to(target) {
            debug!(from = %*state, to = %target, "Ignoring worker state transition");
            return false;
        }
        *state = target;
        true
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    fn record_crash(&self) -> u32 {
        self.retry_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn reset_retries(&self) {
        self.retry_count.store(0, Ordering::SeqCst);
    }

    pub fn artifact(&self) -> Option<PathBuf> {
        self.artifact.lock().ok().and_then(|a| a.clone())
    }

    /// Kill every adopted child process. Returns how many were signalled.
    fn kill_processes(&self) -> usize {
        let Ok(mut processes) = self.processes.lock() else {
            return 0;
        };
        let mut killed = 0;
        for mut child in processes.drain(..) {
            if child.start_kill().is_ok() {
                killed += 1;
            }
        }
        killed
    }
}

/// What a running worker sees: its name, parameters, the session, and its
/// own control block.
#[derive(Clone)]
pub struct WorkerContext {
    name: String,
    session: Arc<SessionContext>,
    args: WorkerArgs,
    escalation: Option<EscalationStrategy>,
    control: Arc<WorkerControl>,
}

impl WorkerContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn args(&self) -> &WorkerArgs {
        &self.args
    }

    pub fn is_stopped(&self) -> bool {
        self.control.cancel.is_cancelled()
    }

    /// Resolves when the worker is asked to stop.
    pub async fn cancelled(&self) {
        self.control.cancel.cancelled().await
    }

    /// Sleep for `duration` or until stopped. Returns `true` if stopped.
    pub async fn interruptible_sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.control.cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => self.is_stopped(),
        }
    }

    /// Raise an alert: the caller's callback first, then the escalation
    /// strategy. Both may fire for one alert.
    pub async fn alert(&self, message: &str) {
        warn!(worker = %self.name, message, "Worker alert");
        if let Some(callback) = self.args.alert_callback() {
            notify_callback(callback, &self.name, message);
        }
        if let Some(strategy) = self.escalation {
            escalate(&self.session, strategy, &self.name, message).await;
        }
    }

    /// Declare the file this worker hands to the report on stop.
    pub fn set_output_artifact(&self, path: PathBuf) {
        if let Ok(mut artifact) = self.control.artifact.lock() {
            *artifact = Some(path);
        }
    }

    pub fn output_artifact(&self) -> Option<PathBuf> {
        self.control.artifact()
    }

    /// Hand a child process to the control block so `stop()` can kill it
    /// before signalling cancellation. Take its stdout first.
    pub fn adopt_process(&self, child: Child) {
        if let Ok(mut processes) = self.control.processes.lock() {
            processes.push(child);
        }
    }

    /// Kill adopted processes from inside the worker.
    pub fn release_processes(&self) -> usize {
        self.control.kill_processes()
    }

    pub fn retry_count(&self) -> u32 {
        self.control.retry_count()
    }
}

/// Handle to a running worker, owned by the pool.
pub struct WorkerHandle {
    name: String,
    control: Arc<WorkerControl>,
    task: JoinHandle<()>,
    join_timeout: Duration,
}

impl WorkerHandle {
    /// Start the supervised loop for `unit` on a new task.
    pub fn spawn(
        name: &str,
        unit: Box<dyn WorkerUnit>,
        session: Arc<SessionContext>,
        args: WorkerArgs,
        escalation: Option<EscalationStrategy>,
        settings: SupervisorSettings,
    ) -> Self {
        let control = Arc::new(WorkerControl::new());
        control.transition(WorkerState::Running);

        let ctx = WorkerContext {
            name: name.to_string(),
            session,
            args,
            escalation,
            control: Arc::clone(&control),
        };
        let task = tokio::spawn(supervise(unit, ctx, settings.max_backoff));

        Self {
            name: name.to_string(),
            control,
            task,
            join_timeout: settings.join_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.control.state()
    }

    pub fn retry_count(&self) -> u32 {
        self.control.retry_count()
    }

    /// Stop the worker and return its declared artifact.
    ///
    /// Adopted processes are killed first so blocked reads unblock, then the
    /// token is cancelled and the task is awaited for at most the join
    /// timeout. A worker that ignores cancellation is left running and
    /// logged; this never hangs.
    pub async fn stop(mut self) -> Option<PathBuf> {
        self.control.transition(WorkerState::Stopping);

        let killed = self.control.kill_processes();
        if killed > 0 {
            debug!(worker = %self.name, killed, "Killed worker processes");
        }
        self.control.cancel.cancel();

        match tokio::time::timeout(self.join_timeout, &mut self.task).await {
            Ok(Ok(())) => info!(worker = %self.name, "Worker stopped"),
            Ok(Err(e)) => error!(worker = %self.name, error = %e, "Worker task aborted"),
            Err(_) => warn!(
                worker = %self.name,
                timeout_ms = self.join_timeout.as_millis() as u64,
                "Worker did not exit within the join timeout, proceeding"
            ),
        }

        self.control.transition(WorkerState::Stopped);
        self.control.artifact()
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.control.state().is_terminal() {
            return;
        }
        debug!(worker = %self.name, "Worker handle dropped while active, cancelling");
        self.control.kill_processes();
        self.control.cancel.cancel();
    }
}

async fn supervise(mut unit: Box<dyn WorkerUnit>, ctx: WorkerContext, max_backoff: Duration) {
    info!(worker = %ctx.name, "Worker started");

    while !ctx.is_stopped() {
        let outcome = AssertUnwindSafe(unit.working(&ctx)).catch_unwind().await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
        };

        match failure {
            None => ctx.control.reset_retries(),
            Some(reason) => {
                let retry = ctx.control.record_crash();
                let wait = backoff_delay(retry, max_backoff);
                error!(
                    worker = %ctx.name,
                    retry,
                    wait_secs = wait.as_secs(),
                    error = %reason,
                    "Worker crashed, retrying after backoff"
                );
                if ctx.interruptible_sleep(wait).await {
                    break;
                }
            }
        }
    }

    unit.on_stop(&ctx).await;
    info!(worker = %ctx.name, "Worker loop exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let cap = Duration::from_secs(60);
        let delays: Vec<u64> = (1..=9).map(|n| backoff_delay(n, cap).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn backoff_never_overflows() {
        let cap = Duration::from_secs(60);
        assert_eq!(backoff_delay(u32::MAX, cap), cap);
        assert_eq!(backoff_delay(0, cap), Duration::from_secs(1));
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
