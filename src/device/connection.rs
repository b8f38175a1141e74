//! Device-scoped command execution with retry and reconnect.
//!
//! Failures are classified by their error text:
//! - connectivity ("device not found", "offline") → reconnect, pause, retry
//!   until the retry budget is spent
//! - anything else → returned immediately, never retried

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::device::handle::DeviceHandle;
use crate::device::runner::{CommandOutput, CommandRunner, render_command};
use crate::error::ConnectionError;

/// Error fragments that indicate the device link, not the command, failed.
const CONNECTIVITY_PATTERNS: &[&str] = &[
    "device not found",
    "offline",
    "no devices/emulators found",
];

static CPU_PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+(?:\.\d+)?)%").expect("valid cpu regex"));

static FIRST_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)").expect("valid integer regex"));

/// Whether an error message describes a lost device link.
pub fn is_connectivity_error(text: &str) -> bool {
    let lower = text.to_lowercase();
    CONNECTIVITY_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Timing and retry settings shared by every manager in a pool.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub adb_path: String,
    pub retry_budget: u32,
    pub retry_pause: Duration,
    pub settle: Duration,
    pub command_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default())
    }
}

impl ConnectionSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            adb_path: config.adb_path.clone(),
            retry_budget: config.connection.retry_budget,
            retry_pause: config.connection.retry_pause(),
            settle: config.connection.settle(),
            command_timeout: config.connection.command_timeout(),
        }
    }
}

/// Executes adb commands against one device.
///
/// Resetting the adb server restarts the transport for *every* device on
/// this host, not just this one. Managers created by the same pool share a
/// transport lock so concurrent resets are serialized; commands from other
/// devices in flight during a reset fail transiently and retry on their own.
pub struct ConnectionManager {
    handle: DeviceHandle,
    runner: Arc<dyn CommandRunner>,
    settings: ConnectionSettings,
    transport: Arc<Mutex<()>>,
}

impl ConnectionManager {
    pub fn new(
        handle: DeviceHandle,
        runner: Arc<dyn CommandRunner>,
        settings: ConnectionSettings,
        transport: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            handle,
            runner,
            settings,
            transport,
        }
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    pub fn device_id(&self) -> Option<&str> {
        self.handle.device_id()
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Run a whitespace-separated adb command with the configured retry budget.
    pub async fn run(&self, command: &str) -> Result<String, ConnectionError> {
        self.execute(command, self.settings.retry_budget).await
    }

    /// Run a whitespace-separated adb command with an explicit retry budget.
    pub async fn execute(&self, command: &str, retry_budget: u32) -> Result<String, ConnectionError> {
        let args = command.split_whitespace().map(str::to_string).collect();
        self.execute_args(args, retry_budget).await
    }

    /// Run adb with pre-split arguments, scoped to this device.
    ///
    /// Returns trimmed stdout on success. Connectivity failures trigger one
    /// reconnect cycle per retry; after `retry_budget` retries the last error
    /// is returned as `ConnectionError::Transient`.
    pub async fn execute_args(
        &self,
        args: Vec<String>,
        retry_budget: u32,
    ) -> Result<String, ConnectionError> {
        let mut full_args = self.handle.scope_args();
        full_args.extend(args);
        let rendered = render_command(&self.settings.adb_path, &full_args);

        let mut retries = 0;
        loop {
            debug!(device = %self.handle, command = %rendered, "Executing");
            let output = self
                .runner
                .run(&self.settings.adb_path, &full_args, self.settings.command_timeout)
                .await?;

            if output.success {
                return Ok(output.stdout.trim().to_string());
            }

            let error_text = output.error_text();
            if !is_connectivity_error(&error_text) {
                warn!(device = %self.handle, command = %rendered, error = %error_text, "Command failed");
                return Err(ConnectionError::Command {
                    device: self.handle.to_string(),
                    command: rendered,
                    stderr: error_text,
                });
            }

            if retries >= retry_budget {
                warn!(
                    device = %self.handle,
                    attempts = retries + 1,
                    error = %error_text,
                    "Device unreachable, retry budget exhausted"
                );
                return Err(ConnectionError::Transient {
                    device: self.handle.to_string(),
                    attempts: retries + 1,
                    last_error: error_text,
                });
            }

            retries += 1;
            warn!(
                device = %self.handle,
                attempt = retries,
                budget = retry_budget,
                error = %error_text,
                "Connectivity failure, reconnecting"
            );
            self.reconnect().await;
            tokio::time::sleep(self.settings.retry_pause).await;
        }
    }

    /// Reset the adb server and, for network devices, re-issue `adb connect`.
    pub async fn reconnect(&self) -> bool {
        let _transport = self.transport.lock().await;
        warn!(device = %self.handle, "Restarting adb server (affects every device on this host)");

        if let Err(e) = self.raw(&["kill-server"]).await {
            warn!(error = %e, "adb kill-server failed");
        }
        if let Err(e) = self.raw(&["start-server"]).await {
            warn!(error = %e, "adb start-server failed");
        }

        if !self.handle.is_network_device() {
            return true;
        }

        let connected = self.connect_once().await;
        tokio::time::sleep(self.settings.settle).await;
        connected
    }

    /// `adb connect` for network devices. Non-network devices report `true`.
    pub async fn connect(&self) -> bool {
        if !self.handle.is_network_device() {
            return true;
        }
        self.connect_once().await
    }

    async fn connect_once(&self) -> bool {
        let Some(id) = self.handle.device_id() else {
            return false;
        };
        match self.raw(&["connect", id]).await {
            Ok(output) if output.success && output.stdout.contains("connected") => {
                info!(device = %self.handle, "Connected");
                true
            }
            Ok(output) => {
                warn!(device = %self.handle, output = %output.error_text(), "Connect failed");
                false
            }
            Err(e) => {
                warn!(device = %self.handle, error = %e, "Connect failed");
                false
            }
        }
    }

    /// Unscoped adb invocation with no retry.
    async fn raw(&self, args: &[&str]) -> Result<CommandOutput, ConnectionError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runner
            .run(&self.settings.adb_path, &args, self.settings.command_timeout)
            .await
    }

    /// Output of `adb devices`.
    pub async fn devices(&self) -> Result<String, ConnectionError> {
        let output = self.raw(&["devices"]).await?;
        Ok(output.stdout.trim().to_string())
    }

    /// Run a command in the device shell. The whole string is passed as one
    /// argument so pipes run on the device.
    pub async fn shell(&self, command: &str) -> Result<String, ConnectionError> {
        self.execute_args(
            vec!["shell".to_string(), command.to_string()],
            self.settings.retry_budget,
        )
        .await
    }

    /// Like [`shell`](Self::shell) but never retries or resets the
    /// transport. For best-effort cleanup on possibly gone devices.
    pub async fn shell_once(&self, command: &str) -> Result<String, ConnectionError> {
        self.execute_args(vec!["shell".to_string(), command.to_string()], 0)
            .await
    }

    /// `adb get-state`, without retry. Failures map to `"offline"` or `"unknown"`.
    pub async fn get_state(&self) -> String {
        match self.execute_args(vec!["get-state".to_string()], 0).await {
            Ok(state) => state,
            Err(e) if e.is_transient() => "offline".to_string(),
            Err(_) => "unknown".to_string(),
        }
    }

    /// CPU usage of `package` in percent, from `dumpsys cpuinfo`.
    ///
    /// A package absent from the listing reports 0.
    pub async fn cpu_usage(&self, package: &str) -> Result<f64, ConnectionError> {
        let output = match self.shell(&format!("dumpsys cpuinfo | grep {package}")).await {
            Ok(output) => output,
            Err(ConnectionError::Command { .. }) => return Ok(0.0),
            Err(e) => return Err(e),
        };
        Ok(parse_cpu_percent(&output, package).unwrap_or(0.0))
    }

    /// Total PSS of `package` in MB, from `dumpsys meminfo`.
    pub async fn memory_pss_mb(&self, package: &str) -> Result<f64, ConnectionError> {
        let output = match self.shell(&format!("dumpsys meminfo {package} | grep TOTAL")).await {
            Ok(output) => output,
            Err(ConnectionError::Command { .. }) => return Ok(0.0),
            Err(e) => return Err(e),
        };
        Ok(parse_total_pss_mb(&output).unwrap_or(0.0))
    }

    /// Whether the device can reach `host`.
    pub async fn ping(&self, host: &str, count: u32) -> bool {
        self.shell(&format!("ping -c {count} {host}")).await.is_ok()
    }

    /// Copy a file from the device.
    pub async fn pull(&self, remote: &str, local: &str) -> Result<String, ConnectionError> {
        self.execute_args(
            vec!["pull".to_string(), remote.to_string(), local.to_string()],
            self.settings.retry_budget,
        )
        .await
    }

    /// Start a streaming adb process scoped to this device (logcat, monkey).
    pub fn spawn_stream(&self, args: &[&str]) -> Result<Child, ConnectionError> {
        let mut full_args = self.handle.scope_args();
        full_args.extend(args.iter().map(|a| a.to_string()));
        info!(
            device = %self.handle,
            command = %render_command(&self.settings.adb_path, &full_args),
            "Starting stream"
        );
        self.runner.spawn(&self.settings.adb_path, &full_args)
    }
}

/// Leading `N%` on the first line mentioning `package`.
fn parse_cpu_percent(output: &str, package: &str) -> Option<f64> {
    output
        .lines()
        .filter(|line| line.contains(package))
        .find_map(|line| {
            CPU_PERCENT
                .captures(line.trim())
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
        })
}

/// First integer on the TOTAL line (KB), converted to MB with two decimals.
fn parse_total_pss_mb(output: &str) -> Option<f64> {
    let kb: f64 = FIRST_INTEGER
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())?;
    Some((kb / 1024.0 * 100.0).round() / 100.0)
}
