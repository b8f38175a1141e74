//! Monkey stress runner with timestamped logs.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Local;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::device::ConnectionManager;
use crate::error::WorkerError;
use crate::workers::base::{WorkerContext, WorkerUnit};
use crate::workers::builtin::{LineStream, open_output};
use crate::workers::params::WorkerArgs;

const DEFAULT_COUNT: u64 = 1_000_000;
const DEFAULT_THROTTLE_MS: u64 = 300;
const MONKEY_PROCESS: &str = "com.android.commands.monkey";
const ALERT_MARKERS: &[&str] = &["// CRASH:", "// NOT RESPONDING:"];

pub struct MonkeyWorker {
    package: String,
    count: u64,
    throttle_ms: u64,
    seed: i64,
    device: Option<String>,
    output: Option<(PathBuf, File)>,
}

impl MonkeyWorker {
    pub fn from_args(args: &WorkerArgs) -> Result<Self, WorkerError> {
        let package = args.require_str("monkey", "package_name")?;
        let seed = match args.get("seed") {
            Some(v) => v
                .as_i64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| WorkerError::InvalidParameters {
                    name: "monkey".to_string(),
                    reason: format!("seed must be an integer, got {v}"),
                })?,
            None => i64::from(rand::random::<u32>()),
        };
        Ok(Self {
            count: args.get_u64("count").unwrap_or(DEFAULT_COUNT),
            throttle_ms: args.get_u64("throttle").unwrap_or(DEFAULT_THROTTLE_MS),
            device: args.get_str("device").map(str::to_string),
            package,
            seed,
            output: None,
        })
    }

    fn command(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "shell".into(),
            "monkey".into(),
            "-p".into(),
            self.package.clone(),
            "--throttle".into(),
            self.throttle_ms.to_string(),
            "-s".into(),
            self.seed.to_string(),
        ];
        args.extend(
            [
                "--ignore-crashes",
                "--ignore-timeouts",
                "--ignore-security-exceptions",
                "-v",
                "-v",
                "-v",
            ]
            .map(String::from),
        );
        args.push(self.count.to_string());
        args
    }

    async fn kill_remote_monkey(adb: &ConnectionManager) {
        let listing = match adb.shell_once(&format!("ps -ef | grep {MONKEY_PROCESS}")).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(error = %e, "Could not list remote monkey processes");
                return;
            }
        };
        let Some(pid) = monkey_pid(&listing) else {
            info!("No remote monkey process left");
            return;
        };
        match adb.shell_once(&format!("kill {pid}")).await {
            Ok(_) => info!(pid, "Killed remote monkey"),
            Err(e) => warn!(pid, error = %e, "Failed to kill remote monkey"),
        }
    }
}

/// PID column of the first `ps` line running monkey, skipping the grep itself.
fn monkey_pid(listing: &str) -> Option<&str> {
    listing
        .lines()
        .filter(|line| line.contains(MONKEY_PROCESS) && !line.contains("grep"))
        .find_map(|line| line.split_whitespace().nth(1))
        .filter(|pid| pid.chars().all(|c| c.is_ascii_digit()))
}

fn is_alert_line(line: &str) -> bool {
    ALERT_MARKERS.iter().any(|m| line.contains(m))
}

#[async_trait]
impl WorkerUnit for MonkeyWorker {
    async fn working(&mut self, ctx: &WorkerContext) -> Result<(), WorkerError> {
        if self.output.is_none() {
            let filename = format!(
                "monkey_{}_{}.log",
                self.package,
                Local::now().format("%Y%m%d_%H%M%S")
            );
            let (path, file) = open_output(ctx.session(), "monkey_logs", &filename).await?;
            info!(worker = %ctx.name(), package = %self.package, path = %path.display(), "Starting monkey");
            ctx.set_output_artifact(path.clone());
            self.output = Some((path, file));
        }

        let adb = ctx.session().devices().resolve(self.device.as_deref())?;
        let command = self.command();
        let refs: Vec<&str> = command.iter().map(String::as_str).collect();
        let mut child = adb.spawn_stream(&refs)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::crash(ctx.name(), "monkey has no stdout"))?;
        ctx.adopt_process(child);

        if let Some((_, file)) = self.output.as_mut() {
            let header = format!(
                "Start Time: {}\nCommand: adb {}\n{}\n",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                command.join(" "),
                "-".repeat(50)
            );
            file.write_all(header.as_bytes()).await?;
        }

        let mut lines = LineStream::new(stdout);
        while let Some(line) = lines.next_line(ctx).await? {
            if let Some((_, file)) = self.output.as_mut() {
                let stamped = format!("[{}] {line}\n", Local::now().format("%Y-%m-%d %H:%M:%S"));
                file.write_all(stamped.as_bytes()).await?;
            }
            if is_alert_line(&line) {
                error!(worker = %ctx.name(), line = %line.trim(), "Monkey reported a failure");
                ctx.alert(&line).await;
            }
        }

        if let Some((_, file)) = self.output.as_mut() {
            file.flush().await?;
        }
        ctx.release_processes();
        if !ctx.is_stopped() {
            info!(worker = %ctx.name(), "Monkey run finished");
        }
        Ok(())
    }

    async fn on_stop(&mut self, ctx: &WorkerContext) {
        if let Some((path, mut file)) = self.output.take()
            && let Err(e) = file.flush().await
        {
            warn!(worker = %ctx.name(), path = %path.display(), error = %e, "Failed to flush monkey log");
        }
        match ctx.session().devices().resolve(self.device.as_deref()) {
            Ok(adb) => Self::kill_remote_monkey(&adb).await,
            Err(e) => warn!(worker = %ctx.name(), error = %e, "Cannot clean up remote monkey"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_monkey_command() {
        let worker = MonkeyWorker::from_args(
            &WorkerArgs::new()
                .with("package_name", "com.example.app")
                .with("count", 500)
                .with("seed", 42),
        )
        .unwrap();
        assert_eq!(
            worker.command().join(" "),
            "shell monkey -p com.example.app --throttle 300 -s 42 \
             --ignore-crashes --ignore-timeouts --ignore-security-exceptions -v -v -v 500"
        );
    }

    #[test]
    fn rejects_non_integer_seed() {
        let args = WorkerArgs::new()
            .with("package_name", "com.example.app")
            .with("seed", "abc");
        assert!(MonkeyWorker::from_args(&args).is_err());
    }

    #[test]
    fn finds_monkey_pid() {
        let listing = "shell  4321  1 0 10:00 ? 00:00:01 com.android.commands.monkey\n\
                       shell  4400  1 0 10:00 ? 00:00:00 grep com.android.commands.monkey";
        assert_eq!(monkey_pid(listing), Some("4321"));
        assert_eq!(monkey_pid("shell 4400 1 0 grep com.android.commands.monkey"), None);
    }

    #[test]
    fn detects_crash_markers() {
        assert!(is_alert_line("// CRASH: com.example.app (pid 1234)"));
        assert!(is_alert_line("// NOT RESPONDING: com.example.app"));
        assert!(!is_alert_line(":Sending Touch (ACTION_DOWN)"));
    }
}
