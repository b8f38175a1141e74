//! Test-only helpers: a scripted `CommandRunner` and an in-memory session.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::config::HarnessConfig;
use crate::context::{Session, SessionBuilder};
use crate::device::runner::{CommandOutput, CommandRunner, render_command};
use crate::error::ConnectionError;
use crate::report::MemoryReportSink;

struct Rule {
    pattern: String,
    responses: VecDeque<CommandOutput>,
}

/// Runner that answers by substring match on the rendered command line.
///
/// Unmatched commands succeed with empty output. Streaming commands run a
/// local `sh -c` script registered with [`ScriptedRunner::stream`].
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    streams: Mutex<Vec<(String, String)>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer commands containing `pattern` with `output`.
    pub fn respond(self, pattern: &str, output: CommandOutput) -> Self {
        self.respond_sequence(pattern, vec![output])
    }

    /// Answer with each output in turn; the last one repeats.
    pub fn respond_sequence(self, pattern: &str, outputs: Vec<CommandOutput>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                pattern: pattern.to_string(),
                responses: outputs.into(),
            });
        }
        self
    }

    /// Spawn `sh -c script` for streaming commands containing `pattern`.
    pub fn stream(self, pattern: &str, script: &str) -> Self {
        if let Ok(mut streams) = self.streams.lock() {
            streams.push((pattern.to_string(), script.to_string()));
        }
        self
    }

    /// Every command seen so far, rendered.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of commands containing `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }

    fn answer(&self, rendered: &str) -> CommandOutput {
        let Ok(mut rules) = self.rules.lock() else {
            return CommandOutput::ok("");
        };
        match rules.iter_mut().find(|r| rendered.contains(&r.pattern)) {
            Some(rule) if rule.responses.len() > 1 => rule.responses.pop_front().unwrap_or_default(),
            Some(rule) => rule.responses.front().cloned().unwrap_or_default(),
            None => CommandOutput::ok(""),
        }
    }

    fn record(&self, rendered: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(rendered.to_string());
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _timeout: Duration,
    ) -> Result<CommandOutput, ConnectionError> {
        let rendered = render_command(program, args);
        self.record(&rendered);
        Ok(self.answer(&rendered))
    }

    fn spawn(&self, program: &str, args: &[String]) -> Result<Child, ConnectionError> {
        let rendered = render_command(program, args);
        self.record(&rendered);
        let script = self
            .streams
            .lock()
            .ok()
            .and_then(|s| {
                s.iter()
                    .find(|(pattern, _)| rendered.contains(pattern))
                    .map(|(_, script)| script.clone())
            })
            .unwrap_or_else(|| "exit 0".to_string());

        Command::new("sh")
            .args(["-c", &script])
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ConnectionError::Spawn {
                command: rendered,
                source,
            })
    }
}

/// Configuration with one USB device named `phone` and fast retry timings.
pub fn test_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.adb_devices.push(crate::config::DeviceEntry {
        name: "phone".to_string(),
        serial: "R58M123ABC".to_string(),
    });
    config.connection.retry_pause_ms = 1;
    config.connection.settle_ms = 1;
    config.workers.join_timeout_ms = 2000;
    config
}

/// Builder rooted at `root` using `runner` and an in-memory report sink.
/// Add custom actions or workers before calling `build`.
pub fn builder_with(
    root: &Path,
    runner: Arc<ScriptedRunner>,
    config: HarnessConfig,
) -> (SessionBuilder, Arc<MemoryReportSink>) {
    let report = Arc::new(MemoryReportSink::new());
    let builder = Session::builder(root.to_path_buf(), config)
        .runner(runner)
        .report(report.clone());
    (builder, report)
}

/// Session from [`test_config`] with an in-memory report sink.
pub fn session_with(root: &Path, runner: Arc<ScriptedRunner>) -> (Session, Arc<MemoryReportSink>) {
    let (builder, report) = builder_with(root, runner, test_config());
    (builder.build(), report)
}
