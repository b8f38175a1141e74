//! Script actions: `.adb` files under the actions directory.
//!
//! Each non-empty line that does not start with `#` is one adb command,
//! run in order against the target device. `{key}` is replaced by the
//! call argument `key`; a missing argument fails the call before anything
//! runs.
//!
//! ```text
//! # open the settings screen and capture it
//! shell am start -a android.settings.SETTINGS
//! shell screencap -p /sdcard/{name}.png
//! pull /sdcard/{name}.png {dest}
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::actions::{ActionOutcome, ActionUnit, Args, target_device};
use crate::context::SessionContext;
use crate::error::ActionError;

/// File extension of script actions.
pub const SCRIPT_EXTENSION: &str = "adb";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Placeholder(String),
}

#[derive(Debug, Clone)]
struct Step {
    line: usize,
    segments: Vec<Segment>,
}

/// A parsed script action.
#[derive(Debug, Clone)]
pub struct ScriptAction {
    name: String,
    path: PathBuf,
    steps: Vec<Step>,
}

impl ScriptAction {
    /// Read and parse the script at `path`.
    pub async fn load(name: &str, path: &Path) -> Result<Self, ActionError> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ActionError::LoadFailed {
                name: name.to_string(),
                reason: format!("{}: {e}", path.display()),
            })?;
        Self::parse(name, path, &source).map_err(|reason| ActionError::LoadFailed {
            name: name.to_string(),
            reason: format!("{}: {reason}", path.display()),
        })
    }

    pub fn parse(name: &str, path: &Path, source: &str) -> Result<Self, String> {
        let mut steps = Vec::new();
        for (idx, raw) in source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let segments = parse_line(line).map_err(|e| format!("line {}: {e}", idx + 1))?;
            steps.push(Step {
                line: idx + 1,
                segments,
            });
        }
        if steps.is_empty() {
            return Err("script has no commands".to_string());
        }
        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            steps,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Placeholder keys in order of first use.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for step in &self.steps {
            for segment in &step.segments {
                if let Segment::Placeholder(key) = segment
                    && !keys.contains(&key.as_str())
                {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Substitute arguments into every step.
    fn render(&self, args: &Args) -> Result<Vec<(usize, String)>, ActionError> {
        self.steps
            .iter()
            .map(|step| {
                let mut command = String::new();
                for segment in &step.segments {
                    match segment {
                        Segment::Text(text) => command.push_str(text),
                        Segment::Placeholder(key) => {
                            let value = args.get(key).ok_or_else(|| ActionError::InvalidParameters {
                                name: self.name.clone(),
                                reason: format!("missing argument '{key}' (line {})", step.line),
                            })?;
                            command.push_str(&render_value(value));
                        }
                    }
                }
                Ok((step.line, command))
            })
            .collect()
    }
}

#[async_trait]
impl ActionUnit for ScriptAction {
    async fn run(&self, ctx: &SessionContext, args: &Args) -> Result<ActionOutcome, ActionError> {
        let commands = self.render(args)?;
        let adb = target_device(ctx, &self.name, args)?;

        let mut outputs = Vec::with_capacity(commands.len());
        for (line, command) in commands {
            match adb.run(&command).await {
                Ok(output) => outputs.push(Value::String(output)),
                Err(e) => {
                    warn!(
                        action = %self.name,
                        path = %self.path().display(),
                        line,
                        command = %command,
                        error = %e,
                        "Script step failed"
                    );
                    return Ok(ActionOutcome::Envelope {
                        status: false,
                        data: json!(outputs),
                        msg: format!("line {line}: {e}"),
                    });
                }
            }
        }

        info!(action = %self.name, steps = outputs.len(), "Script finished");
        Ok(ActionOutcome::success(json!(outputs)))
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_line(line: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut key = String::new();
                let mut closed = false;
                for k in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    key.push(k);
                }
                if !closed {
                    return Err("unclosed placeholder".to_string());
                }
                if key.is_empty() || !key.chars().all(|k| k.is_ascii_alphanumeric() || k == '_') {
                    return Err(format!("invalid placeholder '{{{key}}}'"));
                }
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Placeholder(key));
            }
            '}' => return Err("unmatched '}'".to_string()),
            other => text.push(other),
        }
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    Ok(segments)
}
