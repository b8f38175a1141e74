//! Start-time parameters for a worker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::actions::Args;
use crate::error::WorkerError;
use crate::workers::alert::{AlertCallback, EscalationStrategy};

/// Parameters passed to `start(name, args)`.
///
/// Plain values live in a JSON map; the alert callback is carried
/// separately because it is not data.
#[derive(Clone, Default)]
pub struct WorkerArgs {
    values: Args,
    on_alert: Option<AlertCallback>,
}

impl std::fmt::Debug for WorkerArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerArgs")
            .field("values", &self.values)
            .field("on_alert", &self.on_alert.is_some())
            .finish()
    }
}

impl WorkerArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Args) -> Self {
        Self {
            values,
            on_alert: None,
        }
    }

    /// Add a parameter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Set the caller-supplied alert callback.
    pub fn on_alert<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_alert = Some(Arc::new(callback));
        self
    }

    pub fn alert_callback(&self) -> Option<&AlertCallback> {
        self.on_alert.as_ref()
    }

    pub fn values(&self) -> &Args {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Integer parameter; numeric strings are accepted too.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// A single string or a list of strings.
    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Required string parameter.
    pub fn require_str(&self, worker: &str, key: &str) -> Result<String, WorkerError> {
        self.get_str(key)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| WorkerError::InvalidParameters {
                name: worker.to_string(),
                reason: format!("missing required parameter '{key}'"),
            })
    }

    /// `interval` in seconds, falling back to `default` when missing or not
    /// positive. Non-finite or out-of-range values are rejected.
    pub fn interval(&self, worker: &str, default: Duration) -> Result<Duration, WorkerError> {
        let Some(secs) = self.get_f64("interval") else {
            return Ok(default);
        };
        if secs <= 0.0 {
            return Ok(default);
        }
        Duration::try_from_secs_f64(secs).map_err(|e| WorkerError::InvalidParameters {
            name: worker.to_string(),
            reason: format!("invalid interval {secs}: {e}"),
        })
    }

    /// The `hook_strategy` parameter. Unknown strings are rejected.
    pub fn hook_strategy(&self, worker: &str) -> Result<Option<EscalationStrategy>, WorkerError> {
        match self.get_str("hook_strategy") {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|reason| WorkerError::InvalidParameters {
                    name: worker.to_string(),
                    reason,
                }),
        }
    }
}
