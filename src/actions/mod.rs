//! One-shot actions resolved by name.

pub mod builtin;
pub mod registry;
pub mod script;

pub use registry::{ActionRegistry, ActionSource};
pub use script::ScriptAction;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::SessionContext;
use crate::device::ConnectionManager;
use crate::error::ActionError;

/// Arguments passed to an action: a JSON object.
pub type Args = serde_json::Map<String, Value>;

/// A one-shot device operation.
#[async_trait]
pub trait ActionUnit: Send + Sync {
    async fn run(&self, ctx: &SessionContext, args: &Args) -> Result<ActionOutcome, ActionError>;
}

/// Builds an action when it is first run or reloaded.
pub type ActionFactory = Arc<dyn Fn() -> Result<Arc<dyn ActionUnit>, ActionError> + Send + Sync>;

/// Wrap a constructor as an `ActionFactory`.
pub fn action_factory<A, F>(build: F) -> ActionFactory
where
    A: ActionUnit + 'static,
    F: Fn() -> A + Send + Sync + 'static,
{
    Arc::new(move || Ok(Arc::new(build()) as Arc<dyn ActionUnit>))
}

/// What an action returns.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// A plain value. Falsy values (`false`, `null`) mean failure.
    Value(Value),
    /// A `{status, data, msg}` envelope.
    Envelope { status: bool, data: Value, msg: String },
}

impl ActionOutcome {
    pub fn success(data: Value) -> Self {
        Self::Envelope {
            status: true,
            data,
            msg: String::new(),
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self::Envelope {
            status: false,
            data: Value::Null,
            msg: msg.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            Self::Envelope { status, .. } => *status,
            Self::Value(Value::Null) | Self::Value(Value::Bool(false)) => false,
            Self::Value(_) => true,
        }
    }

    /// The payload: the value itself, or the envelope's `data`.
    pub fn data(&self) -> &Value {
        match self {
            Self::Value(v) => v,
            Self::Envelope { data, .. } => data,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Envelope { msg, .. } => msg,
            Self::Value(_) => "",
        }
    }

    /// JSON form: envelopes become `{"status", "data", "msg"}`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Envelope { status, data, msg } => serde_json::json!({
                "status": status,
                "data": data,
                "msg": msg,
            }),
        }
    }
}

impl From<Value> for ActionOutcome {
    /// Objects carrying a boolean `status` are read as envelopes.
    fn from(value: Value) -> Self {
        if let Value::Object(map) = &value
            && let Some(Value::Bool(status)) = map.get("status")
        {
            return Self::Envelope {
                status: *status,
                data: map.get("data").cloned().unwrap_or(Value::Null),
                msg: map
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            };
        }
        Self::Value(value)
    }
}

/// String argument, if present.
pub fn arg_str<'a>(args: &'a Args, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Device selected by the `device` argument, or the primary device.
pub fn target_device(
    ctx: &SessionContext,
    action: &str,
    args: &Args,
) -> Result<Arc<ConnectionManager>, ActionError> {
    ctx.devices()
        .resolve(arg_str(args, "device"))
        .map_err(|source| ActionError::Device {
            name: action.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn falsy_values_are_failures() {
        assert!(!ActionOutcome::Value(json!(false)).is_success());
        assert!(!ActionOutcome::Value(Value::Null).is_success());
        assert!(ActionOutcome::Value(json!("/tmp/shot.png")).is_success());
        assert!(ActionOutcome::Value(json!(true)).is_success());
    }

    #[test]
    fn envelope_from_json() {
        let outcome = ActionOutcome::from(json!({"status": false, "data": null, "msg": "no match"}));
        assert!(!outcome.is_success());
        assert_eq!(outcome.message(), "no match");

        let plain = ActionOutcome::from(json!({"status": "ok"}));
        assert!(matches!(plain, ActionOutcome::Value(_)));
    }

    #[test]
    fn envelope_to_json() {
        let outcome = ActionOutcome::success(json!([1, 2]));
        assert_eq!(outcome.to_json(), json!({"status": true, "data": [1, 2], "msg": ""}));
    }
}
