//! Alert escalation strategies.
//!
//! A worker's `alert()` fans out to the caller's callback (if any) and then,
//! independently, to the strategy named by its `hook_strategy` parameter.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Local;
use serde_json::json;
use tracing::{error, info, warn};

use crate::actions::Args;
use crate::context::SessionContext;

/// Caller-supplied alert hook.
pub type AlertCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Built-in escalation applied on every alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationStrategy {
    /// Set the session's `has_crash` flag.
    Stop,
    /// Run the `screenshot` action.
    Screenshot,
    /// Set the session's `soft_failure` flag.
    Mark,
}

impl FromStr for EscalationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop" => Ok(Self::Stop),
            "screenshot" => Ok(Self::Screenshot),
            "mark" => Ok(Self::Mark),
            other => Err(format!(
                "unknown hook_strategy '{other}' (expected stop, screenshot or mark)"
            )),
        }
    }
}

impl std::fmt::Display for EscalationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stop => "stop",
            Self::Screenshot => "screenshot",
            Self::Mark => "mark",
        };
        write!(f, "{s}")
    }
}

/// Apply `strategy` for an alert raised by `worker`. Never fails.
pub async fn escalate(
    session: &SessionContext,
    strategy: EscalationStrategy,
    worker: &str,
    message: &str,
) {
    match strategy {
        EscalationStrategy::Stop => {
            error!(worker, message, "Critical alert, marking session as crashed");
            session.data().mark_crash();
        }
        EscalationStrategy::Mark => {
            warn!(worker, message, "Alert marked as soft failure");
            session.data().mark_soft_failure();
        }
        EscalationStrategy::Screenshot => {
            let mut args = Args::new();
            args.insert(
                "filename".to_string(),
                json!(format!("alert_{worker}_{}", Local::now().format("%Y%m%d_%H%M%S"))),
            );
            match session.actions().run(session, "screenshot", &args, false).await {
                Ok(outcome) if outcome.is_success() => {
                    info!(worker, "Alert screenshot captured");
                }
                Ok(outcome) => {
                    warn!(worker, message = %outcome.message(), "Alert screenshot failed");
                }
                Err(e) => {
                    warn!(worker, error = %e, "Alert screenshot failed");
                }
            }
        }
    }
}

/// Invoke a callback, containing any panic it raises.
pub(crate) fn notify_callback(callback: &AlertCallback, worker: &str, message: &str) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(message)));
    if result.is_err() {
        error!(worker, "Alert callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strategies_case_insensitively() {
        assert_eq!("stop".parse::<EscalationStrategy>().unwrap(), EscalationStrategy::Stop);
        assert_eq!(" Screenshot ".parse::<EscalationStrategy>().unwrap(), EscalationStrategy::Screenshot);
        assert_eq!("MARK".parse::<EscalationStrategy>().unwrap(), EscalationStrategy::Mark);
        assert!("halt".parse::<EscalationStrategy>().is_err());
    }

    #[test]
    fn panicking_callback_is_contained() {
        let callback: AlertCallback = Arc::new(|_: &str| panic!("boom"));
        notify_callback(&callback, "w", "msg");
    }
}
