//! Periodic device health check.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, warn};

use crate::actions::Args;
use crate::error::WorkerError;
use crate::workers::base::{WorkerContext, WorkerUnit};
use crate::workers::params::WorkerArgs;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_PING_HOST: &str = "8.8.8.8";

/// Checks every pooled device, reconnecting offline ones and pinging online
/// ones. Problems are combined into one alert per round.
pub struct HeartbeatWorker {
    interval: Duration,
    check_network: bool,
    ping_host: String,
}

impl HeartbeatWorker {
    pub fn from_args(args: &WorkerArgs) -> Result<Self, WorkerError> {
        Ok(Self {
            interval: args.interval("heartbeat", DEFAULT_INTERVAL)?,
            check_network: args.get_bool("check_network").unwrap_or(true),
            ping_host: args
                .get_str("ping_host")
                .unwrap_or(DEFAULT_PING_HOST)
                .to_string(),
        })
    }
}

#[async_trait]
impl WorkerUnit for HeartbeatWorker {
    async fn working(&mut self, ctx: &WorkerContext) -> Result<(), WorkerError> {
        let session = ctx.session();
        let mut devices: Vec<_> = session
            .devices()
            .iter()
            .map(|(name, adb)| (name.to_string(), adb.clone()))
            .collect();
        if devices.is_empty() {
            devices.push(("default".to_string(), session.adb()));
        }

        let mut problems = Vec::new();
        for (name, adb) in devices {
            if ctx.is_stopped() {
                return Ok(());
            }
            let state = adb.get_state().await;
            if state != "device" {
                let msg = format!("Device [{name}] offline (state: {state})");
                error!(worker = %ctx.name(), device = %name, state = %state, "Device offline, reconnecting");
                problems.push(msg);
                adb.reconnect().await;
            } else if self.check_network && !adb.ping(&self.ping_host, 1).await {
                warn!(worker = %ctx.name(), device = %name, host = %self.ping_host, "Device network unreachable");
                problems.push(format!("Device [{name}] network unreachable"));
            }
        }

        if !problems.is_empty() {
            let text = format!("Environment alert\n{}", problems.join("\n"));
            ctx.alert(&text).await;

            if session.config().notify.feishu_webhook.is_some() {
                let mut args = Args::new();
                args.insert("message".to_string(), json!(text));
                if let Err(e) = session.actions().run(session, "notify", &args, false).await {
                    warn!(worker = %ctx.name(), error = %e, "Failed to send heartbeat notification");
                }
            }
        }

        info!(worker = %ctx.name(), problems = problems.len(), "Heartbeat round finished");
        ctx.interruptible_sleep(self.interval).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let worker = HeartbeatWorker::from_args(&WorkerArgs::new()).unwrap();
        assert_eq!(worker.interval, DEFAULT_INTERVAL);
        assert!(worker.check_network);
        assert_eq!(worker.ping_host, DEFAULT_PING_HOST);
    }

    #[test]
    fn network_check_can_be_disabled() {
        let worker = HeartbeatWorker::from_args(
            &WorkerArgs::new().with("check_network", false).with("interval", 10),
        )
        .unwrap();
        assert!(!worker.check_network);
        assert_eq!(worker.interval, Duration::from_secs(10));
    }
}
