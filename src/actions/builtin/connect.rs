//! Connect every configured network device.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::actions::{ActionOutcome, ActionUnit, Args};
use crate::context::SessionContext;
use crate::error::ActionError;

/// Issues `adb connect` for each network device in the pool. USB devices
/// report connected without a call. The envelope carries a name → bool map
/// plus the `adb devices` listing.
pub struct ConnectDevicesAction;

#[async_trait]
impl ActionUnit for ConnectDevicesAction {
    async fn run(&self, ctx: &SessionContext, _args: &Args) -> Result<ActionOutcome, ActionError> {
        let mut results = Map::new();
        let mut failed = Vec::new();

        for (name, connected) in ctx.devices().connect_all().await {
            if !connected {
                failed.push(name.clone());
            }
            results.insert(name, Value::Bool(connected));
        }

        let listing = ctx.adb().devices().await.unwrap_or_default();
        info!(devices = results.len(), failed = failed.len(), "Connect pass finished");

        Ok(ActionOutcome::Envelope {
            status: failed.is_empty(),
            data: json!({ "connected": results, "devices": listing }),
            msg: if failed.is_empty() {
                String::new()
            } else {
                format!("not connected: {}", failed.join(", "))
            },
        })
    }
}
