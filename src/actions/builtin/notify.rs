//! Feishu bot notification.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::actions::{ActionOutcome, ActionUnit, Args, arg_str};
use crate::context::SessionContext;
use crate::error::ActionError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends a text message to the configured Feishu webhook.
///
/// The text comes from the `message` argument, then the session's shared
/// `message` value, then a default summary. Returns `true` when Feishu
/// answers with `code == 0`.
pub struct NotifyAction {
    client: reqwest::Client,
}

impl NotifyAction {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn send(&self, webhook: &str, text: &str) -> Result<(), String> {
        let body = json!({
            "msg_type": "text",
            "content": { "text": text },
        });
        let response = self
            .client
            .post(webhook)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        let reply: Value = response
            .json()
            .await
            .map_err(|e| format!("{status}: unreadable reply: {e}"))?;
        match reply.get("code").and_then(Value::as_i64) {
            Some(0) => Ok(()),
            _ => Err(format!("{status}: {reply}")),
        }
    }
}

impl Default for NotifyAction {
    fn default() -> Self {
        Self::new()
    }
}

fn message_text(ctx: &SessionContext, args: &Args) -> String {
    if let Some(message) = arg_str(args, "message") {
        return message.to_string();
    }
    if let Some(Value::String(message)) = ctx.data().get("message")
        && !message.is_empty()
    {
        return message;
    }
    format!(
        "[{}]\nAutomated test run finished.\nPlease check the test report.",
        ctx.config().project_name
    )
}

#[async_trait]
impl ActionUnit for NotifyAction {
    async fn run(&self, ctx: &SessionContext, args: &Args) -> Result<ActionOutcome, ActionError> {
        let Some(webhook) = &ctx.config().notify.feishu_webhook else {
            warn!("Feishu webhook not configured, skipping notification");
            return Ok(ActionOutcome::Value(Value::Bool(false)));
        };

        let text = message_text(ctx, args);
        info!(chars = text.chars().count(), "Sending Feishu notification");
        match self.send(webhook.expose_secret(), &text).await {
            Ok(()) => {
                info!("Feishu notification sent");
                Ok(ActionOutcome::Value(Value::Bool(true)))
            }
            Err(reason) => {
                error!(reason = %reason, "Feishu notification failed");
                Ok(ActionOutcome::Value(Value::Bool(false)))
            }
        }
    }
}
