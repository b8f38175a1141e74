//! One-shot logcat operations: clear, dump and find.

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;
use tracing::{info, warn};

use crate::actions::{ActionOutcome, ActionUnit, Args, arg_str, target_device};
use crate::context::SessionContext;
use crate::error::{ActionError, ConnectionError};

const NAME: &str = "logcat_ops";

/// `action` selects the operation (default `find`):
/// - `clear`: empty the device log buffer, returns `true`
/// - `dump`: save the buffer to `outputs/logs/<filename>`, returns the path
/// - `find`: envelope whose status says whether `keyword` is in the buffer
pub struct LogcatOpsAction;

#[async_trait]
impl ActionUnit for LogcatOpsAction {
    async fn run(&self, ctx: &SessionContext, args: &Args) -> Result<ActionOutcome, ActionError> {
        let adb = target_device(ctx, NAME, args)?;
        let op = arg_str(args, "action").unwrap_or("find");
        info!(device = %adb.handle(), op, "Logcat operation");

        let device_error = |source: ConnectionError| ActionError::Device {
            name: NAME.to_string(),
            source,
        };

        match op {
            "clear" => {
                adb.run("logcat -c").await.map_err(device_error)?;
                info!("Logcat buffer cleared");
                Ok(ActionOutcome::Value(Value::Bool(true)))
            }
            "dump" => {
                let filename = arg_str(args, "filename")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("logcat_{}.txt", Local::now().format("%H%M%S")));
                let content = adb.run("logcat -d").await.map_err(device_error)?;

                let dir = ctx.output_dir("logs");
                let path = dir.join(&filename);
                let written = async {
                    tokio::fs::create_dir_all(&dir).await?;
                    tokio::fs::write(&path, content).await
                }
                .await;
                written.map_err(|e| ActionError::Failed {
                    name: NAME.to_string(),
                    reason: format!("{}: {e}", path.display()),
                })?;

                info!(path = %path.display(), "Logcat saved");
                Ok(ActionOutcome::Value(Value::String(path.display().to_string())))
            }
            "find" => {
                let keyword = arg_str(args, "keyword").ok_or_else(|| ActionError::InvalidParameters {
                    name: NAME.to_string(),
                    reason: "find requires 'keyword'".to_string(),
                })?;
                let content = adb.run("logcat -d").await.map_err(device_error)?;
                if content.contains(keyword) {
                    info!(keyword, "Keyword found in logcat");
                    Ok(ActionOutcome::success(Value::Null))
                } else {
                    warn!(keyword, "Keyword not found in logcat");
                    Ok(ActionOutcome::failure(format!("'{keyword}' not found")))
                }
            }
            other => {
                warn!(op = other, "Unsupported logcat operation");
                Ok(ActionOutcome::failure(format!("unsupported operation '{other}'")))
            }
        }
    }
}
