//! Device screenshot, pulled locally and attached to the report.

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::actions::{ActionOutcome, ActionUnit, Args, arg_str, target_device};
use crate::context::SessionContext;
use crate::error::ActionError;
use crate::report::AttachmentKind;

const REMOTE_TMP: &str = "/sdcard/tmp_screenshot.png";

/// Captures a PNG into `outputs/screenshots/` and returns its local path,
/// or `false` when the capture fails.
pub struct ScreenshotAction;

#[async_trait]
impl ActionUnit for ScreenshotAction {
    async fn run(&self, ctx: &SessionContext, args: &Args) -> Result<ActionOutcome, ActionError> {
        let adb = target_device(ctx, "screenshot", args)?;

        let mut filename = arg_str(args, "filename")
            .map(str::to_string)
            .unwrap_or_else(|| format!("screenshot_{}", Local::now().format("%Y%m%d_%H%M%S")));
        if !filename.ends_with(".png") {
            filename.push_str(".png");
        }

        let dir = ctx.output_dir("screenshots");
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ActionError::Failed {
                name: "screenshot".to_string(),
                reason: e.to_string(),
            })?;
        let local = dir.join(&filename);
        let local_str = local.display().to_string();

        info!(device = %adb.handle(), path = %local_str, "Taking screenshot");
        let captured = async {
            adb.shell(&format!("screencap -p {REMOTE_TMP}")).await?;
            adb.pull(REMOTE_TMP, &local_str).await?;
            adb.shell(&format!("rm {REMOTE_TMP}")).await
        }
        .await;
        if let Err(e) = captured {
            error!(device = %adb.handle(), error = %e, "Screenshot failed");
            return Ok(ActionOutcome::Value(Value::Bool(false)));
        }

        let bytes = match tokio::fs::read(&local).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(path = %local_str, error = %e, "Screenshot file was not produced");
                return Ok(ActionOutcome::Value(Value::Bool(false)));
            }
        };
        if let Err(e) = ctx
            .report()
            .attach_bytes(&format!("screenshot_{filename}"), AttachmentKind::Png, bytes)
            .await
        {
            warn!(error = %e, "Failed to attach screenshot");
        }

        info!(path = %local_str, "Screenshot saved");
        Ok(ActionOutcome::Value(Value::String(local_str)))
    }
}
