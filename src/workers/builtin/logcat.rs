//! Streams logcat to a file and alerts on keywords.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Local;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use crate::error::WorkerError;
use crate::workers::base::{WorkerContext, WorkerUnit};
use crate::workers::builtin::{LineStream, open_output};
use crate::workers::params::WorkerArgs;

pub struct LogcatMonitor {
    keywords: Vec<String>,
    filename: String,
    device: Option<String>,
    output: Option<(PathBuf, File)>,
}

impl LogcatMonitor {
    pub fn from_args(args: &WorkerArgs) -> Result<Self, WorkerError> {
        Ok(Self {
            keywords: args.get_str_list("keywords"),
            filename: args
                .get_str("filename")
                .map(str::to_string)
                .unwrap_or_else(|| format!("monitor_{}.log", Local::now().format("%H%M%S"))),
            device: args.get_str("device").map(str::to_string),
            output: None,
        })
    }

    fn matching_keyword(&self, line: &str) -> Option<&str> {
        self.keywords
            .iter()
            .find(|kw| line.contains(kw.as_str()))
            .map(String::as_str)
    }
}

#[async_trait]
impl WorkerUnit for LogcatMonitor {
    async fn working(&mut self, ctx: &WorkerContext) -> Result<(), WorkerError> {
        if self.output.is_none() {
            let (path, file) = open_output(ctx.session(), "logs", &self.filename).await?;
            info!(worker = %ctx.name(), path = %path.display(), keywords = ?self.keywords, "Monitoring logcat");
            ctx.set_output_artifact(path.clone());
            self.output = Some((path, file));
        }

        let adb = ctx.session().devices().resolve(self.device.as_deref())?;
        let mut child = adb.spawn_stream(&["logcat", "-v", "time"])?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::crash(ctx.name(), "logcat has no stdout"))?;
        ctx.adopt_process(child);

        let mut lines = LineStream::new(stdout);
        while let Some(line) = lines.next_line(ctx).await? {
            if let Some((_, file)) = self.output.as_mut() {
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
                file.flush().await?;
            }

            if let Some(keyword) = self.matching_keyword(&line) {
                error!(worker = %ctx.name(), keyword, "Keyword found in logcat");
                ctx.alert(&line).await;
            }
        }

        ctx.release_processes();
        if ctx.is_stopped() {
            return Ok(());
        }
        Err(WorkerError::crash(ctx.name(), "logcat stream ended"))
    }
}
