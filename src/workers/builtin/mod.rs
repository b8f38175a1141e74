//! Built-in workers.

mod heartbeat;
mod logcat;
mod monkey;
mod perf;

pub use heartbeat::HeartbeatWorker;
pub use logcat::LogcatMonitor;
pub use monkey::MonkeyWorker;
pub use perf::PerfSampler;

use std::io;
use std::path::PathBuf;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStdout;

use crate::context::SessionContext;
use crate::workers::base::WorkerContext;
use crate::workers::registry::{WorkerRegistry, worker_factory};

/// Register every built-in worker.
pub fn register_all(registry: &WorkerRegistry) {
    registry.register_sync("perf_sampler", worker_factory(PerfSampler::from_args));
    registry.register_sync("logcat_monitor", worker_factory(LogcatMonitor::from_args));
    registry.register_sync("monkey", worker_factory(MonkeyWorker::from_args));
    registry.register_sync("heartbeat", worker_factory(HeartbeatWorker::from_args));
}

/// Open `outputs/<sub>/<filename>` for appending, creating directories.
pub(crate) async fn open_output(
    session: &SessionContext,
    sub: &str,
    filename: &str,
) -> io::Result<(PathBuf, File)> {
    let dir = session.output_dir(sub);
    fs::create_dir_all(&dir).await?;
    let path = dir.join(filename);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    Ok((path, file))
}

/// Line reader over a streaming child's stdout.
///
/// Invalid UTF-8 is replaced rather than rejected; device logs are not
/// always clean.
pub(crate) struct LineStream {
    reader: BufReader<ChildStdout>,
    buf: Vec<u8>,
}

impl LineStream {
    pub fn new(stdout: ChildStdout) -> Self {
        Self {
            reader: BufReader::new(stdout),
            buf: Vec::with_capacity(256),
        }
    }

    /// Next line without its terminator. `None` at end of stream or once
    /// the worker is stopped.
    pub async fn next_line(&mut self, ctx: &WorkerContext) -> io::Result<Option<String>> {
        self.buf.clear();
        let read = tokio::select! {
            _ = ctx.cancelled() => return Ok(None),
            read = self.reader.read_until(b'\n', &mut self.buf) => read?,
        };
        if read == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.buf);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}
