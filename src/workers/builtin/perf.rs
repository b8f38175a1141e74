//! CPU and memory sampler for one package.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Local;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::WorkerError;
use crate::workers::base::{WorkerContext, WorkerUnit};
use crate::workers::builtin::open_output;
use crate::workers::params::WorkerArgs;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_MEM_LIMIT_MB: f64 = 500.0;
const CSV_HEADER: &str = "timestamp_ms,time,cpu_percent,memory_pss_mb\n";

/// Writes one CSV row per `working()` call under `outputs/perf_data/`.
pub struct PerfSampler {
    package: String,
    interval: Duration,
    mem_limit_mb: f64,
    filename: String,
    device: Option<String>,
    output: Option<(PathBuf, File)>,
}

impl PerfSampler {
    pub fn from_args(args: &WorkerArgs) -> Result<Self, WorkerError> {
        let package = args.require_str("perf_sampler", "package_name")?;
        let filename = args.get_str("filename").map(str::to_string).unwrap_or_else(|| {
            format!("perf_{package}_{}.csv", Local::now().format("%H%M%S"))
        });
        Ok(Self {
            interval: args.interval("perf_sampler", DEFAULT_INTERVAL)?,
            mem_limit_mb: args.get_f64("mem_limit").unwrap_or(DEFAULT_MEM_LIMIT_MB),
            device: args.get_str("device").map(str::to_string),
            package,
            filename,
            output: None,
        })
    }

    async fn output(&mut self, ctx: &WorkerContext) -> Result<&mut File, WorkerError> {
        if self.output.is_none() {
            let (path, mut file) = open_output(ctx.session(), "perf_data", &self.filename).await?;
            if file.metadata().await?.len() == 0 {
                file.write_all(CSV_HEADER.as_bytes()).await?;
            }
            info!(worker = %ctx.name(), package = %self.package, path = %path.display(), "Sampling performance");
            ctx.set_output_artifact(path.clone());
            self.output = Some((path, file));
        }
        match self.output.as_mut() {
            Some((_, file)) => Ok(file),
            None => Err(WorkerError::crash(ctx.name(), "output file unavailable")),
        }
    }
}

#[async_trait]
impl WorkerUnit for PerfSampler {
    async fn working(&mut self, ctx: &WorkerContext) -> Result<(), WorkerError> {
        let started = Instant::now();
        let adb = ctx.session().devices().resolve(self.device.as_deref())?;

        let cpu = adb.cpu_usage(&self.package).await?;
        let mem = adb.memory_pss_mb(&self.package).await?;
        let now = Local::now();

        let row = format!(
            "{},{},{cpu},{mem}\n",
            now.timestamp_millis(),
            now.format("%H:%M:%S")
        );
        let file = self.output(ctx).await?;
        file.write_all(row.as_bytes()).await?;
        file.flush().await?;

        if mem > self.mem_limit_mb {
            warn!(worker = %ctx.name(), mem, limit = self.mem_limit_mb, "Memory above limit");
            ctx.alert(&format!("Memory Leak: {mem}MB")).await;
        }

        let remaining = self.interval.saturating_sub(started.elapsed());
        ctx.interruptible_sleep(remaining).await;
        Ok(())
    }

    async fn on_stop(&mut self, ctx: &WorkerContext) {
        if let Some((path, mut file)) = self.output.take() {
            if let Err(e) = file.flush().await {
                warn!(worker = %ctx.name(), path = %path.display(), error = %e, "Failed to flush samples");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_name_is_required() {
        assert!(matches!(
            PerfSampler::from_args(&WorkerArgs::new()),
            Err(WorkerError::InvalidParameters { .. })
        ));
    }

    #[test]
    fn defaults_apply() {
        let sampler = PerfSampler::from_args(&WorkerArgs::new().with("package_name", "com.example.app")).unwrap();
        assert_eq!(sampler.interval, DEFAULT_INTERVAL);
        assert_eq!(sampler.mem_limit_mb, DEFAULT_MEM_LIMIT_MB);
        assert!(sampler.filename.starts_with("perf_com.example.app_"));
        assert!(sampler.filename.ends_with(".csv"));
    }
}
