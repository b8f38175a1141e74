//! Command-line entry point.
//!
//! Runs one action or watches one worker against the devices in
//! `<root>/config.yaml`.

use std::path::PathBuf;
use std::time::Duration;

use adb_harness::actions::Args;
use adb_harness::config::{HarnessConfig, resolve_root};
use adb_harness::context::{OUTPUTS_DIR, Session};
use adb_harness::logging;
use adb_harness::workers::{StartOutcome, WorkerArgs};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "adb-harness", version, about = "Android device test harness")]
struct Cli {
    /// Session root holding config.yaml, actions/ and outputs/.
    #[arg(long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one action.
    Run {
        action: String,
        /// Arguments as key=value; values are parsed as JSON when possible.
        #[arg(value_parser = parse_pair)]
        args: Vec<(String, Value)>,
    },
    /// Start a worker, let it run for a while, then stop it.
    Watch {
        worker: String,
        seconds: u64,
        #[arg(value_parser = parse_pair)]
        args: Vec<(String, Value)>,
    },
    /// List registered actions and workers.
    List,
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the session ended cleanly.
async fn run() -> Result<bool> {
    let cli = Cli::parse();
    let root = cli.root.unwrap_or_else(resolve_root);
    let config = HarnessConfig::load(&root).context("load configuration")?;
    let _guard = logging::init(&root.join(OUTPUTS_DIR).join("logs"), &config.logging)
        .context("initialize logging")?;

    let session = Session::builder(root, config).build();
    session.context().devices().connect_all().await;
    let clean = match cli.command {
        Command::Run { action, args } => cmd_run(&session, &action, args).await?,
        Command::Watch {
            worker,
            seconds,
            args,
        } => cmd_watch(&session, &worker, seconds, args).await?,
        Command::List => {
            cmd_list(&session).await;
            true
        }
    };
    session.shutdown().await;

    if session.data().has_crash() {
        tracing::error!("Session flagged as crashed");
        return Ok(false);
    }
    Ok(clean)
}

async fn cmd_run(session: &Session, action: &str, pairs: Vec<(String, Value)>) -> Result<bool> {
    let args: Args = pairs.into_iter().collect();
    let outcome = session
        .run(action, args)
        .await
        .with_context(|| format!("run action {action}"))?;
    println!("{}", serde_json::to_string_pretty(&outcome.to_json())?);
    Ok(outcome.is_success())
}

async fn cmd_watch(
    session: &Session,
    worker: &str,
    seconds: u64,
    pairs: Vec<(String, Value)>,
) -> Result<bool> {
    let args = WorkerArgs::from_map(pairs.into_iter().collect());
    match session
        .start(worker, args)
        .await
        .with_context(|| format!("start worker {worker}"))?
    {
        StartOutcome::Started => {}
        StartOutcome::AlreadyRunning => bail!("worker {worker} is already running"),
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    match session.stop(worker).await {
        Some(path) => println!("{}", path.display()),
        None => println!("(no artifact)"),
    }
    Ok(true)
}

async fn cmd_list(session: &Session) {
    println!("devices:");
    for name in session.context().devices().names() {
        println!("  {name}");
    }
    println!("actions:");
    for name in session.context().actions().list().await {
        println!("  {name}");
    }
    println!("workers:");
    for name in session.workers().registry().list().await {
        println!("  {name}");
    }
}

fn parse_pair(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
