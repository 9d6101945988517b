//! listedit - bulk-edit a media list through the request governor.
//!
//! Reads a plan file (entries + edit), sends the resulting mutations through a
//! rate-limited, retrying [`RequestGovernor`] and prints the final report as
//! JSON on stdout. Logs go to stderr. Ctrl-C stops the governor: queued
//! mutations are abandoned, in-flight ones finish.

mod plan_file;

use anyhow::{Context, Result};
use clap::Parser;
use listedit_core::config::NetworkConfig;
use listedit_core::{bulk, BulkDriver, GovernorConfig, GovernorConfigUpdate, GraphQlClient, RequestGovernor};
use plan_file::PlanFile;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "listedit")]
#[command(about = "Rate-limited bulk editor for media lists")]
struct Args {
    /// Plan file (JSON) with the entries and the edit to apply
    #[arg(short, long)]
    plan: PathBuf,

    /// GraphQL endpoint of the API proxy
    #[arg(long)]
    endpoint: Option<String>,

    /// Bearer token forwarded to the API
    #[arg(long, env = NetworkConfig::TOKEN_ENV_VAR, hide_env_values = true)]
    token: Option<String>,

    /// Requests per second (overrides the plan file)
    #[arg(long)]
    rate: Option<f64>,

    /// Concurrent requests (overrides the plan file)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Retries per request (overrides the plan file)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Report failed batches instead of retrying their entries one by one
    #[arg(long)]
    no_fallback: bool,

    /// Print the request plan and exit without sending anything
    #[arg(long)]
    dry_run: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn governor_overrides(&self) -> GovernorConfigUpdate {
        GovernorConfigUpdate {
            max_requests_per_second: self.rate,
            max_concurrent_requests: self.concurrency,
            max_retries: self.max_retries,
            ..Default::default()
        }
    }
}

fn init_logging(debug: bool, json: bool) {
    let log_level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.with_thread_ids(false).compact().init();
    }
}

/// Defaults, then the plan file's overrides, then command-line flags.
fn resolve_config(plan: &PlanFile, args: &Args) -> Result<GovernorConfig> {
    let config = GovernorConfig::default()
        .merged(&plan.governor)
        .context("Invalid governor settings in plan file")?
        .merged(&args.governor_overrides())
        .context("Invalid governor settings on command line")?;
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.debug, args.json_logs);

    let plan_file = PlanFile::load(&args.plan)?;
    let plan = bulk::plan(&plan_file.entries, &plan_file.edit, plan_file.max_batch_size);
    info!(
        "Loaded {} entries: {} to update in {} requests, {} unchanged",
        plan_file.entries.len(),
        plan.entries_to_update(),
        plan.request_count(),
        plan.unchanged.len()
    );

    if args.dry_run {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(ExitCode::SUCCESS);
    }
    if plan.is_empty() {
        info!("Nothing to update");
        return Ok(ExitCode::SUCCESS);
    }

    let config = resolve_config(&plan_file, &args)?;
    let endpoint = args
        .endpoint
        .clone()
        .unwrap_or_else(|| NetworkConfig::DEFAULT_ENDPOINT.to_string());
    let mut client = GraphQlClient::new(endpoint)?;
    match args.token.clone() {
        Some(token) => client = client.with_token(token),
        None => warn!(
            "No API token given (--token or {}); relying on the proxy session",
            NetworkConfig::TOKEN_ENV_VAR
        ),
    }

    let governor = RequestGovernor::new(config)?;
    let driver = BulkDriver::new(governor.clone(), Arc::new(client)).with_fallback(!args.no_fallback);

    let mut progress = driver.subscribe();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = progress.borrow_and_update().clone();
            debug!("Progress: {}/{} done ({} failed)", p.completed(), p.total, p.failed);
        }
    });

    let stopper = governor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; abandoning queued requests");
            stopper.stop();
        }
    });

    let report = driver.run(plan).await;
    for line in report.failure_lines() {
        warn!("{}", line);
    }
    info!("{}", report.summary());
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
