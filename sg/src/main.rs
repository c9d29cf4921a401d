//! Slotgate CLI entry point

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use slotgate::cli::{Cli, Command, OutputFormat, get_log_path};
use slotgate::{Config, ExponentialBackoff, Priority, RateLimitedClient, RunnerStats, Session};

/// Attempts per request before a retryable error is reported
const MAX_ATTEMPTS: u32 = 3;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Logging isn't initialized yet, so nothing is traced here until the end
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Probe {
            url,
            count,
            max_rps,
            priority,
            format,
        } => {
            debug!(%url, count, ?max_rps, %priority, "main: matched Probe command");
            cmd_probe(&config, &url, count, max_rps, priority, format).await
        }
        Command::Config => {
            debug!("main: matched Config command");
            cmd_config(&config)
        }
    }
}

/// Outcome of a probe run
#[derive(Debug, Default, Serialize)]
struct ProbeReport {
    url: String,
    priority: Priority,
    requests: usize,
    succeeded: usize,
    failed: usize,
    /// Response count per HTTP status
    statuses: BTreeMap<u16, usize>,
    errors: Vec<String>,
    rps: u32,
    max_rps: u32,
    bytes_downloaded: u64,
    bytes_uploaded: u64,
    elapsed_ms: u128,
    runner: RunnerStats,
}

enum ProbeOutcome {
    Status(u16),
    Failed(String),
}

/// Fan `count` GETs through one session
async fn cmd_probe(
    config: &Config,
    url: &str,
    count: usize,
    max_rps: Option<u32>,
    priority: Priority,
    format: OutputFormat,
) -> Result<()> {
    debug!(%url, count, "cmd_probe: called");
    let client = RateLimitedClient::from_config(&config.client).context("Failed to build HTTP client")?;
    if let Some(max_rps) = max_rps {
        client.set_max_rps(max_rps);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("cmd_probe: interrupted");
                cancel.cancel();
            }
        }
    });

    let session = Arc::new(Session::new(cancel.clone(), client));
    let started = Instant::now();

    let probes = (0..count).map(|n| {
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        let url = url.to_string();
        let max_secs = config.backoff.max_secs;
        async move { probe_once(&session, &url, n, priority, max_secs, &cancel).await }
    });
    let outcomes = futures::future::join_all(probes).await;

    let client = session.client();
    let mut report = ProbeReport {
        url: url.to_string(),
        priority,
        requests: count,
        rps: client.rps(),
        max_rps: client.max_rps(),
        bytes_downloaded: client.bytes_downloaded(),
        bytes_uploaded: client.bytes_uploaded(),
        elapsed_ms: started.elapsed().as_millis(),
        runner: session.stats(),
        ..Default::default()
    };
    for outcome in outcomes {
        match outcome {
            ProbeOutcome::Status(status) => {
                report.succeeded += 1;
                *report.statuses.entry(status).or_default() += 1;
            }
            ProbeOutcome::Failed(error) => {
                report.failed += 1;
                report.errors.push(error);
            }
        }
    }
    session.shutdown().await;

    info!(succeeded = report.succeeded, failed = report.failed, "cmd_probe: finished");
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

/// One request, retried with backoff on transient transport errors
async fn probe_once(
    session: &Session,
    url: &str,
    n: usize,
    priority: Priority,
    max_secs: u64,
    cancel: &CancellationToken,
) -> ProbeOutcome {
    let backoff = ExponentialBackoff::new(cancel.clone(), max_secs);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let task = match session.with_priority(priority, cancel).await {
            Ok(task) => task.with_initiator(format!("probe-{}", n)),
            Err(e) => {
                debug!(n, error = %e, "probe_once: no slot");
                return ProbeOutcome::Failed(e.to_string());
            }
        };
        match task.get(url).await {
            Ok(response) => {
                debug!(n, attempt, status = %response.status(), "probe_once: done");
                return ProbeOutcome::Status(response.status().as_u16());
            }
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                warn!(n, attempt, error = %e, "probe_once: retrying");
                backoff.wait().await;
            }
            Err(e) => {
                warn!(n, attempt, error = %e, "probe_once: giving up");
                return ProbeOutcome::Failed(e.to_string());
            }
        }
    }
}

fn print_report(report: &ProbeReport) {
    println!("{} {} ({} priority)", "Probe".bold(), report.url.cyan(), report.priority);
    println!(
        "  requests: {}  {}  {}",
        report.requests,
        format!("ok {}", report.succeeded).green(),
        if report.failed > 0 {
            format!("failed {}", report.failed).red()
        } else {
            format!("failed {}", report.failed).normal()
        }
    );
    for (status, n) in &report.statuses {
        println!("  status {}: {}", status, n);
    }
    for error in &report.errors {
        println!("  {} {}", "✗".red(), error);
    }
    let ceiling = if report.max_rps == 0 {
        "unlimited".to_string()
    } else {
        report.max_rps.to_string()
    };
    println!("  rps: {} (max {})", report.rps, ceiling);
    println!("  bytes: {} down, {} up", report.bytes_downloaded, report.bytes_uploaded);
    println!(
        "  runner: granted {}, completed {}, abandoned {}, peak queue {}",
        report.runner.granted, report.runner.completed, report.runner.abandoned, report.runner.peak_queue_depth
    );
    println!("  elapsed: {} ms", report.elapsed_ms);
}

/// Print the effective configuration
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{}", yaml);
    Ok(())
}
