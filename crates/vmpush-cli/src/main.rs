//! vmpush CLI - ship metrics to a VictoriaMetrics-compatible store
//!
//! Usage:
//!   vmpush push <name> <value> [-l key=value]...   Send one measurement
//!   vmpush import <file|->                         Send measurements from a file
//!   vmpush run --stage <name> -- <cmd>...          Time a command as a job stage

mod import;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use vmpush_client::{DeliveryError, MetricsSink, Payload, Transport};
use vmpush_core::SinkConfig;
use vmpush_jobs::JobMetrics;

#[derive(Parser)]
#[command(name = "vmpush")]
#[command(author, version, about = "Ship metrics to a VictoriaMetrics-compatible store")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Base URL of the metrics store (overrides the config file)
    #[arg(long, global = true, env = "VMPUSH_ENDPOINT")]
    endpoint: Option<String>,

    /// Job name stamped on every measurement (overrides the config file)
    #[arg(long, global = true, env = "VMPUSH_JOB")]
    job: Option<String>,

    /// Basic-auth user
    #[arg(long, global = true, env = "VMPUSH_USERNAME")]
    username: Option<String>,

    /// Basic-auth password
    #[arg(long, global = true, env = "VMPUSH_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Print the encoded payload instead of sending it
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single measurement
    Push {
        /// Metric name
        name: String,

        /// Numeric value
        #[arg(allow_hyphen_values = true)]
        value: f64,

        /// Label as key=value (repeatable)
        #[arg(short, long = "label", value_name = "KEY=VALUE", value_parser = parse_label_arg)]
        labels: Vec<(String, String)>,

        /// Timestamp in milliseconds since the epoch (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,
    },

    /// Send measurements read from a file, one per line ("-" for stdin)
    Import {
        /// Input file
        path: PathBuf,
    },

    /// Run a command, recording its duration as a stage and its outcome
    Run {
        /// Stage name for the command
        #[arg(long, default_value = "run")]
        stage: String,

        /// Prefix for the recorded metric names
        #[arg(long)]
        namespace: Option<String>,

        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

fn parse_label_arg(raw: &str) -> Result<(String, String), String> {
    import::parse_label(raw).map_err(|e| e.to_string())
}

/// Writes payloads to stdout instead of a metrics store
struct StdoutTransport;

#[async_trait]
impl Transport for StdoutTransport {
    async fn send(&self, payload: &Payload) -> Result<(), DeliveryError> {
        print!("{}", String::from_utf8_lossy(payload.body()));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout is reserved for --dry-run output
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = resolve_config(&cli)?;
    let sink = if cli.dry_run {
        MetricsSink::with_transport(config.with_compression(false), StdoutTransport)?
    } else {
        MetricsSink::new(config)?
    };

    match cli.command {
        Commands::Push {
            name,
            value,
            labels,
            timestamp,
        } => cmd_push(sink, name, value, labels, timestamp).await,
        Commands::Import { path } => cmd_import(sink, path).await,
        Commands::Run {
            stage,
            namespace,
            command,
        } => cmd_run(sink, stage, namespace, command).await,
    }
}

/// Config file first, then flags and environment on top; validated once
/// all layers are applied
fn resolve_config(cli: &Cli) -> Result<SinkConfig> {
    let mut config = match &cli.config {
        Some(path) => SinkConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => {
            let (Some(endpoint), Some(job)) = (&cli.endpoint, &cli.job) else {
                bail!("Either --config or both --endpoint and --job are required");
            };
            SinkConfig::new(endpoint, job)
        }
    };

    if let Some(endpoint) = &cli.endpoint {
        config.endpoint_url = endpoint.clone();
    }
    if let Some(job) = &cli.job {
        config.job_name = job.clone();
    }
    if let Some(username) = &cli.username {
        config.username = Some(username.clone());
    }
    if let Some(password) = &cli.password {
        config.password = Some(password.clone());
    }

    config
        .validate()
        .context("Invalid configuration after applying flags")?;
    Ok(config)
}

fn finish(flushed: bool) -> Result<()> {
    if !flushed {
        bail!("Failed to deliver metrics; see the log for each attempt");
    }
    Ok(())
}

async fn cmd_push(
    sink: MetricsSink,
    name: String,
    value: f64,
    labels: Vec<(String, String)>,
    timestamp: Option<i64>,
) -> Result<()> {
    let labels: Vec<(&str, &str)> = labels
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let (submitted, flushed) = sink
        .scope(|sink| async move {
            match timestamp {
                Some(ts) => sink.submit_at(&name, value, &labels, ts).await,
                None => sink.submit(&name, value, &labels).await,
            }
        })
        .await;

    submitted?;
    finish(flushed)
}

async fn cmd_import(sink: MetricsSink, path: PathBuf) -> Result<()> {
    let content = if path.as_os_str() == "-" {
        let mut content = String::new();
        tokio::io::stdin()
            .read_to_string(&mut content)
            .await
            .context("Failed to read stdin")?;
        content
    } else {
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?
    };

    let measurements = import::parse_document(&content)?;
    info!("Importing {} measurements", measurements.len());

    let (submitted, flushed) = sink
        .scope(|sink| async move {
            for measurement in measurements {
                sink.submit_measurement(measurement).await?;
            }
            Ok::<_, vmpush_core::VmError>(())
        })
        .await;

    submitted?;
    finish(flushed)
}

async fn cmd_run(
    sink: MetricsSink,
    stage: String,
    namespace: Option<String>,
    command: Vec<String>,
) -> Result<()> {
    let (program, args) = command
        .split_first()
        .context("No command given")?;

    let (status, flushed) = sink
        .scope(|sink| async move {
            let mut job = JobMetrics::new(sink);
            if let Some(namespace) = namespace {
                job = job.with_namespace(namespace);
            }

            job.start_stage(&stage).await;
            let status = tokio::process::Command::new(program)
                .args(args)
                .status()
                .await;
            job.end_stage(&stage).await;

            match &status {
                Ok(status) if status.success() => {
                    job.record_job_completion("success", None).await
                }
                Ok(status) => {
                    let message = format!("{} exited with {}", program, status);
                    job.record_job_completion("failed", Some(&message)).await
                }
                Err(e) => {
                    let message = format!("failed to start {}: {}", program, e);
                    job.record_job_completion("failed", Some(&message)).await
                }
            }
            status
        })
        .await;

    let status = status.with_context(|| format!("Failed to start {}", program))?;
    finish(flushed)?;
    if !status.success() {
        bail!("{} exited with {}", program, status);
    }
    Ok(())
}
