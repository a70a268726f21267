use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Args, Parser, Subcommand};
use labeler::{
    AnalysisResult, AwsClients, BatchRunner, Config, Environment, ImageOutcome, Pipeline,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Label images with Rekognition and record the results in DynamoDB
#[derive(Parser, Debug)]
#[command(name = "labeler", version, about)]
struct Cli {
    /// Extra configuration file layered over the defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a single image
    File {
        path: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Process every supported image in a folder
    Folder {
        dir: PathBuf,
        #[command(flatten)]
        target: TargetArgs,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the records stored for an environment
    List {
        #[command(flatten)]
        target: TargetArgs,
        /// Print the records as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Deployment environment: beta or production
    #[arg(long = "env", env = "LABELER_ENVIRONMENT")]
    environment: String,
}

impl TargetArgs {
    fn environment(&self) -> Result<Environment> {
        Ok(self.environment.parse::<Environment>()?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    init_tracing(&config.service.log_level, &config.service.log_format);

    config.validate().context("Invalid configuration")?;

    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    let environment = match &cli.command {
        Command::File { target, .. }
        | Command::Folder { target, .. }
        | Command::List { target, .. } => target.environment()?,
    };

    // Fail on missing settings before any client is built
    match &cli.command {
        Command::List { .. } => {
            config.table_for(environment)?;
        }
        _ => {
            config.resolve(environment)?;
        }
    }

    info!(
        service = %config.service.name,
        environment = %environment,
        "Starting labeler"
    );

    let clients = AwsClients::load(&config.aws).await.into_clients();
    let pipeline = Arc::new(Pipeline::new(config, clients));

    match cli.command {
        Command::File { path, .. } => {
            let outcome = pipeline
                .process_file(&path, environment)
                .await
                .with_context(|| format!("Failed to label {}", path.display()))?;
            print_outcome(&outcome);
        }
        Command::Folder { dir, json, .. } => {
            let cancel = CancellationToken::new();
            let signal_handle = tokio::spawn(cancel_on_shutdown(cancel.clone()));

            let report = BatchRunner::new(pipeline)
                .with_cancellation(cancel)
                .run(&dir, environment)
                .await;
            signal_handle.abort();
            let report = report.with_context(|| format!("Failed to process {}", dir.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
        }
        Command::List { json, .. } => {
            let records = pipeline.list(environment).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No records in {environment}");
            } else {
                for record in &records {
                    println!("{}", format_record(record));
                }
            }
        }
    }

    Ok(())
}

fn print_outcome(outcome: &ImageOutcome) {
    match outcome {
        ImageOutcome::Stored {
            filename, labels, ..
        } if labels.is_empty() => println!("stored   {filename} (no labels)"),
        ImageOutcome::Stored {
            filename,
            object_key,
            labels,
        } => {
            println!("stored   {filename} ({} labels, {object_key})", labels.len());
            for label in labels {
                println!("  {:<30} {}", label.name, label.confidence);
            }
        }
        ImageOutcome::SkippedEmpty { filename, .. } => {
            println!("skipped  {filename} (no labels, not persisted)")
        }
    }
}

fn format_record(record: &AnalysisResult) -> String {
    let when = DateTime::from_timestamp(record.timestamp, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| record.timestamp.to_string());

    let labels = if record.labels.is_empty() {
        "(no labels)".to_string()
    } else {
        record
            .labels
            .iter()
            .map(|l| format!("{} {}", l.name, l.confidence))
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!("{}  {}  {}", record.filename, when, labels)
}

/// Initialize tracing/logging. Logs go to stderr, reports to stdout.
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Cancel `token` on the first shutdown signal
async fn cancel_on_shutdown(token: CancellationToken) {
    shutdown_signal().await;
    warn!("Shutdown requested, stopping after the current file");
    token.cancel();
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
