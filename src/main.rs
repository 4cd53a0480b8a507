use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use sys_exporter::config::ConfigSource;
use sys_exporter::logging;
use sys_exporter::prelude::*;

/// Host telemetry exporter
///
/// Samples host metrics, averages them into snapshots, appends every snapshot
/// to a rotating log and streams it to connected TCP clients as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "sys-exporter", version, about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = ".exporter.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(report) if report.is_clean() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(2),
        Err(err) => {
            tracing::error!(error = %err, "exporter failed");
            eprintln!("sys-exporter: {err}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<ShutdownReport> {
    let (config, source) = Config::load(&cli.config)?;
    logging::init(&config.logger)?;
    match source {
        ConfigSource::File => tracing::info!(config = %cli.config.display(), "configuration loaded"),
        ConfigSource::Defaults => {
            tracing::warn!(config = %cli.config.display(), "config file not found, continuing with defaults")
        },
    }

    let exporter = Arc::new(Exporter::new(
        config.clone(),
        Arc::new(SystemCollector::new(&config.collector)),
        Arc::new(RotatingLog::from_config(&config.disk_storage)),
        Box::new(TcpTransport::from_config(&config.server)),
    ));

    let handle = Arc::clone(&exporter);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => handle.stop(),
            Err(err) => tracing::error!(error = %err, "failed to listen for the interrupt signal"),
        }
    });

    let report = exporter.run().await?;
    for stage in &report.abandoned {
        tracing::info!(%stage, "stage did not drain before the grace period ended");
    }
    Ok(report)
}
