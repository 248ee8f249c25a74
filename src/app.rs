//! Binary driver: config, logging, runtime, report, exit status.

use crate::cli::{Args, Command};
use crate::logging;
use anyhow::{Context, Result};
use clap::Parser;
use mirror_engine::{
    AncillaryRunner, FtpConnector, MirrorConfig, MirrorEngine, MirrorError, RemoteConnector,
};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Per-item failures still count as success.
pub const EXIT_OK: u8 = 0;
pub const EXIT_FATAL: u8 = 1;
pub const EXIT_CONFIG: u8 = 2;

pub fn run() -> ExitCode {
    // Parsed before logging so --help works without a config file.
    let args = Args::parse();

    let config = match MirrorConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ftp-mirror: {}: {}", args.config.display(), e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Err(e) = logging::init(&config.general, args.verbose) {
        eprintln!("ftp-mirror: {:#}", e);
        return ExitCode::from(EXIT_CONFIG);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "cannot start the async runtime");
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match runtime.block_on(execute(&args, config)) {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Configuration problems exit with 2, anything else fatal with 1.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<MirrorError>() {
        Some(MirrorError::Config(_)) => EXIT_CONFIG,
        _ => EXIT_FATAL,
    }
}

pub async fn execute(args: &Args, config: MirrorConfig) -> Result<()> {
    let connection = config
        .server
        .connection_config()
        .context("resolving server credentials")?;
    let connector: Arc<dyn RemoteConnector> = Arc::new(FtpConnector::new(connection));
    execute_with(args, config, connector).await
}

/// Run the selected mode against `connector` and write the report.
pub async fn execute_with(
    args: &Args,
    config: MirrorConfig,
    connector: Arc<dyn RemoteConnector>,
) -> Result<()> {
    match args.command() {
        Command::Mirror => {
            let engine = MirrorEngine::new(config, connector);
            let report = engine.run().await.context("mirror run aborted")?;
            for root in &report.roots {
                if root.failed() > 0 || !root.failed_dirs.is_empty() {
                    warn!(
                        root = %root.remote_root,
                        failed = root.failed(),
                        failed_dirs = root.failed_dirs.len(),
                        "root finished with failures"
                    );
                }
            }
            if let Some(path) = &args.report {
                write_report(path, &report)?;
            }
        }
        Command::Ancillary => {
            let runner = AncillaryRunner::new(config, connector)?;
            let report = runner.run().await.context("ancillary run aborted")?;
            info!(
                listed = report.listed,
                placed = report.placed(),
                replaced = report.replaced.len(),
                "ancillary run finished"
            );
            if let Some(path) = &args.report {
                write_report(path, &report)?;
            }
        }
    }
    Ok(())
}

pub fn write_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("serialising run report")?;
    fs::write(path, json).with_context(|| format!("writing report to {}", path.display()))?;
    info!(path = %path.display(), "run report written");
    Ok(())
}
