//! Subscriber setup: `RUST_LOG` first, then the configured level.
//!
//! The `tracing-log` bridge is installed by `try_init`, so records the
//! protocol crate emits through `log` end up in the same output.

use anyhow::{anyhow, Context, Result};
use mirror_engine::config::GeneralConfig;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(general: &GeneralConfig, verbose: bool) -> String {
    let level = general.log_level.trim();
    let level = if level.is_empty() { "info" } else { level };
    if verbose || general.verbose {
        format!("{},mirror_engine=debug,ftp_mirror_lib=debug", level)
    } else {
        level.to_string()
    }
}

pub fn init(general: &GeneralConfig, verbose: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = default_directive(general, verbose);
            EnvFilter::try_new(&directive)
                .with_context(|| format!("invalid general.log_level '{}'", general.log_level))?
        }
    };

    let (writer, ansi) = match &general.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi);
    let installed = if general.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("installing log subscriber: {}", e))
}
