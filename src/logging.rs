// ABOUTME: tracing subscriber setup: EnvFilter plus a text or JSON Lines fmt layer

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Filter used when RUST_LOG is unset
pub const DEFAULT_FILTER: &str = "connbroker=info";

/// Where and how to write logs
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// JSON Lines instead of human-readable text
    pub json: bool,
    /// Directory for a timestamped log file; stderr when unset
    pub dir: Option<PathBuf>,
    /// File name stem, e.g. `worker-12888`
    pub name: String,
}

impl LogOptions {
    /// `<dir>/<name>-<YYYYmmdd-HHMMSS>.jsonl`
    pub fn file_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| {
            dir.join(format!(
                "{}-{}.jsonl",
                self.name,
                chrono::Local::now().format("%Y%m%d-%H%M%S")
            ))
        })
    }
}

/// Install the global subscriber
pub fn setup_logging(options: &LogOptions) -> Result<()> {
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match options.file_path() {
        Some(path) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            if options.json {
                layer.json().boxed()
            } else {
                layer.boxed()
            }
        }
        None => {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr);
            if options.json {
                layer.json().boxed()
            } else {
                layer.boxed()
            }
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .try_init()
        .context("Failed to install tracing subscriber")
}
