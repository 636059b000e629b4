// ABOUTME: Worker pool addressing, persisted pool size and child-process bootstrap
//
// Worker `i` listens on `base_port + i`. The pool size lives in a one-line
// count file; it is read once and is the only source for valid ports.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::config::BrokerConfig;

/// Errors raised while managing the worker pool
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool size is zero or runs past the last port
    #[error("Invalid pool size {size} for base port {base_port}")]
    InvalidSize { size: u16, base_port: u16 },

    /// Count file could not be written
    #[error("Failed to write pool size to {path}: {source}")]
    WriteCount {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A worker process failed to start
    #[error("Failed to spawn worker on port {port}: {source}")]
    Spawn {
        port: u16,
        #[source]
        source: io::Error,
    },
}

// === Layout ===

/// Addresses of every worker in the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolLayout {
    pub host: String,
    pub base_port: u16,
    pub size: u16,
}

impl PoolLayout {
    /// Layout with an explicit size
    pub fn from_size(config: &BrokerConfig, size: u16) -> Result<Self, PoolError> {
        let last = u32::from(config.base_port) + u32::from(size);
        if size == 0 || last > u32::from(u16::MAX) + 1 {
            return Err(PoolError::InvalidSize {
                size,
                base_port: config.base_port,
            });
        }
        Ok(Self {
            host: config.host.clone(),
            base_port: config.base_port,
            size,
        })
    }

    /// Layout sized by the persisted count file
    pub fn load(config: &BrokerConfig) -> Result<Self, PoolError> {
        let size = read_pool_size(&config.pool_size_path(), config.default_pool_size);
        Self::from_size(config, size)
    }

    pub fn ports(&self) -> Vec<u16> {
        (0..self.size)
            .filter_map(|i| self.base_port.checked_add(i))
            .collect()
    }

    pub fn addr(&self, port: u16) -> String {
        format!("{}:{port}", self.host)
    }
}

// === Count file ===

/// Read the pool size.
///
/// A missing file is created holding `default`; an unreadable or unparsable
/// one yields `default`.
pub fn read_pool_size(path: &Path, default: u16) -> u16 {
    match fs::read_to_string(path) {
        Ok(text) => match text.trim().parse::<u16>() {
            Ok(size) if size > 0 => size,
            _ => {
                warn!(path = %path.display(), "Pool size file is not a positive integer, using default");
                default
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if let Err(e) = write_pool_size(path, default) {
                warn!(error = %e, "Could not persist default pool size");
            }
            default
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Pool size file unreadable, using default");
            default
        }
    }
}

/// Persist the pool size, creating parent directories
pub fn write_pool_size(path: &Path, size: u16) -> Result<(), PoolError> {
    let write = || -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, size.to_string())
    };
    write().map_err(|source| PoolError::WriteCount {
        path: path.to_path_buf(),
        source,
    })
}

// === Worker processes ===

/// Running `serve` children, one per port
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<(u16, Child)>,
}

impl WorkerPool {
    /// Launch `exe serve --port P` for every port of the layout.
    ///
    /// `extra_args` go before the subcommand (global flags such as
    /// `--config`). If one child fails to start the others are killed.
    pub fn spawn(exe: &Path, layout: &PoolLayout, extra_args: &[String]) -> Result<Self, PoolError> {
        let mut workers = Vec::with_capacity(usize::from(layout.size));

        for port in layout.ports() {
            let spawned = Command::new(exe)
                .args(extra_args)
                .args(["serve", "--port", port.to_string().as_str()])
                .stdin(Stdio::null())
                .kill_on_drop(false)
                .spawn();

            match spawned {
                Ok(child) => {
                    debug!(port = port, pid = ?child.id(), "Worker spawned");
                    workers.push((port, child));
                }
                Err(source) => {
                    for (_, child) in &mut workers {
                        let _ = child.start_kill();
                    }
                    return Err(PoolError::Spawn { port, source });
                }
            }
        }

        info!(workers = workers.len(), base_port = layout.base_port, "Worker pool started");
        Ok(Self { workers })
    }

    pub fn ports(&self) -> Vec<u16> {
        self.workers.iter().map(|(port, _)| *port).collect()
    }

    /// Wait for every worker to exit
    pub async fn wait(self) -> Vec<(u16, io::Result<ExitStatus>)> {
        let mut results = Vec::with_capacity(self.workers.len());
        for (port, mut child) in self.workers {
            let status = child.wait().await;
            match &status {
                Ok(status) => info!(port = port, status = %status, "Worker exited"),
                Err(e) => warn!(port = port, error = %e, "Worker wait failed"),
            }
            results.push((port, status));
        }
        results
    }
}
