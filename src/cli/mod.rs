// ABOUTME: CLI argument parsing and command routing for connbroker
//
// Provides command-line interface for:
// - Running one broker worker (serve)
// - Starting and stopping the worker pool (pool start/stop)
// - Inspecting a worker (list, log)
// - Fetching a URL through the broker (fetch)
// - Measuring TCP connect latency (probe)

pub mod admin;
pub mod fetch;
pub mod pool;
pub mod probe;
pub mod serve;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::logging::LogOptions;

/// Local connection broker for TCP, UDP and HTTP sessions
#[derive(Parser)]
#[command(name = "connbroker")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ./.connbroker/config.toml, then ~/.connbroker/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Emit logs as JSON Lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Write logs to a timestamped file in this directory instead of stderr
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
}

impl Cli {
    /// Logging setup for the parsed command
    pub fn log_options(&self) -> LogOptions {
        let name = match &self.command {
            Commands::Serve(args) => format!("worker-{}", args.port),
            _ => "connbroker".to_string(),
        };
        LogOptions {
            json: self.log_json,
            dir: self.log_dir.clone(),
            name,
        }
    }

    /// Global flags forwarded to spawned workers
    pub fn forwarded_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config) = &self.config {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        if self.log_json {
            args.push("--log-json".to_string());
        }
        if let Some(dir) = &self.log_dir {
            args.push("--log-dir".to_string());
            args.push(dir.display().to_string());
        }
        args
    }
}

/// Output format for commands
#[derive(Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run one broker worker until it receives `kill`
    Serve(ServeArgs),

    /// Manage the worker pool
    Pool(PoolArgs),

    /// List the live handles of a worker
    List(AdminArgs),

    /// Pop one pending message from a worker's log queue
    Log(AdminArgs),

    /// Fetch a URL through the broker and print the body
    Fetch(FetchArgs),

    /// Measure TCP connect latency to host:port targets
    Probe(ProbeArgs),
}

/// Arguments for the serve command
#[derive(clap::Args)]
pub struct ServeArgs {
    /// Loopback port to listen on
    #[arg(long, short)]
    pub port: u16,
}

/// Arguments for the pool command
#[derive(clap::Args)]
pub struct PoolArgs {
    #[command(subcommand)]
    pub action: PoolAction,
}

/// Pool actions
#[derive(Subcommand)]
pub enum PoolAction {
    /// Spawn one worker per port and wait for them
    Start {
        /// Pool size; persisted to the count file
        #[arg(long, short)]
        num: Option<u16>,
    },

    /// Send `kill` to every worker
    Stop,
}

/// Arguments for list and log
#[derive(clap::Args)]
pub struct AdminArgs {
    /// Worker port (default: every worker of the pool)
    #[arg(long, short)]
    pub port: Option<u16>,
}

/// HTTP method for fetch
#[derive(Clone, Copy, Default, ValueEnum)]
pub enum Method {
    #[default]
    Get,
    Post,
}

/// Arguments for the fetch command
#[derive(clap::Args)]
pub struct FetchArgs {
    /// URL to fetch
    pub url: String,

    /// HTTP method
    #[arg(long, short, default_value = "get")]
    pub method: Method,

    /// Request body (POST)
    #[arg(long, short)]
    pub data: Option<String>,

    /// Extra header as `name: value` (repeatable)
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,

    /// Proxy URL for this request
    #[arg(long)]
    pub proxy: Option<String>,

    /// Worker port (default: random worker)
    #[arg(long, short)]
    pub port: Option<u16>,
}

/// Arguments for the probe command
#[derive(clap::Args)]
pub struct ProbeArgs {
    /// Targets as host:port
    #[arg(required = true)]
    pub hosts: Vec<String>,

    /// Connect timeout in milliseconds
    #[arg(long, default_value = "3000")]
    pub timeout_ms: u64,
}
