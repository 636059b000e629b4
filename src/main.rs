// ABOUTME: Main entry point for the connbroker CLI
//
// Binary: connbroker
// Usage: connbroker <COMMAND>
// - serve: run one worker on a loopback port
// - pool start/stop: manage the worker pool
// - list: show live handles
// - log: pop a worker's log queue
// - fetch: fetch a URL through a worker
// - probe: rank targets by connect latency

#![allow(missing_docs)]

use std::future::Future;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use connbroker::broker::BrokerConfig;
use connbroker::cli::{self, Commands, PoolAction};
use connbroker::logging::setup_logging;

fn main() -> Result<()> {
    let args = cli::Cli::parse();

    setup_logging(&args.log_options())?;
    setup_panic_handler();

    let config = BrokerConfig::load(args.config.as_deref()).context("Failed to load config")?;
    let format = args.format;
    let forwarded = args.forwarded_args();

    match args.command {
        Commands::Serve(serve_args) => block_on(cli::serve::execute(serve_args, config)),
        Commands::Pool(pool_args) => match pool_args.action {
            PoolAction::Start { num } => block_on(cli::pool::start(num, &config, &forwarded)),
            PoolAction::Stop => cli::pool::stop(&config),
        },
        Commands::List(admin_args) => cli::admin::list(&admin_args, &config, format),
        Commands::Log(admin_args) => cli::admin::log(&admin_args, &config, format),
        Commands::Fetch(fetch_args) => cli::fetch::execute(fetch_args, &config),
        Commands::Probe(probe_args) => block_on(cli::probe::execute(probe_args, format)),
    }
}

/// Each worker is a single-threaded event loop
fn block_on<F: Future<Output = Result<()>>>(future: F) -> Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(future)
}

fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        error!("Application panicked: {}", panic_info);
        eprintln!("Application panicked: {}", panic_info);
        eprintln!("Please check the logs for more details.");
    }));
}
