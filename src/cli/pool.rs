// ABOUTME: CLI pool command - start the worker pool or stop every worker
//
// `pool start` persists the size to the count file, then spawns one `serve`
// child per port using the current executable and waits for all of them.
// `pool stop` sends `kill` to every port of the persisted layout.

use anyhow::{Context, Result};

use crate::broker::pool::{write_pool_size, PoolLayout, WorkerPool};
use crate::broker::{BrokerClient, BrokerConfig, ClientError};

/// Spawn the pool and block until every worker exits
pub async fn start(num: Option<u16>, config: &BrokerConfig, forwarded: &[String]) -> Result<()> {
    let layout = match num {
        Some(size) => {
            let layout = PoolLayout::from_size(config, size)?;
            write_pool_size(&config.pool_size_path(), size)?;
            layout
        }
        None => PoolLayout::load(config)?,
    };

    let exe = std::env::current_exe().context("Failed to locate the connbroker executable")?;
    let pool = WorkerPool::spawn(&exe, &layout, forwarded)?;

    println!(
        "Started {} workers on {}:{}-{}",
        layout.size,
        layout.host,
        layout.base_port,
        layout.base_port + (layout.size - 1)
    );

    let failed = pool
        .wait()
        .await
        .into_iter()
        .filter(|(_, status)| !matches!(status, Ok(s) if s.success()))
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} worker(s) exited with an error");
    }
    Ok(())
}

/// Kill every worker; unreachable ports are reported, not fatal
pub fn stop(config: &BrokerConfig) -> Result<()> {
    let client = BrokerClient::new(config)?;

    let mut stopped = 0;
    for (port, result) in client.stop_all() {
        match result {
            Ok(()) => stopped += 1,
            Err(ClientError::BrokerUnreachable { .. }) => {
                println!("port {port}: not running");
            }
            Err(e) => println!("port {port}: {e}"),
        }
    }

    println!("Stopped {stopped} of {} workers", client.layout().size);
    Ok(())
}
