// ABOUTME: CLI serve command - run one broker worker on a loopback port

use anyhow::{Context, Result};
use tracing::info;

use super::ServeArgs;
use crate::broker::{BrokerConfig, BrokerServer};

/// Execute the serve command; returns once the worker is killed
pub async fn execute(args: ServeArgs, config: BrokerConfig) -> Result<()> {
    let server = BrokerServer::bind(config, args.port)
        .await
        .with_context(|| format!("Failed to start worker on port {}", args.port))?;

    info!(addr = %server.local_addr()?, "Worker ready");
    server.run().await;
    Ok(())
}
