// ABOUTME: CLI probe command - rank host:port targets by TCP connect latency

use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use super::{OutputFormat, ProbeArgs};
use crate::broker::probe;

/// Execute the probe command
pub async fn execute(args: ProbeArgs, format: OutputFormat) -> Result<()> {
    let results = probe(&args.hosts, Duration::from_millis(args.timeout_ms)).await;

    match format {
        OutputFormat::Json => {
            let rows: Vec<_> = results
                .iter()
                .map(|(host, latency)| json!({"host": host, "latency_ms": latency.as_secs_f64() * 1000.0}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Text => {
            if results.is_empty() {
                println!("No target reachable.");
            }
            for (host, latency) in &results {
                println!("{:<30} {:>8.1} ms", host, latency.as_secs_f64() * 1000.0);
            }
        }
    }
    Ok(())
}
