// ABOUTME: CLI list and log commands - inspect handles and log queues of workers

use anyhow::Result;
use serde::Serialize;

use super::{AdminArgs, OutputFormat};
use crate::broker::{BrokerClient, BrokerConfig, ClientError, HandleId, Listing};

/// Live handles of one worker
#[derive(Debug, Serialize)]
pub struct WorkerListing {
    pub port: u16,
    #[serde(flatten)]
    pub listing: Listing,
}

/// Execute the list command
pub fn list(args: &AdminArgs, config: &BrokerConfig, format: OutputFormat) -> Result<()> {
    let client = BrokerClient::new(config)?;

    let mut listings = Vec::new();
    for port in target_ports(&client, args.port) {
        match client.connect_to(port).list() {
            Ok(listing) => listings.push(WorkerListing { port, listing }),
            Err(ClientError::BrokerUnreachable { .. }) if args.port.is_none() => {}
            Err(e) => return Err(e.into()),
        }
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&listings)?),
        OutputFormat::Text => output_text(&listings),
    }
    Ok(())
}

/// Execute the log command
pub fn log(args: &AdminArgs, config: &BrokerConfig, format: OutputFormat) -> Result<()> {
    let client = BrokerClient::new(config)?;

    for port in target_ports(&client, args.port) {
        let msg = match client.connect_to(port).log() {
            Ok(msg) => msg,
            Err(ClientError::BrokerUnreachable { .. }) if args.port.is_none() => continue,
            Err(e) => return Err(e.into()),
        };
        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"port": port, "msg": msg}));
            }
            OutputFormat::Text => {
                println!("{port}: {}", msg.as_deref().unwrap_or("(empty)"));
            }
        }
    }
    Ok(())
}

fn target_ports(client: &BrokerClient, port: Option<u16>) -> Vec<u16> {
    port.map_or_else(|| client.layout().ports(), |port| vec![port])
}

fn output_text(listings: &[WorkerListing]) {
    if listings.iter().all(|w| w.listing.is_empty()) {
        println!("No live handles.");
        return;
    }

    println!("{:<7} {:<6} ID", "PORT", "PROTO");
    println!("{}", "-".repeat(40));
    for worker in listings {
        let rows = [
            ("tcp", &worker.listing.tcp),
            ("udp", &worker.listing.udp),
            ("http", &worker.listing.http),
        ];
        for (proto, ids) in rows {
            for id in ids.iter().map(HandleId::as_str) {
                println!("{:<7} {:<6} {id}", worker.port, proto);
            }
        }
    }
}
