// ABOUTME: TCP executor and connect-latency probe

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::SessionLimits;
use crate::broker::error::{BrokerError, BrokerResult};

/// A connected TCP stream
#[derive(Debug)]
pub struct TcpSession {
    target: String,
    stream: Option<TcpStream>,
    read_timeout: Duration,
}

impl TcpSession {
    /// Connect within `limits.connect_timeout`
    pub async fn connect(host: &str, port: u16, limits: SessionLimits) -> BrokerResult<Self> {
        let target = format!("tcp://{host}:{port}");

        let stream = match timeout(limits.connect_timeout, TcpStream::connect((host, port))).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(BrokerError::connect(target, e)),
            Err(_) => {
                return Err(BrokerError::connect(
                    target,
                    format!("timed out after {:?}", limits.connect_timeout),
                ))
            }
        };
        stream.set_nodelay(true)?;

        debug!(target = %target, "TCP session opened");
        Ok(Self {
            target,
            stream: Some(stream),
            read_timeout: limits.read_timeout,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Read up to `size` bytes; EOF yields an empty payload
    pub async fn read(&mut self, size: usize) -> BrokerResult<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or_else(|| closed(&self.target))?;
        let mut buf = vec![0u8; size];

        let n = timeout(self.read_timeout, stream.read(&mut buf))
            .await
            .map_err(|_| BrokerError::ReadTimeout {
                target: self.target.clone(),
                elapsed: self.read_timeout,
            })??;

        buf.truncate(n);
        Ok(buf)
    }

    pub async fn write(&mut self, data: &[u8]) -> BrokerResult<()> {
        let stream = self.stream.as_mut().ok_or_else(|| closed(&self.target))?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(target = %self.target, error = %e, "TCP shutdown failed");
            }
        }
    }

    pub const fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

fn closed(target: &str) -> BrokerError {
    BrokerError::SessionClosed(target.to_string())
}

// === Probe ===

/// Measure TCP connect latency to each `host:port` concurrently.
///
/// Unreachable hosts are dropped; the rest come back fastest first.
pub async fn probe(hosts: &[String], limit: Duration) -> Vec<(String, Duration)> {
    let attempts = hosts.iter().map(|host| async move {
        let started = Instant::now();
        match timeout(limit, TcpStream::connect(host.as_str())).await {
            Ok(Ok(_)) => Some((host.clone(), started.elapsed())),
            Ok(Err(e)) => {
                debug!(host = %host, error = %e, "Probe failed");
                None
            }
            Err(_) => {
                debug!(host = %host, "Probe timed out");
                None
            }
        }
    });

    let mut results: Vec<(String, Duration)> =
        join_all(attempts).await.into_iter().flatten().collect();
    results.sort_by_key(|(_, latency)| *latency);
    results
}
