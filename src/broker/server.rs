// ABOUTME: Broker server: loopback accept loop running one command per connection
// ABOUTME: Stops on `kill`, closing every open session on the way out

//! One worker of the pool.
//!
//! ```text
//! client ──connect──▶ accept ──▶ read frame (≤ request_timeout)
//!                                  │
//!                                  ▼
//!                              dispatch ──▶ reply frame(s) ──▶ close
//!                                  │
//!                                  └── kill ──▶ stop accept loop
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::codec::{decode_request, encode_reply, FailureKind, Reply, TERMINATOR};
use super::config::BrokerConfig;
use super::dispatcher::{dispatch, Outcome};
use super::state::BrokerState;

/// Errors that stop a worker from serving
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the control listener
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// A broker worker bound to one loopback port
pub struct BrokerServer {
    listener: TcpListener,
    state: Arc<BrokerState>,
}

impl BrokerServer {
    /// Bind `config.host:port` with fresh state
    pub async fn bind(config: BrokerConfig, port: u16) -> Result<Self, ServerError> {
        Self::bind_with_state(Arc::new(BrokerState::new(config)), port).await
    }

    /// Bind with caller-built state (custom storage sink or chains)
    pub async fn bind_with_state(state: Arc<BrokerState>, port: u16) -> Result<Self, ServerError> {
        let addr = format!("{}:{port}", state.config.host);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> &Arc<BrokerState> {
        &self.state
    }

    /// Serve until a `kill` command arrives.
    ///
    /// The listener is released first, then in-flight reads are cancelled
    /// and every session is closed.
    pub async fn run(self) {
        let Self { listener, state } = self;
        let port = listener.local_addr().map(|a| a.port()).unwrap_or_default();
        info!(port = port, "Broker worker listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(port = port, peer = %peer, "Control connection");
                            let state = Arc::clone(&state);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, &state).await {
                                    debug!(error = %e, "Control connection ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(port = port, error = %e, "Accept error");
                        }
                    }
                }
                () = state.stopped() => {
                    info!(port = port, "Kill received, stopping worker");
                    break;
                }
            }
        }

        drop(listener);
        state.registry.close_all().await;
        info!(port = port, "Broker worker stopped");
    }
}

/// Read one request, dispatch it, write the reply frames, close
async fn handle_connection(stream: TcpStream, state: &Arc<BrokerState>) -> io::Result<()> {
    let mut stream = BufReader::new(stream);
    let mut frame = Vec::new();

    match timeout(
        state.config.request_timeout,
        stream.read_until(TERMINATOR, &mut frame),
    )
    .await
    {
        Ok(Ok(0)) => return Ok(()),
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            debug!("Control request timed out");
            return Ok(());
        }
    }

    let replies = match decode_request(&frame) {
        Ok(request) => match dispatch(state, request).await {
            Outcome::Reply(replies) => replies,
            Outcome::Kill => {
                state.shutdown();
                return Ok(());
            }
        },
        Err(e) => {
            warn!(error = %e, "Malformed control request");
            vec![Reply::failed(None, FailureKind::Codec, e.to_string())]
        }
    };

    let stream = stream.get_mut();
    for reply in &replies {
        let bytes = encode_reply(reply).map_err(io::Error::other)?;
        stream.write_all(&bytes).await?;
    }
    stream.flush().await?;
    stream.shutdown().await
}
