// ABOUTME: Per-protocol I/O executors behind a single Session type
//
// Every suspension point (connect, read, HTTP body chunk, UDP receive) is
// bounded by a timeout taken from SessionLimits.

mod http;
mod tcp;
mod udp;

use std::time::Duration;

pub use http::HttpSession;
pub use tcp::{probe, TcpSession};
pub use udp::UdpSession;

use super::codec::{CreateRequest, Options, Protocol};
use super::config::BrokerConfig;
use super::error::BrokerResult;

/// Largest single read when the `size` option is absent
pub const DEFAULT_READ_SIZE: usize = 64 * 1024;

/// Timeouts a session carries for its whole life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub chunk_timeout: Duration,
    pub udp_timeout: Duration,
}

impl From<&BrokerConfig> for SessionLimits {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            chunk_timeout: config.chunk_timeout,
            udp_timeout: config.udp_timeout,
        }
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from(&BrokerConfig::default())
    }
}

/// An open TCP, UDP or HTTP session
#[derive(Debug)]
pub enum Session {
    Tcp(TcpSession),
    Udp(UdpSession),
    Http(HttpSession),
}

impl Session {
    /// Open a session for a `create` request.
    ///
    /// Also returns the initial data, which only a UDP create with a
    /// `message` produces.
    pub async fn open(
        request: &CreateRequest,
        limits: SessionLimits,
    ) -> BrokerResult<(Self, Option<Vec<u8>>)> {
        match request.protocol {
            Protocol::Tcp => {
                let session = TcpSession::connect(&request.host, request.port, limits).await?;
                Ok((Self::Tcp(session), None))
            }
            Protocol::Udp => {
                let (session, reply) = UdpSession::connect(
                    &request.host,
                    request.port,
                    request.message.as_deref(),
                    limits,
                )
                .await?;
                Ok((Self::Udp(session), reply))
            }
            Protocol::Http => Ok((Self::Http(HttpSession::open(&request.host, limits)?), None)),
        }
    }

    pub const fn protocol(&self) -> Protocol {
        match self {
            Self::Tcp(_) => Protocol::Tcp,
            Self::Udp(_) => Protocol::Udp,
            Self::Http(_) => Protocol::Http,
        }
    }

    /// Key used for retry accounting: the URL, or `scheme://host:port`
    pub fn target(&self) -> String {
        match self {
            Self::Tcp(s) => s.target().to_string(),
            Self::Udp(s) => s.target().to_string(),
            Self::Http(s) => s.url().to_string(),
        }
    }

    /// One read, shaped by the handle options
    pub async fn read(&mut self, options: &Options) -> BrokerResult<Vec<u8>> {
        match self {
            Self::Tcp(s) => s.read(read_size(options)).await,
            Self::Udp(s) => s.read(read_size(options)).await,
            Self::Http(s) => s.read(options).await,
        }
    }

    pub async fn write(&mut self, data: &[u8]) -> BrokerResult<()> {
        match self {
            Self::Tcp(s) => s.write(data).await,
            Self::Udp(s) => s.write(data).await,
            Self::Http(s) => s.write(data),
        }
    }

    /// Release the socket or client; later calls do nothing
    pub async fn close(&mut self) {
        match self {
            Self::Tcp(s) => s.close().await,
            Self::Udp(s) => s.close(),
            Self::Http(s) => s.close(),
        }
    }

    pub const fn is_open(&self) -> bool {
        match self {
            Self::Tcp(s) => s.is_open(),
            Self::Udp(s) => s.is_open(),
            Self::Http(s) => s.is_open(),
        }
    }
}

fn read_size(options: &Options) -> usize {
    options
        .get("size")
        .and_then(serde_json::Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_READ_SIZE)
}
