// ABOUTME: Synchronous client façade speaking the control protocol
//
// Each call opens a fresh loopback connection, sends one request and reads
// reply frames until the broker closes the socket. A Connection picks a
// worker port once and keeps it, since handles live in that worker only.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::codec::{
    decode_reply, encode_request, Command, CodecError, CreateRequest, FailureKind, Listing,
    Options, Protocol, Reassembler, Reply, Request, TERMINATOR,
};
use super::config::BrokerConfig;
use super::pool::{PoolError, PoolLayout};
use super::registry::HandleId;

/// Interval between polls in `data_wait`
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors surfaced to application code
#[derive(Debug, Error)]
pub enum ClientError {
    /// Nothing listens on the worker port
    #[error("Broker unreachable at {addr}: {source}. Start the workers with `connbroker pool start`")]
    BrokerUnreachable {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Socket failure after connecting
    #[error("I/O error talking to {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Reply frame could not be decoded or reassembled
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The broker answered with a `failed` frame
    #[error("Broker reported {kind:?}: {reason}")]
    Failed { kind: FailureKind, reason: String },

    /// A reply of the wrong shape for the command
    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: Command, reply: String },

    /// The connection closed before any reply frame
    #[error("No reply to {0}")]
    NoReply(Command),

    /// Operation needs an open handle
    #[error("Connection has no open handle")]
    NoHandle,

    /// Pool layout could not be loaded
    #[error(transparent)]
    Pool(#[from] PoolError),
}

pub type ClientResult<T> = Result<T, ClientError>;

// === Broker Client ===

/// Entry point: knows the pool layout and hands out connections
#[derive(Debug, Clone)]
pub struct BrokerClient {
    layout: PoolLayout,
    connect_timeout: Duration,
    reply_timeout: Duration,
}

impl BrokerClient {
    /// Read the pool layout once from the count file
    pub fn new(config: &BrokerConfig) -> ClientResult<Self> {
        Ok(Self::with_layout(PoolLayout::load(config)?, config))
    }

    pub fn with_layout(layout: PoolLayout, config: &BrokerConfig) -> Self {
        // fetch-data waits for the read, which may use every attempt
        let reply_timeout = config
            .read_timeout
            .saturating_mul(config.max_attempts.saturating_add(1))
            .saturating_add(config.request_timeout);
        Self {
            layout,
            connect_timeout: config.connect_timeout,
            reply_timeout,
        }
    }

    pub const fn layout(&self) -> &PoolLayout {
        &self.layout
    }

    /// A connection on a randomly chosen worker
    pub fn connect(&self) -> Connection {
        let ports = self.layout.ports();
        let index = usize::try_from(Uuid::new_v4().as_u128() % ports.len().max(1) as u128)
            .unwrap_or_default();
        let port = ports.get(index).copied().unwrap_or(self.layout.base_port);
        self.connect_to(port)
    }

    /// A connection on a specific worker port
    pub fn connect_to(&self, port: u16) -> Connection {
        Connection {
            addr: self.layout.addr(port),
            port,
            id: None,
            id2: None,
            connect_timeout: self.connect_timeout,
            reply_timeout: self.reply_timeout,
        }
    }

    /// Send `kill` to every worker of the pool
    pub fn stop_all(&self) -> Vec<(u16, ClientResult<()>)> {
        self.layout
            .ports()
            .into_iter()
            .map(|port| (port, self.connect_to(port).kill()))
            .collect()
    }
}

// === Connection ===

/// A logical connection: one worker port and at most two handle ids
#[derive(Debug, Clone)]
pub struct Connection {
    addr: String,
    port: u16,
    id: Option<HandleId>,
    id2: Option<HandleId>,
    connect_timeout: Duration,
    reply_timeout: Duration,
}

impl Connection {
    pub const fn port(&self) -> u16 {
        self.port
    }

    pub const fn id(&self) -> Option<&HandleId> {
        self.id.as_ref()
    }

    /// Second id of a dual-link create
    pub const fn id2(&self) -> Option<&HandleId> {
        self.id2.as_ref()
    }

    /// Reuse an existing handle id on this worker
    pub fn attach(&mut self, id: HandleId) {
        self.id = Some(id);
        self.id2 = None;
    }

    // --- handle lifecycle ---

    pub fn open(&mut self, protocol: Protocol, host: &str, port: u16) -> ClientResult<HandleId> {
        let (id, _) = self.open_with(CreateRequest::new(protocol, host, port))?;
        Ok(id)
    }

    /// Open two independent handles to the same target
    pub fn open_dual(
        &mut self,
        protocol: Protocol,
        host: &str,
        port: u16,
    ) -> ClientResult<(HandleId, HandleId)> {
        let mut request = CreateRequest::new(protocol, host, port);
        request.dual_link = true;
        match self.open_with(request)? {
            (id, Some(id2)) => Ok((id, id2)),
            (id, None) => Err(ClientError::UnexpectedReply {
                command: Command::Create,
                reply: format!("single id {id} for dual-link create"),
            }),
        }
    }

    pub fn open_with(
        &mut self,
        request: CreateRequest,
    ) -> ClientResult<(HandleId, Option<HandleId>)> {
        match self.call_one(&Request::Create(request))? {
            Reply::Created { id, id2 } => {
                self.id = Some(id.clone());
                self.id2.clone_from(&id2);
                Ok((id, id2))
            }
            other => Err(unexpected(Command::Create, &other)),
        }
    }

    /// Merge options into the handle; returns the merged map
    pub fn options(&self, options: Options) -> ClientResult<Options> {
        let id = self.require_id()?;
        match self.call_one(&Request::SetOptions { id, options })? {
            Reply::Options { options, .. } => Ok(options),
            other => Err(unexpected(Command::SetOptions, &other)),
        }
    }

    /// Trigger a read; bytes are collected with `data`
    pub fn read(&self) -> ClientResult<()> {
        let id = self.require_id()?;
        self.expect_accepted(Command::Read, &Request::Read { id })
    }

    pub fn write(&self, data: &[u8]) -> ClientResult<()> {
        let id = self.require_id()?;
        self.expect_accepted(
            Command::Write,
            &Request::Write {
                id,
                data: data.to_vec(),
            },
        )
    }

    /// Stored bytes of the handle, reassembled from chunks
    pub fn data(&self) -> ClientResult<Option<Vec<u8>>> {
        let id = self.require_id()?;
        let replies = self.call(&Request::FetchData { id: id.clone() })?;

        let mut reassembler = Reassembler::new(id);
        for reply in replies {
            match reply {
                Reply::Data(frame) => {
                    reassembler.push(frame)?;
                }
                other => return Err(unexpected(Command::FetchData, &other)),
            }
        }
        if !reassembler.is_complete() {
            return Err(ClientError::NoReply(Command::FetchData));
        }
        Ok(reassembler.finish())
    }

    /// Poll `data` until it is non-null or `limit` passes
    pub fn data_wait(&self, limit: Duration) -> ClientResult<Option<Vec<u8>>> {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(data) = self.data()? {
                return Ok(Some(data));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn close(&mut self) -> ClientResult<()> {
        let id = self.require_id()?;
        self.expect_accepted(Command::Close, &Request::Close { id })?;
        self.id = self.id2.take();
        Ok(())
    }

    // --- HTTP helpers ---

    /// Open an HTTP handle, GET it, and return the body.
    ///
    /// Exhausted retries come back as the failure payload, not an error.
    pub fn get(&mut self, url: &str, options: Options) -> ClientResult<Option<Vec<u8>>> {
        self.http("get", url, options)
    }

    /// Like `get`, sending `data` as the body (string) or form (object)
    pub fn post(&mut self, url: &str, data: Value, mut options: Options) -> ClientResult<Option<Vec<u8>>> {
        options.insert("data".to_string(), data);
        self.http("post", url, options)
    }

    fn http(&mut self, method: &str, url: &str, mut options: Options) -> ClientResult<Option<Vec<u8>>> {
        self.open(Protocol::Http, url, 0)?;
        options.insert("method".to_string(), Value::from(method));
        self.options(options)?;
        self.read()?;
        self.data()
    }

    // --- worker admin ---

    pub fn list(&self) -> ClientResult<Listing> {
        match self.call_one(&Request::List)? {
            Reply::Listing(listing) => Ok(listing),
            other => Err(unexpected(Command::List, &other)),
        }
    }

    /// Oldest pending log message of the worker
    pub fn log(&self) -> ClientResult<Option<String>> {
        match self.call_one(&Request::Log)? {
            Reply::Log { msg } => Ok(msg),
            other => Err(unexpected(Command::Log, &other)),
        }
    }

    /// Stop the worker; it closes the connection without replying
    pub fn kill(&self) -> ClientResult<()> {
        let replies = self.call(&Request::Kill)?;
        if !replies.is_empty() {
            warn!(port = self.port, "Worker replied to kill");
        }
        Ok(())
    }

    // --- transport ---

    fn require_id(&self) -> ClientResult<HandleId> {
        self.id.clone().ok_or(ClientError::NoHandle)
    }

    fn expect_accepted(&self, command: Command, request: &Request) -> ClientResult<()> {
        match self.call_one(request)? {
            Reply::Accepted { .. } => Ok(()),
            other => Err(unexpected(command, &other)),
        }
    }

    fn call_one(&self, request: &Request) -> ClientResult<Reply> {
        self.call(request)?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::NoReply(request.command()))
    }

    /// Send one request and collect every reply frame.
    ///
    /// A `failed` frame becomes `ClientError::Failed`.
    fn call(&self, request: &Request) -> ClientResult<Vec<Reply>> {
        let frame = encode_request(request)?;
        let mut stream = self.dial()?;
        let io_err = |source| ClientError::Io {
            addr: self.addr.clone(),
            source,
        };

        stream.set_read_timeout(Some(self.reply_timeout)).map_err(io_err)?;
        stream.write_all(&frame).map_err(io_err)?;
        stream.flush().map_err(io_err)?;

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).map_err(io_err)?;
        debug!(command = %request.command(), bytes = raw.len(), "Broker replied");

        let mut replies = Vec::new();
        for line in raw.split(|b| *b == TERMINATOR).filter(|l| !l.is_empty()) {
            match decode_reply(line)? {
                Reply::Failed { kind, reason, .. } => {
                    return Err(ClientError::Failed { kind, reason });
                }
                reply => replies.push(reply),
            }
        }
        Ok(replies)
    }

    fn dial(&self) -> ClientResult<TcpStream> {
        let down = |source| ClientError::BrokerUnreachable {
            addr: self.addr.clone(),
            source,
        };
        let addr = self
            .addr
            .to_socket_addrs()
            .map_err(down)?
            .next()
            .ok_or_else(|| {
                down(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "address did not resolve",
                ))
            })?;
        TcpStream::connect_timeout(&addr, self.connect_timeout).map_err(down)
    }
}

fn unexpected(command: Command, reply: &Reply) -> ClientError {
    ClientError::UnexpectedReply {
        command,
        reply: format!("{reply:?}"),
    }
}
