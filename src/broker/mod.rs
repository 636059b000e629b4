// ABOUTME: Local connection broker multiplexing TCP, UDP and HTTP sessions
//
// Short-lived clients share a pool of long-running workers, each bound to
// its own loopback port. A worker owns its handles, retries failed reads per
// URL and hands results back in bounded chunks.
//
// Key components:
// - codec: control frame tags, versioned JSON bodies, chunking
// - registry: handle ids and their open sessions
// - executor: TCP/UDP/HTTP sessions with bounded waits
// - retry: per-URL failure counters and backoff
// - chain: named extensions that drive extra read rounds
// - dispatcher / server: one command per control connection
// - pool / client: worker addressing and the synchronous façade

pub mod chain;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod pool;
pub mod registry;
pub mod retry;
pub mod server;
pub mod state;
pub mod storage;

// Re-exports for convenient access
pub use client::{BrokerClient, ClientError, ClientResult, Connection};
pub use codec::{Command, Listing, Options, Protocol, Reply, Request};
pub use config::{BackoffPolicy, BrokerConfig, ConfigError};
pub use error::{BrokerError, BrokerResult};
pub use executor::probe;
pub use pool::{PoolError, PoolLayout, WorkerPool};
pub use registry::HandleId;
pub use server::{BrokerServer, ServerError};
pub use state::BrokerState;
pub use storage::{HandleMeta, StorageSink, TracingSink};
