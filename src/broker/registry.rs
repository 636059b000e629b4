// ABOUTME: Handler registry mapping handle ids to open TCP/UDP/HTTP sessions
//
// Owns every Handle created by this worker:
// - Ids are `<unix-millis>-<8 hex>` and never reused within a process
// - Each handle sits behind its own async mutex; holding it serializes
//   every operation on that handle
// - `remove` closes the session before the record is dropped

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use super::chain::{Chain, ChainRegistry};
use super::codec::{Listing, Options, Protocol};
use super::error::{BrokerError, BrokerResult};
use super::executor::Session;
use super::storage::HandleMeta;

// === Handle ID ===

/// Opaque identifier of a brokered session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(String);

impl HandleId {
    /// Generate a time-prefixed id with a random suffix
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for HandleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for HandleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// === Handle ===

/// Lifecycle position of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Created,
    OptionsSet,
    Reading,
    DataReady,
    /// Retries exhausted; data holds the failure payload
    Failed,
    Closed,
}

/// Option keys lifted out of the passthrough map into handle fields
const RESERVED_KEYS: [&str; 5] = ["selector", "db_to_save", "store", "session_name", "chain"];

/// One brokered session and everything the broker knows about it
pub struct Handle {
    pub id: HandleId,
    pub protocol: Protocol,
    pub session: Session,
    /// Passthrough keyword arguments for the executor and chain
    pub options: Options,
    pub selector: Vec<String>,
    /// Destination store name handed to the storage sink
    pub store: Option<String>,
    pub session_name: String,
    pub chain: Option<Box<dyn Chain>>,
    /// Last fetched bytes
    pub data: Option<Vec<u8>>,
    /// Source URL (HTTP only)
    pub url: Option<String>,
    pub alive: bool,
    pub state: HandleState,
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("options", &self.options)
            .field("chain", &self.chain.is_some())
            .field("data_len", &self.data.as_ref().map(Vec::len))
            .field("alive", &self.alive)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Handle {
    /// Wrap a freshly opened session
    pub fn new(id: HandleId, session: Session) -> Self {
        let protocol = session.protocol();
        let url = matches!(protocol, Protocol::Http).then(|| session.target());
        Self {
            id,
            protocol,
            session,
            options: Options::new(),
            selector: Vec::new(),
            store: None,
            session_name: "default".to_string(),
            chain: None,
            data: None,
            url,
            alive: true,
            state: HandleState::Created,
        }
    }

    /// Merge options, lifting reserved keys into handle fields.
    ///
    /// Returns the merged passthrough map. On error the handle is left
    /// unchanged.
    pub fn set_options(
        &mut self,
        mut options: Options,
        chains: &ChainRegistry,
    ) -> BrokerResult<Options> {
        let reserved: Vec<(&str, Value)> = RESERVED_KEYS
            .iter()
            .filter_map(|key| options.remove(*key).map(|v| (*key, v)))
            .collect();
        let mut merged = self.options.clone();
        merged.extend(options);

        // Resolved against the merged options before anything is committed
        let chain = match reserved.iter().find(|(key, _)| *key == "chain") {
            Some((_, value)) => Some(
                value_as_string(value)
                    .map(|name| chains.build(&name, &merged))
                    .transpose()?,
            ),
            None => None,
        };

        self.options = merged;
        if let Some(chain) = chain {
            self.chain = chain;
        }
        for (key, value) in reserved {
            match key {
                "selector" => self.selector = parse_selector(&value),
                "db_to_save" | "store" => self.store = value_as_string(&value),
                "session_name" => {
                    if let Some(name) = value_as_string(&value) {
                        self.session_name = name;
                    }
                }
                _ => {}
            }
        }

        if self.state == HandleState::Created {
            self.state = HandleState::OptionsSet;
        }
        Ok(self.options.clone())
    }

    /// One executor read with the current options
    pub async fn read_once(&mut self) -> BrokerResult<Vec<u8>> {
        self.session.read(&self.options).await
    }

    /// Snapshot handed to the storage sink
    pub fn meta(&self) -> HandleMeta {
        HandleMeta {
            protocol: self.protocol,
            url: self.url.clone(),
            selector: self.selector.clone(),
            store: self.store.clone(),
            session_name: self.session_name.clone(),
            failed: self.state == HandleState::Failed,
        }
    }

    /// Close the underlying session; safe to call more than once
    pub async fn close(&mut self) {
        self.session.close().await;
        self.alive = false;
        if self.state != HandleState::Failed {
            self.state = HandleState::Closed;
        }
    }
}

/// Selector given as `"a|b|c"` or `["a", "b", "c"]`
fn parse_selector(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Value::Array(items) => items.iter().filter_map(value_as_string).collect(),
        _ => Vec::new(),
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

// === Registry ===

/// Shared reference to a registered handle
pub type HandleRef = Arc<Mutex<Handle>>;

struct Entry {
    protocol: Protocol,
    handle: HandleRef,
}

/// In-memory table of the handles owned by this worker
#[derive(Default)]
pub struct HandlerRegistry {
    handles: RwLock<HashMap<HandleId, Entry>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already opened session under a fresh id
    pub async fn create(&self, session: Session) -> BrokerResult<HandleId> {
        self.insert(Handle::new(HandleId::generate(), session)).await
    }

    /// Register a handle; an id collision is an error, never an overwrite
    pub async fn insert(&self, handle: Handle) -> BrokerResult<HandleId> {
        let id = handle.id.clone();
        let protocol = handle.protocol;

        let mut handles = self.handles.write().await;
        if handles.contains_key(&id) {
            return Err(BrokerError::DuplicateHandle(id));
        }
        handles.insert(
            id.clone(),
            Entry {
                protocol,
                handle: Arc::new(Mutex::new(handle)),
            },
        );

        debug!(id = %id, protocol = %protocol, "Handle registered");
        Ok(id)
    }

    pub async fn get(&self, id: &HandleId) -> BrokerResult<HandleRef> {
        self.handles
            .read()
            .await
            .get(id)
            .map(|entry| Arc::clone(&entry.handle))
            .ok_or_else(|| BrokerError::HandleNotFound(id.clone()))
    }

    /// Close the session, then drop the record.
    ///
    /// Returns `false` when no such handle exists.
    pub async fn remove(&self, id: &HandleId) -> bool {
        let Ok(handle) = self.get(id).await else {
            return false;
        };

        // Waits for any read in flight on this handle
        handle.lock().await.close().await;

        let removed = self.handles.write().await.remove(id).is_some();
        if removed {
            debug!(id = %id, "Handle removed");
        }
        removed
    }

    /// Live handle ids grouped by protocol, sorted
    pub async fn list_all(&self) -> Listing {
        let handles = self.handles.read().await;
        let mut listing = Listing::default();
        for (id, entry) in handles.iter() {
            let bucket = match entry.protocol {
                Protocol::Tcp => &mut listing.tcp,
                Protocol::Udp => &mut listing.udp,
                Protocol::Http => &mut listing.http,
            };
            bucket.push(id.clone());
        }
        listing.tcp.sort();
        listing.udp.sort();
        listing.http.sort();
        listing
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }

    /// Close every session and empty the table
    pub async fn close_all(&self) {
        let entries: Vec<HandleRef> = self
            .handles
            .write()
            .await
            .drain()
            .map(|(_, entry)| entry.handle)
            .collect();
        for handle in entries {
            handle.lock().await.close().await;
        }
    }
}
