// ABOUTME: Storage collaborator boundary invoked after every completed read

use serde::Serialize;
use tracing::info;

use super::codec::Protocol;
use super::registry::HandleId;

/// Handle attributes passed along with the raw bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleMeta {
    pub protocol: Protocol,
    pub url: Option<String>,
    pub selector: Vec<String>,
    pub store: Option<String>,
    pub session_name: String,
    /// Bytes are the terminal failure payload
    pub failed: bool,
}

/// Receives the bytes of each completed read.
///
/// Persistence backends and content extraction live behind this trait.
#[cfg_attr(test, mockall::automock)]
pub trait StorageSink: Send + Sync {
    fn save(&self, id: &HandleId, meta: &HandleMeta, data: &[u8]);
}

/// Default sink: records the event and discards the bytes
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StorageSink for TracingSink {
    fn save(&self, id: &HandleId, meta: &HandleMeta, data: &[u8]) {
        info!(
            id = %id,
            protocol = %meta.protocol,
            store = ?meta.store,
            failed = meta.failed,
            bytes = data.len(),
            "Read stored"
        );
    }
}
