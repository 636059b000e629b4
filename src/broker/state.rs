// ABOUTME: Per-worker broker state and the bounded log queue served by `log`

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use super::chain::ChainRegistry;
use super::config::BrokerConfig;
use super::executor::SessionLimits;
use super::registry::HandlerRegistry;
use super::retry::RetryManager;
use super::storage::{StorageSink, TracingSink};

// === Log Queue ===

/// Bounded FIFO of operator-facing messages; the oldest is dropped when full
#[derive(Debug)]
pub struct LogQueue {
    messages: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl LogQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, message: impl Into<String>) {
        let mut messages = match self.messages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if messages.len() >= self.capacity {
            messages.pop_front();
        }
        messages.push_back(message.into());
    }

    /// Dequeue the oldest pending message
    pub fn pop(&self) -> Option<String> {
        match self.messages.lock() {
            Ok(mut guard) => guard.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// === Broker State ===

/// Everything one worker owns, shared by reference with each dispatch
pub struct BrokerState {
    pub config: Arc<BrokerConfig>,
    pub limits: SessionLimits,
    pub registry: HandlerRegistry,
    pub retry: RetryManager,
    pub log: LogQueue,
    pub chains: ChainRegistry,
    pub sink: Arc<dyn StorageSink>,
    /// Flipped once by `kill`; in-flight reads stop when they see it
    shutdown: watch::Sender<bool>,
}

impl BrokerState {
    /// State with the built-in chains and a tracing-only storage sink
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    pub fn with_sink(config: BrokerConfig, sink: Arc<dyn StorageSink>) -> Self {
        Self {
            limits: SessionLimits::from(&config),
            registry: HandlerRegistry::new(),
            retry: RetryManager::new(config.backoff),
            log: LogQueue::new(config.log_queue_capacity),
            chains: ChainRegistry::with_builtins(),
            sink,
            shutdown: watch::channel(false).0,
            config: Arc::new(config),
        }
    }

    /// Signal the accept loop and every background read to stop
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once `shutdown` has been called, including before the call
    pub async fn stopped(&self) {
        let mut rx = self.shutdown.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl std::fmt::Debug for BrokerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerState")
            .field("config", &self.config)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}
