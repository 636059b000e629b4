// ABOUTME: Bounded retry with per-URL failure counters and backoff
//
// Counters are process-wide and never reset except by restart. Once a URL's
// counter reaches the limit every later read of that URL is exhausted
// immediately, without touching the network.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::json;
use tracing::{debug, warn};

use super::config::BackoffPolicy;
use super::error::{BrokerError, BrokerResult};

/// Marker stored in the terminal failure payload
pub const OVERTIME: &str = "overtime";

// === Backoff ===

/// Delay calculator driven by a `BackoffPolicy`
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,

    /// Current attempt number (0-indexed)
    current_attempt: u32,
}

impl Backoff {
    pub const fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current_attempt: 0,
        }
    }

    /// Next delay; exponential policies return `min(base * 2^attempt, max)`
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.policy {
            BackoffPolicy::Fixed { delay } => delay,
            BackoffPolicy::Exponential { base, max } => {
                let multiplier = 2u64.saturating_pow(self.current_attempt);
                let base_millis = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
                let delay = Duration::from_millis(base_millis.saturating_mul(multiplier));
                std::cmp::min(delay, max)
            }
        };
        self.current_attempt = self.current_attempt.saturating_add(1);
        delay
    }

    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}

// === Attempt outcome ===

/// Result of running an operation under the retry manager
#[derive(Debug)]
pub enum Attempt {
    /// The operation produced bytes
    Success(Vec<u8>),
    /// The URL's failure counter reached the limit
    Exhausted {
        url: String,
        attempts: u32,
        last_error: Option<String>,
    },
    /// A failure that retrying cannot fix
    Fatal(BrokerError),
}

impl Attempt {
    /// Bytes to store on the handle: the data, or an explicit failure payload
    pub fn into_payload(self) -> Vec<u8> {
        match self {
            Self::Success(bytes) => bytes,
            Self::Exhausted {
                url,
                attempts,
                last_error,
            } => overtime_payload(&url, attempts, last_error.as_deref()),
            Self::Fatal(err) => serde_json::to_vec(&json!({
                "error": err.kind(),
                "reason": err.to_string(),
            }))
            .unwrap_or_default(),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// `{"error":"overtime","url":..,"attempts":N}` as JSON bytes
pub fn overtime_payload(url: &str, attempts: u32, last_error: Option<&str>) -> Vec<u8> {
    let mut payload = json!({
        "error": OVERTIME,
        "url": url,
        "attempts": attempts,
    });
    if let Some(reason) = last_error {
        payload["reason"] = json!(reason);
    }
    serde_json::to_vec(&payload).unwrap_or_default()
}

// === Retry Manager ===

/// Per-URL failure accounting shared by every handle of a worker
#[derive(Debug)]
pub struct RetryManager {
    counters: Mutex<HashMap<String, u32>>,
    policy: BackoffPolicy,
}

impl RetryManager {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Failures recorded so far for `url`
    pub fn failures(&self, url: &str) -> u32 {
        self.counters
            .lock()
            .map(|counters| counters.get(url).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record_failure(&self, url: &str) -> u32 {
        match self.counters.lock() {
            Ok(mut counters) => {
                let count = counters.entry(url.to_string()).or_insert(0);
                *count = count.saturating_add(1);
                *count
            }
            Err(poisoned) => {
                let mut counters = poisoned.into_inner();
                let count = counters.entry(url.to_string()).or_insert(0);
                *count = count.saturating_add(1);
                *count
            }
        }
    }

    /// Run `op` against `state` until it succeeds, fails fatally, or the
    /// URL has used up `max_attempts` invocations.
    pub async fn attempt<S, F>(
        &self,
        url: &str,
        max_attempts: u32,
        state: &mut S,
        mut op: F,
    ) -> Attempt
    where
        S: Send,
        F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, BrokerResult<Vec<u8>>> + Send,
    {
        let mut backoff = Backoff::new(self.policy);
        let mut last_error = None;

        loop {
            let failures = self.failures(url);
            if failures >= max_attempts {
                warn!(url = %url, attempts = failures, "Retries exhausted");
                return Attempt::Exhausted {
                    url: url.to_string(),
                    attempts: failures,
                    last_error,
                };
            }

            match op(state).await {
                Ok(bytes) => {
                    debug!(url = %url, bytes = bytes.len(), "Read succeeded");
                    return Attempt::Success(bytes);
                }
                Err(err) if err.is_retryable() => {
                    let failures = self.record_failure(url);
                    warn!(
                        url = %url,
                        attempt = failures,
                        max_attempts,
                        error = %err,
                        "Read failed"
                    );
                    last_error = Some(err.to_string());
                    if failures < max_attempts {
                        tokio::time::sleep(backoff.next_delay()).await;
                    }
                }
                Err(err) => {
                    warn!(url = %url, error = %err, "Read failed, not retryable");
                    return Attempt::Fatal(err);
                }
            }
        }
    }
}
