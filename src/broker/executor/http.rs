// ABOUTME: HTTP executor: one GET/POST per read with a bounded body drain
//
// Opening a session builds a client (connection pool + cookie jar) but sends
// nothing. Non-200 responses come back as HttpStatus errors for the retry
// manager. The body is pulled chunk by chunk; a chunk that does not arrive
// within the chunk timeout ends the body with whatever was received.

use std::time::{Duration, Instant};

use reqwest::{Client, Proxy, RequestBuilder, StatusCode};
use serde_json::Value;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use super::SessionLimits;
use crate::broker::codec::Options;
use crate::broker::error::{BrokerError, BrokerResult};

/// A reusable HTTP client bound to one URL
#[derive(Debug)]
pub struct HttpSession {
    url: String,
    client: Option<Client>,
    proxy: Option<String>,
    limits: SessionLimits,
}

impl HttpSession {
    /// Session with default timeouts
    pub fn new(url: &str) -> BrokerResult<Self> {
        Self::open(url, SessionLimits::default())
    }

    /// Validate the URL and build the client; no request is sent
    pub fn open(url: &str, limits: SessionLimits) -> BrokerResult<Self> {
        let parsed = Url::parse(url).map_err(|e| BrokerError::connect(url, e))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BrokerError::Unsupported(format!(
                "URL scheme {}",
                parsed.scheme()
            )));
        }

        Ok(Self {
            url: url.to_string(),
            client: Some(build_client(url, None, limits)?),
            proxy: None,
            limits,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one request shaped by `options` and drain the body
    pub async fn read(&mut self, options: &Options) -> BrokerResult<Vec<u8>> {
        let proxy = options
            .get("proxy")
            .and_then(Value::as_str)
            .map(String::from);
        if self.client.is_some() && proxy != self.proxy {
            debug!(url = %self.url, proxy = ?proxy, "Rebuilding HTTP client for proxy change");
            self.client = Some(build_client(&self.url, proxy.as_deref(), self.limits)?);
            self.proxy = proxy;
        }
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| BrokerError::SessionClosed(self.url.clone()))?;

        let request = build_request(client, &self.url, options)?;
        let send_timeout = options
            .get("timeout_ms")
            .and_then(Value::as_u64)
            .map_or(self.limits.read_timeout, Duration::from_millis);

        let mut response = match timeout(send_timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => return Err(self.timed_out(send_timeout)),
            Ok(Err(e)) => return Err(BrokerError::connect(self.url.as_str(), e)),
            Err(_) => return Err(self.timed_out(send_timeout)),
        };

        let status = response.status();
        if status != StatusCode::OK {
            return Err(BrokerError::HttpStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let started = Instant::now();
        let mut body = Vec::new();
        loop {
            if started.elapsed() >= self.limits.read_timeout {
                debug!(url = %self.url, bytes = body.len(), "Body drain deadline reached");
                break;
            }
            match timeout(self.limits.chunk_timeout, response.chunk()).await {
                Ok(Ok(Some(chunk))) => body.extend_from_slice(&chunk),
                Ok(Ok(None)) => break,
                Ok(Err(e)) => return Err(BrokerError::connect(self.url.as_str(), e)),
                Err(_) => {
                    debug!(url = %self.url, bytes = body.len(), "Body chunk stalled, keeping partial body");
                    break;
                }
            }
        }

        debug!(url = %self.url, status = status.as_u16(), bytes = body.len(), "HTTP read complete");
        Ok(body)
    }

    #[allow(clippy::unused_self)]
    pub fn write(&mut self, _data: &[u8]) -> BrokerResult<()> {
        Err(BrokerError::Unsupported(
            "write on an HTTP handle".to_string(),
        ))
    }

    pub fn close(&mut self) {
        self.client = None;
    }

    pub const fn is_open(&self) -> bool {
        self.client.is_some()
    }

    fn timed_out(&self, elapsed: Duration) -> BrokerError {
        BrokerError::ReadTimeout {
            target: self.url.clone(),
            elapsed,
        }
    }
}

fn build_client(url: &str, proxy: Option<&str>, limits: SessionLimits) -> BrokerResult<Client> {
    let mut builder = Client::builder()
        .cookie_store(true)
        .connect_timeout(limits.connect_timeout);
    builder = match proxy {
        Some(proxy) => builder.proxy(Proxy::all(proxy).map_err(|e| BrokerError::connect(url, e))?),
        None => builder.no_proxy(),
    };
    builder.build().map_err(|e| BrokerError::connect(url, e))
}

/// Apply `method`, `headers`, `params`, `data` and `json`
fn build_request(client: &Client, url: &str, options: &Options) -> BrokerResult<RequestBuilder> {
    let method = options
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("get")
        .to_ascii_lowercase();

    let mut request = match method.as_str() {
        "get" => client.get(url),
        "post" => client.post(url),
        other => {
            return Err(BrokerError::Unsupported(format!("HTTP method {other}")));
        }
    };

    if let Some(Value::Object(headers)) = options.get("headers") {
        for (name, value) in headers {
            request = request.header(name.as_str(), text(value));
        }
    }
    if let Some(Value::Object(params)) = options.get("params") {
        request = request.query(&pairs(params));
    }
    match options.get("data") {
        Some(Value::String(body)) => request = request.body(body.clone()),
        Some(Value::Object(form)) => request = request.form(&pairs(form)),
        _ => {}
    }
    if let Some(json) = options.get("json") {
        request = request.json(json);
    }

    Ok(request)
}

fn pairs(map: &Options) -> Vec<(String, String)> {
    map.iter().map(|(k, v)| (k.clone(), text(v))).collect()
}

/// Strings verbatim, everything else as compact JSON
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
