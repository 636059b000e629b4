// ABOUTME: HTTP reads through a live worker: plain bodies, retry exhaustion,
// and bodies larger than one data chunk

use connbroker::broker::{BrokerConfig, Options, Protocol};
use serde_json::{json, Value};

use super::fixtures::{blocking, http_responder, http_response, start_broker, test_config};

#[tokio::test(flavor = "multi_thread")]
async fn test_get_returns_body() {
    let broker = start_broker(test_config()).await;
    let url = http_responder(http_response("200 OK", b"hello")).await;

    let body = blocking(move || {
        let mut conn = broker.client.connect();
        let body = conn.get(&url, Options::new()).unwrap();
        conn.close().unwrap();
        body
    })
    .await;

    assert_eq!(body.as_deref(), Some(&b"hello"[..]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_post_returns_body() {
    let broker = start_broker(test_config()).await;
    let url = http_responder(http_response("200 OK", b"created")).await;

    let body = blocking(move || {
        let mut conn = broker.client.connect();
        conn.post(&url, Value::from("a=1"), Options::new()).unwrap()
    })
    .await;

    assert_eq!(body.as_deref(), Some(&b"created"[..]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_error_exhausts_retries() {
    let config = BrokerConfig {
        max_attempts: 2,
        ..test_config()
    };
    let broker = start_broker(config).await;
    let url = http_responder(http_response("500 Internal Server Error", b"")).await;

    let (body, listing, log) = blocking(move || {
        let mut conn = broker.client.connect();
        let body = conn.get(&url, Options::new()).unwrap();
        (body, conn.list().unwrap(), conn.log().unwrap())
    })
    .await;

    let payload: Value = serde_json::from_slice(&body.unwrap()).unwrap();
    assert_eq!(payload["error"], json!("overtime"));
    assert_eq!(payload["attempts"], json!(2));

    // the failed handle stays until closed
    assert_eq!(listing.http.len(), 1);
    assert!(log.is_some_and(|msg| msg.contains("failed")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_large_body_is_reassembled() {
    let config = test_config();
    assert!(config.chunk_size < 100_000);
    let broker = start_broker(config).await;

    let body: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let url = http_responder(http_response("200 OK", &body)).await;

    let fetched = blocking(move || {
        let mut conn = broker.client.connect();
        conn.get(&url, Options::new()).unwrap()
    })
    .await;

    assert_eq!(fetched.unwrap(), body);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reserved_options_are_not_echoed() {
    let broker = start_broker(test_config()).await;
    let url = http_responder(http_response("200 OK", b"ok")).await;

    let merged = blocking(move || {
        let mut conn = broker.client.connect();
        conn.open(Protocol::Http, &url, 0).unwrap();
        let options = match json!({"selector": "a|b", "store": "db", "method": "get"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        conn.options(options).unwrap()
    })
    .await;

    assert_eq!(Value::Object(merged), json!({"method": "get"}));
}
