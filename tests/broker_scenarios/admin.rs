// ABOUTME: Worker admin commands through a live worker: list, log, kill

use std::time::Duration;

use connbroker::broker::{ClientError, Protocol};

use super::fixtures::{blocking, http_responder, http_response, start_broker, tcp_echo, test_config};

#[tokio::test(flavor = "multi_thread")]
async fn test_list_groups_handles_by_protocol() {
    let broker = start_broker(test_config()).await;
    let echo = tcp_echo();
    let url = http_responder(http_response("200 OK", b"")).await;

    let (tcp_id, http_id, listing) = blocking(move || {
        let mut tcp = broker.client.connect();
        let tcp_id = tcp.open(Protocol::Tcp, "127.0.0.1", echo).unwrap();
        let mut http = broker.client.connect();
        let http_id = http.open(Protocol::Http, &url, 0).unwrap();
        (tcp_id, http_id, tcp.list().unwrap())
    })
    .await;

    assert_eq!(listing.tcp, vec![tcp_id]);
    assert_eq!(listing.http, vec![http_id]);
    assert!(listing.udp.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_log_is_empty_on_fresh_worker() {
    let broker = start_broker(test_config()).await;
    let msg = blocking(move || broker.client.connect().log().unwrap()).await;
    assert_eq!(msg, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_handle_is_not_found() {
    let broker = start_broker(test_config()).await;

    let err = blocking(move || {
        let mut conn = broker.client.connect();
        conn.attach("missing-handle".into());
        conn.close().unwrap_err()
    })
    .await;

    assert!(matches!(err, ClientError::Failed { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_kill_stops_worker() {
    let broker = start_broker(test_config()).await;
    let client = broker.client.clone();

    blocking(move || client.connect().kill().unwrap()).await;

    tokio::time::timeout(Duration::from_secs(5), broker.worker)
        .await
        .expect("worker did not stop")
        .unwrap();

    let client = broker.client.clone();
    let err = blocking(move || client.connect().list().unwrap_err()).await;
    assert!(matches!(err, ClientError::BrokerUnreachable { .. }));
}
