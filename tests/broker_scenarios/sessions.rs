// ABOUTME: TCP and UDP handle lifecycle through a live worker

use connbroker::broker::codec::FailureKind;
use connbroker::broker::{ClientError, Protocol};

use super::fixtures::{blocking, start_broker, tcp_echo, test_config, udp_echo};

#[tokio::test(flavor = "multi_thread")]
async fn test_tcp_write_read_echo() {
    let broker = start_broker(test_config()).await;
    let echo = tcp_echo();

    let data = blocking(move || {
        let mut conn = broker.client.connect();
        conn.open(Protocol::Tcp, "127.0.0.1", echo).unwrap();
        conn.write(b"ping").unwrap();
        conn.read().unwrap();
        let data = conn.data().unwrap();
        conn.close().unwrap();
        data
    })
    .await;

    assert_eq!(data.as_deref(), Some(&b"ping"[..]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_udp_write_read_echo() {
    let broker = start_broker(test_config()).await;
    let echo = udp_echo();

    let data = blocking(move || {
        let mut conn = broker.client.connect();
        conn.open(Protocol::Udp, "127.0.0.1", echo).unwrap();
        conn.write(b"hello udp").unwrap();
        conn.read().unwrap();
        conn.data().unwrap()
    })
    .await;

    assert_eq!(data.as_deref(), Some(&b"hello udp"[..]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_then_close_leaves_registry_empty() {
    let broker = start_broker(test_config()).await;
    let echo = tcp_echo();

    let listing = blocking(move || {
        let mut conn = broker.client.connect();
        let id = conn.open(Protocol::Tcp, "127.0.0.1", echo).unwrap();
        assert!(conn.list().unwrap().contains(&id));
        conn.close().unwrap();
        conn.list().unwrap()
    })
    .await;

    assert!(listing.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dual_link_opens_two_handles() {
    let broker = start_broker(test_config()).await;
    let echo = tcp_echo();

    let (listing, after_close) = blocking(move || {
        let mut conn = broker.client.connect();
        let (id, id2) = conn.open_dual(Protocol::Tcp, "127.0.0.1", echo).unwrap();
        assert_ne!(id, id2);
        let listing = conn.list().unwrap();
        conn.close().unwrap();
        conn.close().unwrap();
        (listing, conn.list().unwrap())
    })
    .await;

    assert_eq!(listing.tcp.len(), 2);
    assert!(after_close.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_refused_is_reported() {
    let broker = start_broker(test_config()).await;
    let closed_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let (err, log) = blocking(move || {
        let mut conn = broker.client.connect();
        let err = conn.open(Protocol::Tcp, "127.0.0.1", closed_port).unwrap_err();
        (err, conn.log().unwrap())
    })
    .await;

    assert!(matches!(
        err,
        ClientError::Failed {
            kind: FailureKind::Connect,
            ..
        }
    ));
    assert!(log.is_some_and(|msg| msg.contains("failed")));
}
