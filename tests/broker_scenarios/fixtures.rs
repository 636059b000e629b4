// ABOUTME: Shared fixtures for broker scenarios: a worker on an ephemeral port,
// a TCP echo peer, a UDP echo peer, and a canned HTTP responder

use std::io::{Read, Write};
use std::net::{TcpListener, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use connbroker::broker::pool::PoolLayout;
use connbroker::broker::{BackoffPolicy, BrokerClient, BrokerConfig, BrokerServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

/// Config with short timeouts and a fast fixed backoff
pub fn test_config() -> BrokerConfig {
    BrokerConfig {
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(3),
        chunk_timeout: Duration::from_secs(2),
        udp_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
        backoff: BackoffPolicy::Fixed {
            delay: Duration::from_millis(10),
        },
        ..BrokerConfig::default()
    }
}

/// A running worker and a client pointed at it
pub struct TestBroker {
    pub client: BrokerClient,
    pub port: u16,
    pub worker: JoinHandle<()>,
}

/// Bind a worker on an ephemeral loopback port and run it
pub async fn start_broker(config: BrokerConfig) -> TestBroker {
    let server = BrokerServer::bind(config.clone(), 0).await.unwrap();
    let port = server.local_addr().unwrap().port();
    let worker = tokio::spawn(server.run());

    let layout = PoolLayout {
        host: config.host.clone(),
        base_port: port,
        size: 1,
    };
    TestBroker {
        client: BrokerClient::with_layout(layout, &config),
        port,
        worker,
    }
}

/// TCP peer that echoes every connection back; returns its port
pub fn tcp_echo() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else {
                return;
            };
            thread::spawn(move || {
                let mut buf = [0u8; 4096];
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 || stream.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            });
        }
    });
    port
}

/// UDP peer that echoes every datagram; returns its port
pub fn udp_echo() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = socket.local_addr().unwrap().port();
    thread::spawn(move || {
        let mut buf = [0u8; 2048];
        while let Ok((n, peer)) = socket.recv_from(&mut buf) {
            let _ = socket.send_to(&buf[..n], peer);
        }
    });
    port
}

/// HTTP/1.1 response with the given status line and body
pub fn http_response(status: &str, body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

/// Answer every connection with `response`; returns the base URL
pub async fn http_responder(response: Vec<u8>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let response = Arc::new(response);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let response = Arc::clone(&response);
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://127.0.0.1:{port}/")
}

/// Run blocking client code off the runtime
pub async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap()
}
