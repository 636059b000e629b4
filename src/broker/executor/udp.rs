// ABOUTME: UDP executor over a connected datagram socket

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::SessionLimits;
use crate::broker::error::{BrokerError, BrokerResult};

/// A UDP socket connected to one peer
#[derive(Debug)]
pub struct UdpSession {
    target: String,
    socket: Option<UdpSocket>,
    recv_timeout: Duration,
}

impl UdpSession {
    /// Resolve and connect; when `message` is given, send it and wait for
    /// one reply, returned as the initial data.
    pub async fn connect(
        host: &str,
        port: u16,
        message: Option<&[u8]>,
        limits: SessionLimits,
    ) -> BrokerResult<(Self, Option<Vec<u8>>)> {
        let target = format!("udp://{host}:{port}");

        let peer = match timeout(limits.connect_timeout, resolve(host, port)).await {
            Ok(Ok(peer)) => peer,
            Ok(Err(e)) => return Err(BrokerError::connect(target, e)),
            Err(_) => {
                return Err(BrokerError::connect(
                    target,
                    format!("resolve timed out after {:?}", limits.connect_timeout),
                ))
            }
        };

        let local: SocketAddr = if peer.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| BrokerError::connect(target.clone(), e))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| BrokerError::connect(target.clone(), e))?;

        let mut session = Self {
            target,
            socket: Some(socket),
            recv_timeout: limits.udp_timeout,
        };
        debug!(target = %session.target, "UDP session opened");

        let initial = match message {
            Some(message) => {
                session.write(message).await?;
                match session.read(super::DEFAULT_READ_SIZE).await {
                    Ok(reply) => Some(reply),
                    Err(e) => {
                        warn!(target = %session.target, error = %e, "No reply to initial datagram");
                        None
                    }
                }
            }
            None => None,
        };

        Ok((session, initial))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Receive one datagram of at most `size` bytes
    pub async fn read(&mut self, size: usize) -> BrokerResult<Vec<u8>> {
        let socket = self.socket.as_ref().ok_or_else(|| closed(&self.target))?;
        let mut buf = vec![0u8; size];

        let n = timeout(self.recv_timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| BrokerError::ReadTimeout {
                target: self.target.clone(),
                elapsed: self.recv_timeout,
            })??;

        buf.truncate(n);
        Ok(buf)
    }

    pub async fn write(&mut self, data: &[u8]) -> BrokerResult<()> {
        let socket = self.socket.as_ref().ok_or_else(|| closed(&self.target))?;
        socket.send(data).await?;
        Ok(())
    }

    pub fn close(&mut self) {
        self.socket = None;
    }

    pub const fn is_open(&self) -> bool {
        self.socket.is_some()
    }
}

async fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host did not resolve"))
}

fn closed(target: &str) -> BrokerError {
    BrokerError::SessionClosed(target.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn udp_echo() -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(&buf[..n], peer).await;
            }
        });
        port
    }

    #[tokio::test]
    async fn test_initial_message_reply_becomes_data() {
        let port = udp_echo().await;
        let (mut session, initial) =
            UdpSession::connect("127.0.0.1", port, Some(b"hello"), SessionLimits::default())
                .await
                .unwrap();
        assert_eq!(initial.as_deref(), Some(&b"hello"[..]));

        session.write(b"again").await.unwrap();
        assert_eq!(session.read(64).await.unwrap(), b"again");

        session.close();
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_receive_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let limits = SessionLimits {
            udp_timeout: Duration::from_millis(50),
            ..SessionLimits::default()
        };

        let (mut session, initial) = UdpSession::connect("127.0.0.1", port, None, limits)
            .await
            .unwrap();
        assert_eq!(initial, None);
        assert!(matches!(
            session.read(64).await,
            Err(BrokerError::ReadTimeout { .. })
        ));
    }
}
