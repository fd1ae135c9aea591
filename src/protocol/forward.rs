//! Backend forwarding.
//!
//! # Responsibilities
//! - Connect to the route's backend within its timeout
//! - Optionally bind the outbound socket to a configured local IP
//! - Replay the client's handshake, then pipe bytes both ways

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream};

use crate::config::RouteConfig;
use crate::observability::Logger;
use crate::protocol::handshake::Handshake;
use crate::protocol::Dispatcher;

/// Errors raised while forwarding a connection.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("connecting to backend {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("backend {target} did not accept within {timeout:?}")]
    ConnectTimeout { target: String, timeout: Duration },

    #[error("invalid proxy_bind address {0:?}")]
    InvalidBind(String),

    #[error("forwarding failed: {0}")]
    Io(#[from] io::Error),
}

/// Bytes moved in each direction over a forwarded connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

/// Forwards connections to the route's backend over plain TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpForwarder;

impl TcpForwarder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dispatcher for TcpForwarder {
    async fn dispatch(
        &self,
        mut client: TcpStream,
        handshake: Handshake,
        target: Arc<RouteConfig>,
        logger: Arc<Logger>,
    ) -> Result<DispatchStats, DispatchError> {
        let timeout = Duration::from_millis(target.timeout_ms);
        let mut backend = tokio::time::timeout(timeout, connect_backend(&target))
            .await
            .map_err(|_| DispatchError::ConnectTimeout {
                target: target.proxy_to.clone(),
                timeout,
            })??;
        let _ = backend.set_nodelay(true);

        logger.event(
            tracing::Level::DEBUG,
            "Connected to backend",
            &[("hostname", &target.domain_name), ("backend", &target.proxy_to)],
        );

        backend.write_all(&handshake.raw).await?;

        let (up, down) = tokio::io::copy_bidirectional(&mut client, &mut backend).await?;
        Ok(DispatchStats {
            client_to_backend: up + handshake.raw.len() as u64,
            backend_to_client: down,
        })
    }
}

async fn connect_backend(target: &RouteConfig) -> Result<TcpStream, DispatchError> {
    let connect_err = |source: io::Error| DispatchError::Connect {
        target: target.proxy_to.clone(),
        source,
    };

    let bind = match &target.proxy_bind {
        None => return TcpStream::connect(&target.proxy_to).await.map_err(connect_err),
        Some(bind) => parse_bind(bind)?,
    };

    let remote = tokio::net::lookup_host(&target.proxy_to)
        .await
        .map_err(connect_err)?
        .find(|addr| addr.is_ipv4() == bind.is_ipv4())
        .ok_or_else(|| {
            connect_err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no backend address in the bind address family",
            ))
        })?;

    let socket = if bind.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(connect_err)?;
    socket.bind(bind).map_err(connect_err)?;
    socket.connect(remote).await.map_err(connect_err)
}

fn parse_bind(bind: &str) -> Result<SocketAddr, DispatchError> {
    if let Ok(ip) = bind.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, 0));
    }
    bind.parse::<SocketAddr>()
        .map_err(|_| DispatchError::InvalidBind(bind.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::handshake::{encode_handshake, read_handshake};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn bind_accepts_ip_or_socket_address() {
        assert_eq!(parse_bind("10.0.0.2").unwrap(), "10.0.0.2:0".parse().unwrap());
        assert_eq!(parse_bind("10.0.0.2:4000").unwrap(), "10.0.0.2:4000".parse().unwrap());
        assert!(matches!(parse_bind("nope"), Err(DispatchError::InvalidBind(_))));
    }

    #[tokio::test]
    async fn replays_handshake_and_pipes_bytes() {
        let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = backend.local_addr().unwrap();
        let backend_task = tokio::spawn(async move {
            let (mut socket, _) = backend.accept().await.unwrap();
            let handshake = read_handshake(&mut socket).await.unwrap();
            let mut payload = [0u8; 4];
            socket.read_exact(&mut payload).await.unwrap();
            socket.write_all(b"pong").await.unwrap();
            (handshake.hostname, payload)
        });

        let front = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let front_addr = front.local_addr().unwrap();
        let client_task = tokio::spawn(async move {
            let mut client = TcpStream::connect(front_addr).await.unwrap();
            client.write_all(b"ping").await.unwrap();
            let mut reply = [0u8; 4];
            client.read_exact(&mut reply).await.unwrap();
            reply
        });

        let (accepted, _) = front.accept().await.unwrap();
        let mut target = RouteConfig::new("a.example.com", "127.0.0.1:0", backend_addr.to_string());
        target.proxy_bind = Some("127.0.0.1".into());
        let handshake = read_handshake(&mut encode_handshake(763, "a.example.com", 25565, 2).as_slice())
            .await
            .unwrap();

        let dispatch = tokio::spawn(async move {
            TcpForwarder::new()
                .dispatch(accepted, handshake, Arc::new(target), Arc::new(Logger::default()))
                .await
        });

        assert_eq!(&client_task.await.unwrap(), b"pong");
        let (hostname, payload) = backend_task.await.unwrap();
        assert_eq!(hostname, "a.example.com");
        assert_eq!(&payload, b"ping");
        drop(dispatch);
    }

    #[tokio::test]
    async fn unreachable_backend_fails_to_connect() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = closed.local_addr().unwrap();
        drop(closed);

        let target = RouteConfig::new("a.example.com", "127.0.0.1:0", addr.to_string());
        let result = connect_backend(&target).await;
        assert!(matches!(result, Err(DispatchError::Connect { .. })));
    }
}
