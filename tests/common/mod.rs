//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hostgate::protocol::handshake::encode_handshake;
use hostgate::RouteConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Reserve a loopback address that is free right now.
pub fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Start a backend that echoes every byte it receives.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

pub fn route_config(hostname: &str, listen: SocketAddr, backend: SocketAddr) -> RouteConfig {
    RouteConfig::new(hostname, &listen.to_string(), &backend.to_string())
}

/// Write a TOML route file.
pub fn write_route_file(path: &Path, hostname: &str, listen: SocketAddr, backend: SocketAddr) {
    std::fs::write(
        path,
        format!(
            "domain_name = \"{}\"\nlisten_to = \"{}\"\nproxy_to = \"{}\"\n",
            hostname, listen, backend
        ),
    )
    .unwrap();
}

/// Connect to `proxy`, ask for `hostname` and send `payload`.
///
/// Returns the open stream and the handshake bytes that were sent.
pub async fn connect_as(proxy: SocketAddr, hostname: &str, payload: &[u8]) -> (TcpStream, Vec<u8>) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let handshake = encode_handshake(763, hostname, proxy.port(), 2);
    stream.write_all(&handshake).await.unwrap();
    stream.write_all(payload).await.unwrap();
    (stream, handshake)
}

/// Read exactly `len` bytes, failing the test after two seconds.
pub async fn read_exact_timeout(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .unwrap();
    buf
}

/// True if the peer closed the connection without sending anything.
pub async fn closed_without_data(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 64];
    match tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await {
        Ok(Ok(0)) => true,
        Ok(Err(e)) => e.kind() == io::ErrorKind::ConnectionReset,
        _ => false,
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Run `fut` with a deadline, failing the test if it does not finish.
pub async fn within<T>(timeout: Duration, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, fut).await.expect("timed out")
}

/// In-memory log output.
#[derive(Clone, Default)]
pub struct Capture(pub Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn messages(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|l| {
                let value: serde_json::Value = serde_json::from_str(l).unwrap();
                value["message"].as_str().unwrap_or_default().to_string()
            })
            .collect()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
