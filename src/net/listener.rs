//! Bounded TCP listener for one multiplexer.
//!
//! # Responsibilities
//! - Bind a multiplexer's listen address
//! - Hand out one connection slot per accepted client
//! - Tell transient accept failures apart from fatal ones
//!
//! # Design Decisions
//! - A full listener stops accepting until a slot frees up; the kernel
//!   backlog absorbs the burst
//! - The slot travels with the connection and is released when it ends

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default upper bound on concurrent connections per listen address.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot listen on {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("connection limit closed")]
    LimitClosed,
}

// errno values for resource exhaustion; Linux numbering.
const ENOMEM: i32 = 12;
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;
const ENOBUFS: i32 = 105;

impl ListenerError {
    /// Failures that do not break the listener; the accept loop keeps going.
    pub fn is_transient(&self) -> bool {
        match self {
            ListenerError::Accept(e) => {
                matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::WouldBlock
                ) || self.is_resource_exhaustion()
            }
            _ => false,
        }
    }

    /// Out of file descriptors, buffers or memory. Retrying at once would spin,
    /// so the accept loop backs off first.
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            ListenerError::Accept(e) => e.kind() == io::ErrorKind::OutOfMemory
                || matches!(e.raw_os_error(), Some(ENOMEM | ENFILE | EMFILE | ENOBUFS)),
            _ => false,
        }
    }
}

/// Delay before the next accept after running out of resources.
///
/// Doubles on every consecutive failure, up to one second; reset after a
/// successful accept.
#[derive(Debug)]
pub struct AcceptBackoff {
    next: Duration,
}

impl AcceptBackoff {
    const INITIAL: Duration = Duration::from_millis(10);
    const MAX: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self { next: Self::INITIAL }
    }

    /// The delay to wait now; the following one will be longer.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(Self::MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.next = Self::INITIAL;
    }
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        Self::new()
    }
}

/// A freshly accepted client.
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub slot: ConnectionSlot,
}

/// A TCP listener that admits at most `max_connections` clients at once.
pub struct Listener {
    inner: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(address: SocketAddr, max_connections: usize) -> Result<Self, ListenerError> {
        let bind_err = |source| ListenerError::Bind { address, source };
        let inner = TcpListener::bind(address).await.map_err(bind_err)?;
        let local = inner.local_addr().map_err(bind_err)?;

        tracing::debug!(address = %local, max_connections, "Listener bound");

        Ok(Self {
            inner,
            slots: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Wait for a free slot, then for the next client.
    pub async fn accept(&self) -> Result<Accepted, ListenerError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::LimitClosed)?;

        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        let _ = stream.set_nodelay(true);

        tracing::trace!(peer = %peer, free_slots = self.slots.available_permits(), "Accepted client");

        Ok(Accepted {
            stream,
            peer,
            slot: ConnectionSlot { _permit: permit },
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// One of the listener's connection slots; released on drop.
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}
