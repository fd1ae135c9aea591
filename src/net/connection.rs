//! Per-gate connection bookkeeping.
//!
//! # Responsibilities
//! - Give every client connection an id for log correlation
//! - Count connections a multiplexer is currently handling, and in total
//! - Hold the listener slot for as long as the connection lives

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::net::listener::ConnectionSlot;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique connection id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicU64,
    total: AtomicU64,
}

/// Connection counters for one multiplexer.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    gate: Arc<str>,
    counters: Arc<Counters>,
}

impl ConnectionTracker {
    pub fn new(gate: &str) -> Self {
        Self {
            gate: Arc::from(gate),
            counters: Arc::default(),
        }
    }

    /// Start tracking a client. The connection counts as active until the guard drops.
    pub fn track(&self, peer: SocketAddr, slot: ConnectionSlot) -> ConnectionGuard {
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            id: ConnectionId::next(),
            peer,
            opened: Instant::now(),
            tracker: self.clone(),
            _slot: slot,
        }
    }

    pub fn active(&self) -> u64 {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Connections accepted since the multiplexer was created.
    pub fn total(&self) -> u64 {
        self.counters.total.load(Ordering::Relaxed)
    }
}

/// A live client connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: ConnectionId,
    peer: SocketAddr,
    opened: Instant,
    tracker: ConnectionTracker,
    _slot: ConnectionSlot,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn elapsed(&self) -> Duration {
        self.opened.elapsed()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.counters.active.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(
            gate = %self.tracker.gate,
            connection = %self.id,
            peer = %self.peer,
            duration_ms = self.elapsed().as_millis() as u64,
            "Connection closed"
        );
    }
}
