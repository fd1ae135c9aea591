//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bounded accept, one slot per client)
//!     → connection.rs (id, counters, slot held until the client leaves)
//!     → owning multiplexer resolves the hostname and dispatches
//! ```

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{AcceptBackoff, Accepted, ConnectionSlot, Listener, ListenerError};
