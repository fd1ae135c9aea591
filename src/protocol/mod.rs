//! Game protocol collaborators.
//!
//! # Data Flow
//! ```text
//! Accepted TcpStream
//!     → HostnameResolver (handshake.rs: read first packet → hostname)
//!     → Multiplexer route lookup
//!     → Dispatcher (forward.rs: connect backend, replay handshake, pipe)
//! ```
//!
//! # Design Decisions
//! - The routing core only sees these two traits; both are swappable
//! - The resolver hands back the consumed bytes so the backend sees an
//!   untouched stream

pub mod forward;
pub mod handshake;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::config::RouteConfig;
use crate::observability::Logger;

pub use forward::{DispatchError, DispatchStats, TcpForwarder};
pub use handshake::{Handshake, MinecraftHandshake, ProtocolError};

/// Determines the virtual hostname a new connection asks for.
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    async fn resolve(&self, stream: &mut TcpStream) -> Result<Handshake, ProtocolError>;
}

/// Forwards a matched connection to the route's backend.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        client: TcpStream,
        handshake: Handshake,
        target: Arc<RouteConfig>,
        logger: Arc<Logger>,
    ) -> Result<DispatchStats, DispatchError>;
}
