//! Errors surfaced by the routing core.

use thiserror::Error;

use crate::config::ValidationError;
use crate::net::ListenerError;

/// Errors returned by route, multiplexer and registry operations.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// A multiplexer for this address is already registered.
    #[error("multiplexer for {0} is already registered")]
    AddressAlreadyRegistered(String),

    /// `serve` was called on a registry without multiplexers.
    #[error("no multiplexers registered")]
    NoMultiplexersRegistered,

    /// The route's recorded address has no live multiplexer.
    #[error("no multiplexer registered for {0}")]
    MultiplexerNotFound(String),

    /// The hostname is already routed on the target multiplexer.
    #[error("hostname {hostname} is already routed on {address}")]
    DuplicateHostname { address: String, hostname: String },

    /// A route was offered to a multiplexer listening elsewhere.
    #[error("route for {route_address} cannot join multiplexer {address}")]
    AddressMismatch { address: String, route_address: String },

    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),

    #[error("invalid route config: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("registry is already serving")]
    AlreadyServing,

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
