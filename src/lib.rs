//! Hostname-routing reverse proxy for game servers.

// Core subsystems
pub mod config;
pub mod net;
pub mod protocol;
pub mod routing;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::RouteConfig;
pub use lifecycle::Shutdown;
pub use routing::{Multiplexer, Registry, Route, RoutingError};
