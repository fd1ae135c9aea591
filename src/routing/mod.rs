//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registry (registry.rs)
//!     address → Multiplexer (multiplexer.rs)
//!         hostname → Route (route.rs)
//!             → current RouteConfig snapshot
//!
//! Accepted connection on a Multiplexer:
//!     → HostnameResolver → hostname
//!     → route lookup (lock-free read)
//!     → Dispatcher with the route's snapshot
//! ```
//!
//! # Design Decisions
//! - Routes may be added, removed or moved while connections are flowing
//! - A moving route is published at its new binding before the old
//!   binding is removed, so it is always reachable somewhere
//! - Loggers flow downward: Registry → Multiplexer → Route

pub mod error;
pub mod multiplexer;
pub mod registry;
pub mod route;

pub use error::RoutingError;
pub use multiplexer::Multiplexer;
pub use registry::Registry;
pub use route::Route;
