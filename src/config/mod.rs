//! Route configuration subsystem.
//!
//! # Data Flow
//! ```text
//! route files (TOML/JSON), one per hostname
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RouteConfig (validated, normalized)
//!     → published into a Route as an immutable snapshot
//!
//! On file change:
//!     watcher.rs emits ConfigEvent { path, kind }
//!     → lifecycle::reload consumes events in order
//!     → loader.rs loads the changed file
//!     → Registry::reconcile moves or updates the route
//! ```
//!
//! # Design Decisions
//! - One file per route so a change maps to exactly one route
//! - Listen addresses and hostnames are normalized at load time
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_route_config, read_all_route_configs, ConfigError};
pub use schema::{PortainerConfig, ProcessConfig, RouteConfig};
pub use validation::{validate_route, ValidationError};
pub use watcher::{ChangeKind, ConfigEvent, ConfigWatcher};
