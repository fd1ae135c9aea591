//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Read route files → Register routes → Start file watcher
//!
//! Reload (reload.rs):
//!     File modified → Reload file → Registry::reconcile
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → Registry::close → Stop reload loop → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: routes first, then watcher, then listeners
//! - Bad route files never stop the other routes from serving

pub mod reload;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use reload::ConfigReloader;
pub use shutdown::Shutdown;
pub use signals::wait_for_shutdown_signal;
pub use startup::{register_routes, start, RouteBindings, Started, StartupError};
