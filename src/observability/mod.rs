//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Registry / Multiplexer / Route produce:
//!     → logging.rs (context loggers, JSON fan-out to outputs)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Console (tracing-subscriber, installed by main)
//!     → Extra outputs (log file, test captures)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Console logging goes through `tracing`; outputs receive JSON lines
//! - Outputs registered on the registry propagate to every multiplexer
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use logging::{LogContext, LogOutput, Logger};
