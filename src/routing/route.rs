//! A single hostname → backend binding.
//!
//! # Responsibilities
//! - Hold the route's current config as one immutable snapshot
//! - Publish config changes atomically (address, hostname and backend together)
//! - Carry the logger handed down by the owning multiplexer
//!
//! # Design Decisions
//! - Readers load the snapshot through `ArcSwap`; they never block writers
//! - Validation runs before publishing, so a rejected update changes nothing

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::Level;

use crate::config::{validate_route, RouteConfig};
use crate::observability::Logger;
use crate::routing::RoutingError;

/// A route: one virtual hostname on one listen address, forwarding to one backend.
#[derive(Debug)]
pub struct Route {
    snapshot: ArcSwap<RouteConfig>,
    logger: ArcSwap<Logger>,
}

impl Route {
    /// Validate and normalize `config` into a new route.
    pub fn new(config: RouteConfig) -> Result<Self, RoutingError> {
        validate_route(&config).map_err(RoutingError::Validation)?;
        Ok(Self {
            snapshot: ArcSwap::from_pointee(config.normalized()),
            logger: ArcSwap::from_pointee(Logger::default()),
        })
    }

    /// Listen address the route currently belongs to.
    pub fn read_address(&self) -> String {
        self.snapshot.load().listen_to.clone()
    }

    /// Hostname the route is currently keyed by.
    pub fn read_hostname(&self) -> String {
        self.snapshot.load().domain_name.clone()
    }

    /// The full current config; all fields come from the same update.
    pub fn config(&self) -> Arc<RouteConfig> {
        self.snapshot.load_full()
    }

    /// Validate `config` and publish it as the route's new snapshot.
    ///
    /// Returns the snapshot that was replaced.
    pub fn update_config(&self, config: RouteConfig) -> Result<Arc<RouteConfig>, RoutingError> {
        validate_route(&config).map_err(RoutingError::Validation)?;
        let previous = self.snapshot.swap(Arc::new(config.normalized()));

        self.log(Level::DEBUG, "Route config updated");
        Ok(previous)
    }

    /// Put back a snapshot returned by `update_config`.
    pub(crate) fn restore(&self, previous: Arc<RouteConfig>) {
        self.snapshot.store(previous);
    }

    /// Logger for events about this route, tagged with its hostname.
    pub fn logger(&self) -> Arc<Logger> {
        let snapshot = self.snapshot.load();
        Arc::new(self.logger.load().with_field("hostname", &snapshot.domain_name))
    }

    pub(crate) fn set_logger(&self, logger: Arc<Logger>) {
        self.logger.store(logger);
    }

    fn log(&self, level: Level, message: &str) {
        self.logger().event(level, message, &[]);
    }
}
