//! Startup orchestration.
//!
//! # Responsibilities
//! - Discover and load every route file in the config directory
//! - Register the resulting routes with the registry
//! - Start the file watcher that feeds the reload loop
//!
//! # Design Decisions
//! - A broken route file is logged and skipped; the rest still start
//! - Startup fails only when not a single route could be registered
//! - Listeners are not bound here; `Registry::serve` does that

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::Level;

use crate::config::{read_all_route_configs, ConfigError, ConfigEvent, ConfigWatcher};
use crate::routing::{Registry, Route};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read config directory: {0}")]
    Config(#[from] ConfigError),

    #[error("no usable route files in {0}")]
    NoRoutes(PathBuf),

    #[error("failed to watch route files: {0}")]
    Watch(#[from] notify::Error),
}

/// Route files that produced a live route, keyed by path.
pub type RouteBindings = HashMap<PathBuf, Arc<Route>>;

/// Everything the reload loop needs after startup.
pub struct Started {
    pub bindings: RouteBindings,
    pub events: mpsc::UnboundedReceiver<ConfigEvent>,
    /// Dropping this stops file watching.
    pub watcher: RecommendedWatcher,
}

/// Load every route file under `dir` into `registry`.
///
/// Files that fail to parse, validate or register are logged and skipped.
pub fn register_routes(registry: &Registry, dir: &Path) -> Result<RouteBindings, StartupError> {
    let logger = registry.logger();
    let mut bindings = RouteBindings::new();

    for (path, loaded) in read_all_route_configs(dir)? {
        let registered = loaded
            .map_err(|e| e.to_string())
            .and_then(|config| Route::new(config).map_err(|e| e.to_string()))
            .map(Arc::new)
            .and_then(|route| {
                registry
                    .add_route(route.clone())
                    .map(|_| route)
                    .map_err(|e| e.to_string())
            });

        match registered {
            Ok(route) => {
                logger.event(
                    Level::DEBUG,
                    "Loaded route file",
                    &[("path", &path.display()), ("hostname", &route.read_hostname())],
                );
                bindings.insert(path, route);
            }
            Err(e) => {
                logger.event(
                    Level::ERROR,
                    "Skipping route file",
                    &[("path", &path.display()), ("error", &e)],
                );
            }
        }
    }

    if bindings.is_empty() {
        return Err(StartupError::NoRoutes(dir.to_path_buf()));
    }

    logger.event(Level::INFO, "Routes registered", &[("count", &bindings.len())]);
    Ok(bindings)
}

/// Register routes from `dir` and start watching their files.
pub fn start(registry: &Registry, dir: &Path) -> Result<Started, StartupError> {
    let bindings = register_routes(registry, dir)?;
    let (watcher, events) = ConfigWatcher::new(bindings.keys().cloned());
    let watcher = watcher.run()?;

    Ok(Started {
        bindings,
        events,
        watcher,
    })
}
