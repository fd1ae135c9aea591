//! Hot reload of route files.
//!
//! # Responsibilities
//! - Map file change events to the route loaded from that file
//! - Reload the file and hand the new config to `Registry::reconcile`
//!
//! # Design Decisions
//! - Events are handled one at a time, in arrival order
//! - Only content modifications trigger a reload; removals and renames
//!   leave the route serving its last good config
//! - A file that fails to load or reconcile leaves the route untouched

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::Level;

use crate::config::{load_route_config, ChangeKind, ConfigEvent};
use crate::lifecycle::startup::RouteBindings;
use crate::routing::{Registry, Route};

/// Applies route file changes to a running registry.
pub struct ConfigReloader {
    registry: Arc<Registry>,
    bindings: RouteBindings,
    events: mpsc::UnboundedReceiver<ConfigEvent>,
}

impl ConfigReloader {
    pub fn new(
        registry: Arc<Registry>,
        bindings: RouteBindings,
        events: mpsc::UnboundedReceiver<ConfigEvent>,
    ) -> Self {
        Self {
            registry,
            bindings,
            events,
        }
    }

    /// Route loaded from `path`, if any.
    pub fn route_for(&self, path: &Path) -> Option<&Arc<Route>> {
        if let Some(route) = self.bindings.get(path) {
            return Some(route);
        }
        let canonical = path.canonicalize().ok()?;
        self.bindings
            .iter()
            .find(|(bound, _)| bound.canonicalize().ok().as_deref() == Some(canonical.as_path()))
            .map(|(_, route)| route)
    }

    /// Apply one change event. Returns true if a route was reconciled.
    pub fn handle_event(&self, event: &ConfigEvent) -> bool {
        if event.kind != ChangeKind::Modified {
            return false;
        }
        let Some(route) = self.route_for(&event.path) else {
            return false;
        };

        let logger = self.registry.logger();
        let config = match load_route_config(&event.path) {
            Ok(config) => config,
            Err(e) => {
                logger.event(
                    Level::ERROR,
                    "Failed to reload route file",
                    &[("path", &event.path.display()), ("error", &e)],
                );
                return false;
            }
        };

        match self.registry.reconcile(route, config) {
            Ok(()) => {
                logger.event(
                    Level::INFO,
                    "Reloaded route",
                    &[
                        ("path", &event.path.display()),
                        ("gate", &route.read_address()),
                        ("hostname", &route.read_hostname()),
                    ],
                );
                true
            }
            Err(e) => {
                logger.event(
                    Level::ERROR,
                    "Failed to apply route change",
                    &[("path", &event.path.display()), ("error", &e)],
                );
                false
            }
        }
    }

    /// Process events until the watcher goes away or shutdown fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                event = self.events.recv() => match event {
                    Some(event) => {
                        self.handle_event(&event);
                    }
                    None => break,
                },
            }
        }
        self.registry.logger().debug("Reload loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    use crate::lifecycle::startup::register_routes;

    fn write_route(path: &Path, host: &str, listen: &str) {
        fs::write(
            path,
            format!(
                "domain_name = \"{}\"\nlisten_to = \"{}\"\nproxy_to = \"10.0.0.5:25565\"\n",
                host, listen
            ),
        )
        .unwrap();
    }

    fn setup() -> (tempfile::TempDir, PathBuf, Arc<Registry>, ConfigReloader, mpsc::UnboundedSender<ConfigEvent>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.toml");
        write_route(&path, "a.example.com", "127.0.0.1:25565");

        let registry = Arc::new(Registry::new());
        let bindings = register_routes(&registry, dir.path()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let reloader = ConfigReloader::new(registry.clone(), bindings, rx);
        (dir, path, registry, reloader, tx)
    }

    #[test]
    fn modification_moves_route() {
        let (_dir, path, registry, reloader, _tx) = setup();
        write_route(&path, "a.example.com", "127.0.0.1:25566");

        assert!(reloader.handle_event(&ConfigEvent::new(&path, ChangeKind::Modified)));
        assert_eq!(registry.addresses(), vec!["127.0.0.1:25566".to_string()]);
    }

    #[test]
    fn non_modification_events_are_ignored() {
        let (_dir, path, registry, reloader, _tx) = setup();
        write_route(&path, "b.example.com", "127.0.0.1:25566");

        for kind in [ChangeKind::Created, ChangeKind::Removed, ChangeKind::Renamed, ChangeKind::Other] {
            assert!(!reloader.handle_event(&ConfigEvent::new(&path, kind)));
        }
        assert_eq!(registry.addresses(), vec!["127.0.0.1:25565".to_string()]);
    }

    #[test]
    fn unknown_paths_are_ignored() {
        let (dir, _path, _registry, reloader, _tx) = setup();
        let other = dir.path().join("other.toml");
        write_route(&other, "c.example.com", "127.0.0.1:25567");
        assert!(!reloader.handle_event(&ConfigEvent::new(other, ChangeKind::Modified)));
    }

    #[test]
    fn broken_file_keeps_previous_config() {
        let (_dir, path, registry, reloader, _tx) = setup();
        fs::write(&path, "domain_name = \"a.example.com\"\nproxy_to = \"no-port\"\n").unwrap();

        assert!(!reloader.handle_event(&ConfigEvent::new(&path, ChangeKind::Modified)));
        let mux = registry.multiplexer("127.0.0.1:25565").unwrap();
        assert_eq!(mux.route("a.example.com").unwrap().config().proxy_to, "10.0.0.5:25565");
    }

    #[tokio::test]
    async fn run_applies_events_in_order_and_stops_on_shutdown() {
        let (_dir, path, registry, reloader, tx) = setup();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(reloader.run(shutdown_rx));

        write_route(&path, "a.example.com", "127.0.0.1:25570");
        tx.send(ConfigEvent::new(&path, ChangeKind::Modified)).unwrap();
        tx.send(ConfigEvent::new(&path, ChangeKind::Removed)).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while registry.multiplexer("127.0.0.1:25570").is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("route never moved");

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(registry.addresses(), vec!["127.0.0.1:25570".to_string()]);
    }
}
