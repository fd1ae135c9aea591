//! Top-level owner of all multiplexers.
//!
//! # Responsibilities
//! - Keep one multiplexer per listen address, creating them on demand
//! - Place, remove and move routes between multiplexers
//! - Run and supervise one serving task per multiplexer
//! - Fan logging outputs out to every multiplexer
//!
//! # Design Decisions
//! - Every mutation, `reconcile` included, runs under one state lock so
//!   registry operations are serialized
//! - Dispatch never takes that lock; it reads the multiplexer's own map
//! - A serving task that ends deregisters its multiplexer and is never
//!   fatal to siblings or to the registry
//! - A removed multiplexer may still hold its port for a moment. A new
//!   multiplexer on the same address waits for that release before binding

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::Level;

use crate::config::schema::parse_listen_address;
use crate::config::{validate_route, RouteConfig};
use crate::net::listener::DEFAULT_MAX_CONNECTIONS;
use crate::observability::{metrics, LogContext, LogOutput, Logger};
use crate::protocol::{Dispatcher, HostnameResolver, MinecraftHandshake, TcpForwarder};
use crate::routing::{Multiplexer, Route, RoutingError};

struct RegistryState {
    multiplexers: HashMap<String, Arc<Multiplexer>>,
    /// Release signals of removed multiplexers that may still hold their port.
    retiring: HashMap<String, watch::Receiver<bool>>,
    running: bool,
    /// Hands multiplexers added while running to the `serve` loop.
    spawn_tx: Option<mpsc::UnboundedSender<Arc<Multiplexer>>>,
}

/// Registry of multiplexers keyed by listen address.
pub struct Registry {
    state: Mutex<RegistryState>,
    log: LogContext,
    resolver: Arc<dyn HostnameResolver>,
    dispatcher: Arc<dyn Dispatcher>,
    max_connections: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a registry whose multiplexers read game handshakes and forward over TCP.
    pub fn new() -> Self {
        Self::with_collaborators(Arc::new(MinecraftHandshake::default()), Arc::new(TcpForwarder::new()))
    }

    /// Create a registry whose multiplexers use `resolver` and `dispatcher`.
    pub fn with_collaborators(resolver: Arc<dyn HostnameResolver>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                multiplexers: HashMap::new(),
                retiring: HashMap::new(),
                running: false,
                spawn_tx: None,
            }),
            log: LogContext::new(Logger::default()),
            resolver,
            dispatcher,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Connection limit applied to multiplexers the registry creates.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Use `logger` as the base logger for the registry and everything it creates.
    pub fn with_logger(self, logger: Logger) -> Self {
        self.log.override_logger(&logger);
        self
    }

    /// The registry's current logger, outputs included.
    pub fn logger(&self) -> Arc<Logger> {
        self.log.logger()
    }

    /// True while `serve` is running.
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// The multiplexer registered for `address`, in any accepted spelling
    /// (`":25565"` and `"0.0.0.0:25565"` name the same one).
    pub fn multiplexer(&self, address: &str) -> Option<Arc<Multiplexer>> {
        self.lock().multiplexers.get(&canonical_address(address)).cloned()
    }

    /// Number of registered multiplexers.
    pub fn multiplexer_count(&self) -> usize {
        self.lock().multiplexers.len()
    }

    /// Registered addresses, sorted.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.lock().multiplexers.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Register a multiplexer; it starts serving at once if the registry is running.
    pub fn add_multiplexer(&self, mux: Arc<Multiplexer>) -> Result<(), RoutingError> {
        let mut state = self.lock();
        self.add_multiplexer_locked(&mut state, mux)
    }

    fn add_multiplexer_locked(&self, state: &mut RegistryState, mux: Arc<Multiplexer>) -> Result<(), RoutingError> {
        if state.multiplexers.contains_key(mux.address()) {
            return Err(RoutingError::AddressAlreadyRegistered(mux.address().to_string()));
        }

        state.retiring.retain(|_, released| !*released.borrow());
        if let Some(previous) = state.retiring.remove(mux.address()) {
            mux.follow(previous);
        }

        mux.add_logger_outputs(&self.log.outputs());
        mux.override_logger(&self.logger());
        state.multiplexers.insert(mux.address().to_string(), mux.clone());
        metrics::set_multiplexer_count(state.multiplexers.len());

        self.logger()
            .event(Level::DEBUG, "Added multiplexer", &[("gate", &mux.address())]);

        if state.running {
            if let Some(tx) = &state.spawn_tx {
                let _ = tx.send(mux);
            }
        }
        Ok(())
    }

    /// Close and forget the multiplexer for `address`. No-op if absent.
    pub fn remove_multiplexer(&self, address: &str) {
        let mut state = self.lock();
        self.remove_multiplexer_locked(&mut state, &canonical_address(address));
    }

    fn remove_multiplexer_locked(&self, state: &mut RegistryState, address: &str) {
        if let Some(mux) = state.multiplexers.remove(address) {
            mux.close();
            let released = mux.release_signal();
            if !*released.borrow() {
                state.retiring.insert(address.to_string(), released);
            }
            metrics::set_multiplexer_count(state.multiplexers.len());
            self.logger()
                .event(Level::DEBUG, "Removed multiplexer", &[("gate", &address)]);
        }
    }

    /// Place `route` on the multiplexer for its address, creating one if needed.
    pub fn add_route(&self, route: Arc<Route>) -> Result<(), RoutingError> {
        let mut state = self.lock();
        self.add_route_locked(&mut state, route)
    }

    fn add_route_locked(&self, state: &mut RegistryState, route: Arc<Route>) -> Result<(), RoutingError> {
        let address = route.read_address();
        if let Some(mux) = state.multiplexers.get(&address) {
            return mux.add_route(route);
        }

        let mux = Arc::new(
            Multiplexer::with_collaborators(&address, self.resolver.clone(), self.dispatcher.clone())?
                .with_max_connections(self.max_connections),
        );
        self.add_multiplexer_locked(state, mux.clone())?;
        if let Err(e) = mux.add_route(route) {
            self.remove_multiplexer_locked(state, mux.address());
            return Err(e);
        }
        Ok(())
    }

    /// Remove the route bound to `hostname` on `address`. No-op if either is absent.
    ///
    /// A multiplexer left without routes is closed and deregistered.
    pub fn remove_route(&self, address: &str, hostname: &str) -> Option<Arc<Route>> {
        let mut state = self.lock();
        let address = canonical_address(address);
        let mux = state.multiplexers.get(&address)?.clone();
        let route = mux.remove_route(hostname)?;
        if mux.is_empty() {
            self.remove_multiplexer_locked(&mut state, &address);
        }
        Some(route)
    }

    /// Apply changed configuration to an existing route, moving it if its address changed.
    ///
    /// When the route moves, its new binding is reachable before the old one
    /// is removed.
    pub fn reconcile(&self, route: &Arc<Route>, config: RouteConfig) -> Result<(), RoutingError> {
        validate_route(&config).map_err(RoutingError::Validation)?;
        let config = config.normalized();

        let mut state = self.lock();
        let old_address = route.read_address();

        if config.listen_to == old_address {
            let mux = state
                .multiplexers
                .get(&old_address)
                .cloned()
                .ok_or_else(|| RoutingError::MultiplexerNotFound(old_address.clone()))?;
            return mux.update_route(route, config);
        }

        let old_hostname = route.read_hostname();
        let new_address = config.listen_to.clone();
        let target = state.multiplexers.get(&new_address).cloned();

        if let Some(target) = &target {
            if target.contains(&config.domain_name) {
                return Err(RoutingError::DuplicateHostname {
                    address: new_address,
                    hostname: config.domain_name,
                });
            }
        }

        let previous = route.update_config(config)?;
        let placed = match target {
            Some(target) => target.add_route(route.clone()),
            None => self.add_route_locked(&mut state, route.clone()),
        };
        if let Err(e) = placed {
            route.restore(previous);
            return Err(e);
        }

        if let Some(old) = state.multiplexers.get(&old_address).cloned() {
            old.detach(&old_hostname, route);
            if old.is_empty() {
                self.remove_multiplexer_locked(&mut state, &old_address);
            }
        }

        self.logger().event(
            Level::INFO,
            "Moved route",
            &[
                ("from", &format!("{}/{}", old_address, old_hostname)),
                ("to", &format!("{}/{}", new_address, route.read_hostname())),
            ],
        );
        Ok(())
    }

    /// Serve every registered multiplexer until all of them have stopped.
    ///
    /// Multiplexers added while serving are started immediately. Fails at
    /// once when nothing is registered.
    pub async fn serve(self: &Arc<Self>) -> Result<(), RoutingError> {
        let (spawn_tx, mut spawn_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        {
            let mut state = self.lock();
            if state.running {
                return Err(RoutingError::AlreadyServing);
            }
            if state.multiplexers.is_empty() {
                return Err(RoutingError::NoMultiplexersRegistered);
            }
            state.running = true;
            state.spawn_tx = Some(spawn_tx);
            for mux in state.multiplexers.values() {
                tasks.spawn(Arc::clone(self).supervise(mux.clone()));
            }
        }

        self.logger().info("Starting registry");

        loop {
            tokio::select! {
                Some(mux) = spawn_rx.recv() => {
                    tasks.spawn(Arc::clone(self).supervise(mux));
                }
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        self.logger().event(Level::ERROR, "Serving task panicked", &[("error", &e)]);
                    }
                    if tasks.is_empty() && self.finish_if_idle(&mut spawn_rx, &mut tasks) {
                        break;
                    }
                }
            }
        }

        self.logger().info("Registry stopped");
        Ok(())
    }

    /// Under the state lock: start anything still queued, or mark the registry stopped.
    fn finish_if_idle(
        self: &Arc<Self>,
        spawn_rx: &mut mpsc::UnboundedReceiver<Arc<Multiplexer>>,
        tasks: &mut JoinSet<()>,
    ) -> bool {
        let mut state = self.lock();
        while let Ok(mux) = spawn_rx.try_recv() {
            tasks.spawn(Arc::clone(self).supervise(mux));
        }
        if !tasks.is_empty() {
            return false;
        }
        state.running = false;
        state.spawn_tx = None;
        true
    }

    async fn supervise(self: Arc<Self>, mux: Arc<Multiplexer>) {
        if let Err(e) = mux.clone().serve().await {
            self.logger().event(
                Level::ERROR,
                "Multiplexer stopped with error",
                &[("gate", &mux.address()), ("error", &e)],
            );
        }
        self.deregister(&mux);
    }

    /// Drop `mux` from the map unless the address was re-registered meanwhile.
    fn deregister(&self, mux: &Arc<Multiplexer>) {
        let mut state = self.lock();
        let current = state
            .multiplexers
            .get(mux.address())
            .is_some_and(|registered| Arc::ptr_eq(registered, mux));
        if current {
            self.remove_multiplexer_locked(&mut state, mux.address());
        } else {
            mux.close();
        }
    }

    /// Close every multiplexer; a running `serve` returns once their tasks finish.
    ///
    /// When not serving there are no tasks to deregister them, so the closed
    /// multiplexers are dropped from the registry here.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.running {
            for mux in state.multiplexers.values() {
                mux.close();
            }
        } else {
            let addresses: Vec<String> = state.multiplexers.keys().cloned().collect();
            for address in addresses {
                self.remove_multiplexer_locked(&mut state, &address);
            }
        }
        self.logger().info("Closing registry");
    }

    /// Register an output on the registry and every current multiplexer.
    ///
    /// Multiplexers added later inherit it.
    pub fn add_logger_output(&self, output: LogOutput) {
        let state = self.lock();
        self.log.add_output(output.clone());
        for mux in state.multiplexers.values() {
            mux.add_logger_output(output.clone());
        }
    }

    /// Replace the base logger of the registry and every current multiplexer.
    pub fn override_logger(&self, logger: &Logger) -> Arc<Logger> {
        let state = self.lock();
        let current = self.log.override_logger(logger);
        for mux in state.multiplexers.values() {
            mux.override_logger(logger);
        }
        current
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("addresses", &self.addresses())
            .field("running", &self.is_running())
            .finish()
    }
}

fn canonical_address(address: &str) -> String {
    parse_listen_address(address)
        .map(|a| a.to_string())
        .unwrap_or_else(|_| address.to_string())
}
