//! One listen address, many hostnames.
//!
//! # Responsibilities
//! - Own the listener for a single address
//! - Keep the hostname → route map and allow changes while serving
//! - Dispatch every accepted connection to the route it asks for
//!
//! # Design Decisions
//! - Route map is a `DashMap`; dispatch reads never wait on the registry
//! - Each accepted connection runs as its own task
//! - `close` flips a watch channel; the accept loop treats it as a clean stop
//! - A second watch channel reports when the listener has been released. A
//!   multiplexer replacing a closed one on the same address waits for it
//!   before binding

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::Level;

use crate::config::schema::{normalize_hostname, parse_listen_address};
use crate::config::RouteConfig;
use crate::net::listener::DEFAULT_MAX_CONNECTIONS;
use crate::net::{AcceptBackoff, Accepted, ConnectionTracker, Listener};
use crate::observability::{metrics, LogContext, LogOutput, Logger};
use crate::protocol::{Dispatcher, HostnameResolver, MinecraftHandshake, TcpForwarder};
use crate::routing::{Route, RoutingError};

/// Owner of one listen address and the routes served on it.
pub struct Multiplexer {
    address: String,
    socket_addr: SocketAddr,
    routes: DashMap<String, Arc<Route>>,
    listening: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    closed: watch::Sender<bool>,
    serving: AtomicBool,
    released: watch::Sender<bool>,
    /// Release signal of the instance this one replaced on the same address.
    predecessor: Mutex<Option<watch::Receiver<bool>>>,
    max_connections: usize,
    resolver: Arc<dyn HostnameResolver>,
    dispatcher: Arc<dyn Dispatcher>,
    tracker: ConnectionTracker,
    log: LogContext,
}

impl Multiplexer {
    /// Create a multiplexer with the default handshake reader and TCP forwarder.
    pub fn new(address: &str) -> Result<Self, RoutingError> {
        Self::with_collaborators(address, Arc::new(MinecraftHandshake::default()), Arc::new(TcpForwarder::new()))
    }

    /// Create a multiplexer that reads hostnames with `resolver` and hands
    /// matched connections to `dispatcher`.
    ///
    /// Fails with [`RoutingError::InvalidAddress`] if `address` is not a
    /// listen address.
    pub fn with_collaborators(
        address: &str,
        resolver: Arc<dyn HostnameResolver>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, RoutingError> {
        let socket_addr = parse_listen_address(address)
            .map_err(|_| RoutingError::InvalidAddress(address.to_string()))?;
        let address = socket_addr.to_string();
        let (closed, _) = watch::channel(false);
        let (released, _) = watch::channel(false);

        Ok(Self {
            log: LogContext::scoped(Logger::default(), vec![("gate", address.clone())]),
            tracker: ConnectionTracker::new(&address),
            address,
            socket_addr,
            routes: DashMap::new(),
            listening: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            closed,
            serving: AtomicBool::new(false),
            released,
            predecessor: Mutex::new(None),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            resolver,
            dispatcher,
        })
    }

    /// Cap the number of clients served at once. Further clients wait in
    /// the kernel backlog until a slot frees up.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Canonical listen address; the registry key.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Address actually bound while listening (resolves port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// True while the listener is bound and accepting.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// True once this multiplexer no longer holds, and never again will
    /// hold, its listen address.
    pub fn is_released(&self) -> bool {
        *self.released.borrow()
    }

    /// Wait until the listen address has been released.
    pub async fn released(&self) {
        wait_set(self.released.subscribe()).await;
    }

    /// Connections currently being handled.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active()
    }

    /// Connections accepted over the multiplexer's lifetime.
    pub fn total_connections(&self) -> u64 {
        self.tracker.total()
    }

    /// The route bound to `hostname`, which must already be normalized.
    pub fn route(&self, hostname: &str) -> Option<Arc<Route>> {
        self.routes.get(hostname).map(|r| r.value().clone())
    }

    /// True if a route is bound to the normalized `hostname`.
    pub fn contains(&self, hostname: &str) -> bool {
        self.routes.contains_key(hostname)
    }

    /// Bound hostnames, sorted.
    pub fn hostnames(&self) -> Vec<String> {
        let mut hostnames: Vec<String> = self.routes.iter().map(|r| r.key().clone()).collect();
        hostnames.sort();
        hostnames
    }

    /// Number of bound hostnames.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Add a route under its current hostname.
    ///
    /// The route is eligible for dispatch as soon as this returns.
    pub fn add_route(&self, route: Arc<Route>) -> Result<(), RoutingError> {
        let snapshot = route.config();
        if snapshot.listen_to != self.address {
            return Err(RoutingError::AddressMismatch {
                address: self.address.clone(),
                route_address: snapshot.listen_to.clone(),
            });
        }

        match self.routes.entry(snapshot.domain_name.clone()) {
            Entry::Occupied(_) => {
                return Err(RoutingError::DuplicateHostname {
                    address: self.address.clone(),
                    hostname: snapshot.domain_name.clone(),
                });
            }
            Entry::Vacant(slot) => {
                route.set_logger(self.logger());
                slot.insert(route);
            }
        }

        self.logger().event(
            Level::INFO,
            "Added route",
            &[("hostname", &snapshot.domain_name), ("backend", &snapshot.proxy_to)],
        );
        Ok(())
    }

    /// Detach the route keyed by `hostname`. No-op if absent.
    ///
    /// Connections already dispatched to it keep running.
    pub fn remove_route(&self, hostname: &str) -> Option<Arc<Route>> {
        let hostname = normalize_hostname(hostname);
        let (_, route) = self.routes.remove(&hostname)?;
        self.logger().event(Level::INFO, "Removed route", &[("hostname", &hostname)]);
        Some(route)
    }

    /// Remove the binding for `hostname` only if it still points at `route`.
    pub(crate) fn detach(&self, hostname: &str, route: &Arc<Route>) -> bool {
        let removed = self
            .routes
            .remove_if(hostname, |_, bound| Arc::ptr_eq(bound, route))
            .is_some();
        if removed {
            self.logger().event(Level::INFO, "Removed route", &[("hostname", &hostname)]);
        }
        removed
    }

    /// Apply `config` to `route` and re-key it if its hostname changed.
    ///
    /// When the new address belongs to another multiplexer only the route's
    /// config changes; relocating it is the registry's job.
    pub fn update_route(&self, route: &Arc<Route>, config: RouteConfig) -> Result<(), RoutingError> {
        let config = config.normalized();
        let old_hostname = route.read_hostname();
        let stays = config.listen_to == self.address;
        let renamed = config.domain_name != old_hostname;

        if stays && renamed {
            if let Some(bound) = self.route(&config.domain_name) {
                if !Arc::ptr_eq(&bound, route) {
                    return Err(RoutingError::DuplicateHostname {
                        address: self.address.clone(),
                        hostname: config.domain_name,
                    });
                }
            }
        }

        let previous = route.update_config(config)?;
        if !(stays && renamed) {
            return Ok(());
        }

        let new_hostname = route.read_hostname();
        match self.routes.entry(new_hostname.clone()) {
            Entry::Occupied(slot) if !Arc::ptr_eq(slot.get(), route) => {
                drop(slot);
                route.restore(previous);
                return Err(RoutingError::DuplicateHostname {
                    address: self.address.clone(),
                    hostname: new_hostname,
                });
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(route.clone());
            }
        }
        // New key is reachable; now drop the old one.
        self.routes.remove_if(&old_hostname, |_, bound| Arc::ptr_eq(bound, route));

        self.logger().event(
            Level::INFO,
            "Renamed route",
            &[("from", &old_hostname), ("hostname", &new_hostname)],
        );
        Ok(())
    }

    /// Stop accepting. Idempotent; `serve` returns `Ok(())`.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            self.logger().debug("Closing multiplexer");
        }
        // Never served, so nothing is bound. A serve that starts from here on sees the flag.
        if !self.serving.load(Ordering::SeqCst) {
            self.released.send_replace(true);
        }
    }

    /// Do not bind until `previous` reports its listener released.
    pub(crate) fn follow(&self, previous: watch::Receiver<bool>) {
        *self.predecessor.lock().unwrap_or_else(|p| p.into_inner()) = Some(previous);
    }

    /// The signal a successor on this address has to wait for.
    ///
    /// While this instance has not yet started waiting on its own predecessor,
    /// that older signal is the one still guarding the port.
    pub(crate) fn release_signal(&self) -> watch::Receiver<bool> {
        let predecessor = self.predecessor.lock().unwrap_or_else(|p| p.into_inner());
        match predecessor.as_ref() {
            Some(previous) if !*previous.borrow() => previous.clone(),
            _ => self.released.subscribe(),
        }
    }

    /// Bind the listen address and dispatch connections until closed.
    ///
    /// If this multiplexer replaced a closed one on the same address, binding
    /// waits until that one has released the port.
    pub async fn serve(self: Arc<Self>) -> Result<(), RoutingError> {
        self.serving.store(true, Ordering::SeqCst);
        let _release = ReleaseOnDrop(&self.released);

        let previous = self.predecessor.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(previous) = previous {
            self.logger().debug("Waiting for previous listener to close");
            wait_set(previous).await;
        }
        self.listen().await
    }

    async fn listen(self: &Arc<Self>) -> Result<(), RoutingError> {
        let closed = wait_set(self.closed.subscribe());
        tokio::pin!(closed);
        if self.is_closed() {
            return Ok(());
        }

        let listener = Listener::bind(self.socket_addr, self.max_connections).await?;
        self.set_local_addr(listener.local_addr().ok());
        self.listening.store(true, Ordering::SeqCst);
        self.logger().info("Listening");

        let mut backoff = AcceptBackoff::new();
        let result = loop {
            tokio::select! {
                _ = &mut closed => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => {
                        backoff.reset();
                        let mux = Arc::clone(self);
                        tokio::spawn(async move {
                            mux.handle_connection(accepted).await;
                        });
                    }
                    Err(e) if e.is_resource_exhaustion() => {
                        let delay = backoff.next_delay();
                        self.logger().event(
                            Level::WARN,
                            "Accept failed, backing off",
                            &[("error", &e), ("delay_ms", &delay.as_millis())],
                        );
                        tokio::select! {
                            _ = &mut closed => break Ok(()),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    Err(e) if e.is_transient() => {
                        self.logger().event(Level::WARN, "Accept failed", &[("error", &e)]);
                    }
                    Err(e) => break Err(RoutingError::from(e)),
                },
            }
        };

        self.listening.store(false, Ordering::SeqCst);
        self.set_local_addr(None);
        self.logger().info("Stopped listening");
        result
    }

    async fn handle_connection(self: Arc<Self>, accepted: Accepted) {
        let Accepted { mut stream, peer, slot } = accepted;
        let guard = self.tracker.track(peer, slot);
        let connection = guard.id();
        metrics::record_connection(&self.address);

        let handshake = match self.resolver.resolve(&mut stream).await {
            Ok(handshake) => handshake,
            Err(e) => {
                metrics::record_handshake_failure(&self.address);
                self.logger().event(
                    Level::DEBUG,
                    "Handshake failed",
                    &[("connection", &connection), ("peer", &peer), ("error", &e)],
                );
                return;
            }
        };

        let route = match self.route(&handshake.hostname) {
            Some(route) => route,
            None => {
                metrics::record_unknown_hostname(&self.address);
                self.logger().event(
                    Level::INFO,
                    "Rejected connection for unknown hostname",
                    &[("connection", &connection), ("peer", &peer), ("hostname", &handshake.hostname)],
                );
                return;
            }
        };

        let target = route.config();
        let logger = route.logger();
        logger.event(
            Level::DEBUG,
            "Dispatching connection",
            &[("connection", &connection), ("peer", &peer), ("backend", &target.proxy_to)],
        );

        match self.dispatcher.dispatch(stream, handshake, target.clone(), logger.clone()).await {
            Ok(stats) => {
                metrics::record_dispatch(&self.address, &target.domain_name, true);
                logger.event(
                    Level::DEBUG,
                    "Connection finished",
                    &[
                        ("connection", &connection),
                        ("sent", &stats.client_to_backend),
                        ("received", &stats.backend_to_client),
                        ("duration_ms", &guard.elapsed().as_millis()),
                    ],
                );
            }
            Err(e) => {
                metrics::record_dispatch(&self.address, &target.domain_name, false);
                logger.event(
                    Level::WARN,
                    "Forwarding failed",
                    &[("connection", &connection), ("peer", &peer), ("error", &e)],
                );
            }
        }
    }

    /// Current logger, carrying the `gate` field and every registered output.
    pub fn logger(&self) -> Arc<Logger> {
        self.log.logger()
    }

    /// Register an output on this multiplexer and every route it holds.
    pub fn add_logger_output(&self, output: LogOutput) {
        self.add_logger_outputs(std::slice::from_ref(&output));
    }

    pub fn add_logger_outputs(&self, outputs: &[LogOutput]) {
        let logger = self.log.add_outputs(outputs);
        self.push_logger(logger);
    }

    /// Replace the base logger, keeping this multiplexer's outputs.
    pub fn override_logger(&self, logger: &Logger) {
        let logger = self.log.override_logger(logger);
        self.push_logger(logger);
    }

    fn push_logger(&self, logger: Arc<Logger>) {
        for route in self.routes.iter() {
            route.value().set_logger(logger.clone());
        }
    }

    fn set_local_addr(&self, addr: Option<SocketAddr>) {
        *self.local_addr.lock().unwrap_or_else(|p| p.into_inner()) = addr;
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("address", &self.address)
            .field("routes", &self.hostnames())
            .field("listening", &self.is_listening())
            .finish()
    }
}

/// Resolves once the flag is set or its sender is gone.
async fn wait_set(mut flag: watch::Receiver<bool>) {
    while !*flag.borrow_and_update() {
        if flag.changed().await.is_err() {
            return;
        }
    }
}

/// Marks the listen address released when `serve` ends, however it ends.
struct ReleaseOnDrop<'a>(&'a watch::Sender<bool>);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DispatchError, DispatchStats, Handshake, ProtocolError};
    use std::time::Duration;

    fn route(host: &str, addr: &str) -> Arc<Route> {
        Arc::new(Route::new(RouteConfig::new(host, addr, "10.0.0.5:25565")).unwrap())
    }

    #[test]
    fn address_is_canonical() {
        let mux = Multiplexer::new(":25565").unwrap();
        assert_eq!(mux.address(), "0.0.0.0:25565");
        assert!(matches!(
            Multiplexer::new("somewhere"),
            Err(RoutingError::InvalidAddress(_))
        ));
    }

    #[test]
    fn duplicate_hostname_is_rejected() {
        let mux = Multiplexer::new("127.0.0.1:25565").unwrap();
        mux.add_route(route("a.example.com", "127.0.0.1:25565")).unwrap();

        let err = mux.add_route(route("a.example.com", "127.0.0.1:25565")).unwrap_err();
        assert!(matches!(err, RoutingError::DuplicateHostname { .. }));
        assert_eq!(mux.route_count(), 1);
    }

    #[test]
    fn route_for_other_address_is_rejected() {
        let mux = Multiplexer::new("127.0.0.1:25565").unwrap();
        let err = mux.add_route(route("a.example.com", "127.0.0.1:25566")).unwrap_err();
        assert!(matches!(err, RoutingError::AddressMismatch { .. }));
        assert!(mux.is_empty());
    }

    #[test]
    fn remove_missing_route_is_noop() {
        let mux = Multiplexer::new("127.0.0.1:25565").unwrap();
        mux.add_route(route("a.example.com", "127.0.0.1:25565")).unwrap();

        assert!(mux.remove_route("b.example.com").is_none());
        assert_eq!(mux.hostnames(), vec!["a.example.com".to_string()]);

        assert!(mux.remove_route("A.example.com").is_some());
        assert!(mux.is_empty());
    }

    #[test]
    fn update_route_rekeys_on_hostname_change() {
        let mux = Multiplexer::new("127.0.0.1:25565").unwrap();
        let r = route("a.example.com", "127.0.0.1:25565");
        mux.add_route(r.clone()).unwrap();

        mux.update_route(&r, RouteConfig::new("b.example.com", "127.0.0.1:25565", "10.0.0.7:25565"))
            .unwrap();

        assert_eq!(mux.hostnames(), vec!["b.example.com".to_string()]);
        assert!(Arc::ptr_eq(&mux.route("b.example.com").unwrap(), &r));
        assert_eq!(r.config().proxy_to, "10.0.0.7:25565");
    }

    #[test]
    fn update_route_refuses_taken_hostname() {
        let mux = Multiplexer::new("127.0.0.1:25565").unwrap();
        let a = route("a.example.com", "127.0.0.1:25565");
        mux.add_route(a.clone()).unwrap();
        mux.add_route(route("b.example.com", "127.0.0.1:25565")).unwrap();

        let err = mux
            .update_route(&a, RouteConfig::new("b.example.com", "127.0.0.1:25565", "10.0.0.7:25565"))
            .unwrap_err();
        assert!(matches!(err, RoutingError::DuplicateHostname { .. }));
        assert_eq!(a.read_hostname(), "a.example.com");
        assert!(Arc::ptr_eq(&mux.route("a.example.com").unwrap(), &a));
    }

    #[test]
    fn update_route_to_other_address_leaves_map_alone() {
        let mux = Multiplexer::new("127.0.0.1:25565").unwrap();
        let r = route("a.example.com", "127.0.0.1:25565");
        mux.add_route(r.clone()).unwrap();

        mux.update_route(&r, RouteConfig::new("a.example.com", "127.0.0.1:25566", "10.0.0.5:25565"))
            .unwrap();
        assert_eq!(r.read_address(), "127.0.0.1:25566");
        assert!(mux.contains("a.example.com"));
    }

    #[test]
    fn detach_only_removes_matching_route() {
        let mux = Multiplexer::new("127.0.0.1:25565").unwrap();
        let bound = route("a.example.com", "127.0.0.1:25565");
        let stranger = route("a.example.com", "127.0.0.1:25565");
        mux.add_route(bound.clone()).unwrap();

        assert!(!mux.detach("a.example.com", &stranger));
        assert!(mux.detach("a.example.com", &bound));
        assert!(mux.is_empty());
    }

    #[tokio::test]
    async fn close_before_serve_returns_immediately() {
        let mux = Arc::new(Multiplexer::new("127.0.0.1:0").unwrap());
        mux.close();
        mux.close();
        tokio::time::timeout(Duration::from_secs(1), mux.clone().serve())
            .await
            .expect("serve blocked after close")
            .unwrap();
        assert!(!mux.is_listening());
        assert!(mux.is_released());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn successor_binds_once_previous_listener_is_released() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let first = Arc::new(Multiplexer::new(&addr.to_string()).unwrap());
        let first_task = tokio::spawn(first.clone().serve());
        while !first.is_listening() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = Arc::new(Multiplexer::new(&addr.to_string()).unwrap());
        first.close();
        second.follow(first.release_signal());
        let second_task = tokio::spawn(second.clone().serve());

        tokio::time::timeout(Duration::from_secs(2), first.released())
            .await
            .expect("first listener never released");
        tokio::time::timeout(Duration::from_secs(2), async {
            while !second.is_listening() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("successor never bound the address");
        assert_eq!(second.local_addr(), Some(addr));
        first_task.await.unwrap().unwrap();

        second.close();
        second_task.await.unwrap().unwrap();
        assert!(second.is_released());
    }

    #[tokio::test]
    async fn successor_holds_off_while_previous_listener_is_open() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let first = Arc::new(Multiplexer::new(&addr.to_string()).unwrap());
        let first_task = tokio::spawn(first.clone().serve());
        while !first.is_listening() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = Arc::new(Multiplexer::new(&addr.to_string()).unwrap());
        second.follow(first.release_signal());
        let second_task = tokio::spawn(second.clone().serve());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!second_task.is_finished(), "successor tried to bind a taken port");
        assert!(!second.is_listening());

        first.close();
        first_task.await.unwrap().unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !second.is_listening() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("successor never bound the address");

        second.close();
        second_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn close_stops_serving() {
        let mux = Arc::new(Multiplexer::new("127.0.0.1:0").unwrap());
        let task = tokio::spawn(mux.clone().serve());

        while !mux.is_listening() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(mux.local_addr().is_some());

        mux.close();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("serve did not stop")
            .unwrap()
            .unwrap();
        assert!(!mux.is_listening());
        assert!(mux.local_addr().is_none());
    }

    struct FixedHost(&'static str);

    #[async_trait::async_trait]
    impl HostnameResolver for FixedHost {
        async fn resolve(&self, _stream: &mut tokio::net::TcpStream) -> Result<Handshake, ProtocolError> {
            Ok(Handshake {
                protocol_version: 763,
                server_address: self.0.to_string(),
                server_port: 25565,
                next_state: 2,
                hostname: self.0.to_string(),
                raw: Vec::new(),
            })
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Arc<RouteConfig>>>);

    #[async_trait::async_trait]
    impl Dispatcher for Recorder {
        async fn dispatch(
            &self,
            _client: tokio::net::TcpStream,
            _handshake: Handshake,
            target: Arc<RouteConfig>,
            _logger: Arc<Logger>,
        ) -> Result<DispatchStats, DispatchError> {
            self.0.lock().unwrap().push(target);
            Ok(DispatchStats::default())
        }
    }

    #[tokio::test]
    async fn dispatches_with_current_route_snapshot() {
        let recorder = Arc::new(Recorder::default());
        let mux = Arc::new(
            Multiplexer::with_collaborators("127.0.0.1:0", Arc::new(FixedHost("a.example.com")), recorder.clone())
                .unwrap(),
        );
        let r = route("a.example.com", "127.0.0.1:0");
        mux.add_route(r.clone()).unwrap();
        mux.update_route(&r, RouteConfig::new("a.example.com", "127.0.0.1:0", "10.0.0.8:25565"))
            .unwrap();

        let task = tokio::spawn(mux.clone().serve());
        while mux.local_addr().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _client = tokio::net::TcpStream::connect(mux.local_addr().unwrap()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while recorder.0.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connection never dispatched");

        assert_eq!(recorder.0.lock().unwrap()[0].proxy_to, "10.0.0.8:25565");
        assert_eq!(mux.total_connections(), 1);

        mux.close();
        task.await.unwrap().unwrap();
    }
}
