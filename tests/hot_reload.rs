//! Route file changes applied to a live registry through the file watcher.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use hostgate::lifecycle::{self, ConfigReloader, Shutdown};
use hostgate::Registry;

#[tokio::test]
async fn edited_route_file_moves_live_route() {
    let backend = start_echo_backend().await;
    let old_addr = free_addr();
    let new_addr = free_addr();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("survival.toml");
    write_route_file(&path, "survival.example.com", old_addr, backend);
    write_route_file(&dir.path().join("creative.toml"), "creative.example.com", old_addr, backend);

    let registry = Arc::new(Registry::new());
    let started = lifecycle::start(&registry, dir.path()).unwrap();
    let _watcher = started.watcher;
    assert_eq!(started.bindings.len(), 2);

    let shutdown = Shutdown::new();
    let reload = tokio::spawn(
        ConfigReloader::new(registry.clone(), started.bindings, started.events).run(shutdown.subscribe()),
    );
    let serving = tokio::spawn({
        let registry = registry.clone();
        async move { registry.serve().await }
    });

    let old_mux = registry.multiplexer(&old_addr.to_string()).unwrap();
    assert!(wait_until(Duration::from_secs(2), || old_mux.is_listening()).await);

    write_route_file(&path, "survival.example.com", new_addr, backend);

    let moved = wait_until(Duration::from_secs(5), || {
        registry
            .multiplexer(&new_addr.to_string())
            .is_some_and(|m| m.is_listening() && m.contains("survival.example.com"))
    })
    .await;
    assert!(moved, "route never moved to the new address");
    assert_eq!(old_mux.hostnames(), vec!["creative.example.com".to_string()]);

    let (mut stream, handshake) = connect_as(new_addr, "survival.example.com", b"ping").await;
    let echoed = read_exact_timeout(&mut stream, handshake.len() + 4).await;
    assert_eq!(&echoed[handshake.len()..], b"ping");

    shutdown.trigger();
    within(Duration::from_secs(2), reload).await.unwrap();
    registry.close();
    within(Duration::from_secs(2), serving).await.unwrap().unwrap();
}

#[tokio::test]
async fn deleted_route_file_keeps_route_serving() {
    let backend = start_echo_backend().await;
    let addr = free_addr();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lobby.toml");
    write_route_file(&path, "lobby.example.com", addr, backend);

    let registry = Arc::new(Registry::new());
    let started = lifecycle::start(&registry, dir.path()).unwrap();
    let _watcher = started.watcher;

    let shutdown = Shutdown::new();
    let reload = tokio::spawn(
        ConfigReloader::new(registry.clone(), started.bindings, started.events).run(shutdown.subscribe()),
    );

    std::fs::remove_file(&path).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mux = registry.multiplexer(&addr.to_string()).unwrap();
    assert_eq!(mux.hostnames(), vec!["lobby.example.com".to_string()]);

    shutdown.trigger();
    within(Duration::from_secs(2), reload).await.unwrap();
}

#[tokio::test]
async fn atomically_saved_route_file_keeps_reloading() {
    let backend = start_echo_backend().await;
    let first = free_addr();
    let second = free_addr();
    let third = free_addr();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hub.toml");
    write_route_file(&path, "hub.example.com", first, backend);

    let registry = Arc::new(Registry::new());
    let started = lifecycle::start(&registry, dir.path()).unwrap();
    let _watcher = started.watcher;

    let shutdown = Shutdown::new();
    let reload = tokio::spawn(
        ConfigReloader::new(registry.clone(), started.bindings, started.events).run(shutdown.subscribe()),
    );
    let bound_to = |addr: std::net::SocketAddr| {
        let registry = registry.clone();
        move || {
            registry
                .multiplexer(&addr.to_string())
                .is_some_and(|m| m.contains("hub.example.com"))
        }
    };

    // Editor-style save: write a sibling file, then rename it over the route file.
    let staged = dir.path().join(".hub.toml.swp");
    write_route_file(&staged, "hub.example.com", second, backend);
    std::fs::rename(&staged, &path).unwrap();
    assert!(wait_until(Duration::from_secs(5), bound_to(second)).await);

    write_route_file(&path, "hub.example.com", third, backend);
    assert!(
        wait_until(Duration::from_secs(5), bound_to(third)).await,
        "in-place edit after an atomic save was not applied"
    );

    shutdown.trigger();
    within(Duration::from_secs(2), reload).await.unwrap();
}
