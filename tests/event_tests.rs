//! Tests for the typed event bus and configuration

use std::sync::Arc;

use parking_lot::Mutex;
use pulsenet::{Config, EventBus, NetError};

#[derive(Debug)]
struct Tick(u32);

#[derive(Debug)]
struct Other;

// =============================================================================
// EventBus Tests
// =============================================================================

#[test]
fn test_subscribers_called_in_order() {
    let mut bus = EventBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let first = log.clone();
    bus.subscribe::<Tick, _>(move |tick| first.lock().push(("first", tick.0)));
    let second = log.clone();
    bus.subscribe::<Tick, _>(move |tick| second.lock().push(("second", tick.0)));

    bus.notify(&Tick(7));

    assert_eq!(*log.lock(), vec![("first", 7), ("second", 7)]);
}

#[test]
fn test_events_are_isolated_by_type() {
    let mut bus = EventBus::new();
    let ticks = Arc::new(Mutex::new(0));

    let counter = ticks.clone();
    bus.subscribe::<Tick, _>(move |_| *counter.lock() += 1);

    bus.notify(&Other);
    assert_eq!(*ticks.lock(), 0);
    assert_eq!(bus.subscriber_count::<Tick>(), 1);
    assert_eq!(bus.subscriber_count::<Other>(), 0);
}

#[test]
fn test_unsubscribe() {
    let mut bus = EventBus::new();
    let ticks = Arc::new(Mutex::new(0));

    let counter = ticks.clone();
    let id = bus.subscribe::<Tick, _>(move |_| *counter.lock() += 1);

    bus.notify(&Tick(1));
    assert!(bus.unsubscribe(id));
    assert!(!bus.unsubscribe(id));
    bus.notify(&Tick(2));

    assert_eq!(*ticks.lock(), 1);
    assert_eq!(bus.subscriber_count::<Tick>(), 0);
}

// =============================================================================
// Config Tests
// =============================================================================

#[test]
fn test_config_defaults() {
    let config = Config::default();

    assert_eq!(config.recv_chunk_size, 1024);
    assert_eq!(config.ping_interval_ms, 1000);
    assert_eq!(config.server_name, "pulsenet");
}

#[test]
fn test_config_builder_validates() {
    let result = Config::builder().recv_chunk_size(0).build();
    assert!(matches!(result, Err(NetError::Config(_))));

    let result = Config::builder().max_frame_size(0).build();
    assert!(matches!(result, Err(NetError::Config(_))));

    let config = Config::builder()
        .server_name("arena")
        .connection_timeout_ms(0)
        .build()
        .unwrap();
    assert_eq!(config.server_name, "arena");
    assert_eq!(config.connection_timeout_ms, 0);
}
