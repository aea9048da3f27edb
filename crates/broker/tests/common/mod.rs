//! Common test utilities for broker integration tests

use conduit_broker::{Broker, BrokerConfig, BrokerHandle};
use conduit_common::Event;
use conduit_store::{EventStore, NewEvent};
use conduit_store_memory::MemoryEventStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Spawn a broker for `handle_id` and return its client handle plus a
/// shutdown sender to stop it
pub fn spawn_broker<S: EventStore>(
    handle_id: &str,
    store: Arc<S>,
) -> (BrokerHandle, oneshot::Sender<()>) {
    let broker =
        Broker::new(handle_id, store, BrokerConfig::default()).expect("broker construction");
    let handle = broker.handle();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(broker.run(shutdown_rx));
    (handle, shutdown_tx)
}

/// A consumer-side delivery channel
pub fn consumer() -> (mpsc::UnboundedSender<Event>, mpsc::UnboundedReceiver<Event>) {
    mpsc::unbounded_channel()
}

/// Seed the store with one event per `(stream, topic)` pair
#[allow(dead_code)]
pub fn seed(store: &MemoryEventStore, entries: &[(&str, &str)]) {
    for (stream, topic) in entries {
        store.append(NewEvent::new(*stream, *topic).with_event_type("seeded"));
    }
}

/// Receive the next delivery or panic after a generous timeout
pub async fn recv(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("delivery channel closed")
}

/// Assert that no delivery arrives within a short window
#[allow(dead_code)]
pub async fn recv_none(rx: &mut mpsc::UnboundedReceiver<Event>) {
    let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(result.is_err(), "expected no delivery, got {:?}", result);
}

/// Receive the next delivery and acknowledge it
#[allow(dead_code)]
pub async fn recv_and_ack(
    broker: &BrokerHandle,
    consumer_id: &str,
    rx: &mut mpsc::UnboundedReceiver<Event>,
) -> Event {
    let event = recv(rx).await;
    broker
        .ack(consumer_id, event.number)
        .await
        .expect("ack failed");
    event
}
