//! Example of subscribing two consumers with different topic filters
//!
//! This demonstrates catch-up from existing history, ack-gated delivery,
//! the hand-over to live tailing, and the durable handle position advancing
//! with the tracked consumer's acks.

use conduit_broker::{Broker, BrokerConfig, BrokerHandle, StartFrom, SubscribeOptions};
use conduit_common::Event;
use conduit_store::{EventStore, NewEvent};
use conduit_store_memory::MemoryEventStore;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

#[tokio::main]
async fn main() {
    println!("=== Conduit Broker Demo ===\n");

    // Seed a store with some history
    let store = Arc::new(MemoryEventStore::new());
    for (stream, topic) in [
        ("account-1", "deposits"),
        ("account-1", "withdrawals"),
        ("account-2", "deposits"),
        ("account-1", "deposits"),
    ] {
        let event = store.append(
            NewEvent::new(stream, topic)
                .with_event_type("money-moved")
                .with_payload(b"{}".to_vec()),
        );
        println!("seeded event {} ({} / {})", event.number, stream, topic);
    }

    // Spawn the broker for handle "ledger"
    let broker = Broker::new("ledger", store.clone(), BrokerConfig::default()).unwrap();
    let handle = broker.handle();
    let (_shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(broker.run(shutdown_rx));

    // A tracked consumer for deposits and an untracked one for withdrawals
    let (deposit_sink, deposit_rx) = mpsc::unbounded_channel();
    handle
        .subscribe(
            "deposit-projector",
            SubscribeOptions::new()
                .starting_at(StartFrom::Genesis)
                .with_topics(["deposits"]),
            deposit_sink,
        )
        .await
        .unwrap();

    let (audit_sink, audit_rx) = mpsc::unbounded_channel();
    handle
        .subscribe(
            "withdrawal-auditor",
            SubscribeOptions::new()
                .starting_at(StartFrom::Genesis)
                .with_topics(["withdrawals"])
                .untracked(),
            audit_sink,
        )
        .await
        .unwrap();

    let deposits = tokio::spawn(run_consumer(
        "deposit-projector",
        handle.clone(),
        deposit_rx,
    ));
    let audits = tokio::spawn(run_consumer(
        "withdrawal-auditor",
        handle.clone(),
        audit_rx,
    ));

    // Let catch-up drain, then append live events
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    println!("\nappending live events...");
    store.append(NewEvent::new("account-2", "withdrawals").with_event_type("money-moved"));
    store.append(NewEvent::new("account-1", "deposits").with_event_type("money-moved"));

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let position = store.get_handle("ledger").unwrap().unwrap().position;
    println!("\ndurable handle position: {}", position);
    println!("(the untracked auditor's acks never move it)");

    deposits.abort();
    audits.abort();
}

/// Receive events and ack each one, printing as we go
async fn run_consumer(
    name: &'static str,
    broker: BrokerHandle,
    mut rx: mpsc::UnboundedReceiver<Event>,
) {
    while let Some(event) = rx.recv().await {
        println!(
            "{} <- event {} ({} / {})",
            name, event.number, event.stream_id, event.topic
        );
        broker.ack(name, event.number).await.unwrap();
    }
}
