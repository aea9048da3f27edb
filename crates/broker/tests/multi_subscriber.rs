//! Multiple subscribers sharing one broker: independent filters, shared
//! single-in-flight dispatch, tracked vs untracked durability

mod common;

use common::{consumer, recv, recv_and_ack, recv_none, seed, spawn_broker};
use conduit_broker::{StartFrom, SubscribeOptions};
use conduit_store::{EventStore, NewEvent};
use conduit_store_memory::MemoryEventStore;
use std::sync::Arc;

#[tokio::test]
async fn test_two_subscribers_with_disjoint_topics() {
    let store = Arc::new(MemoryEventStore::new());
    seed(&store, &[("x", "a"), ("x", "b"), ("x", "a")]);

    let (broker, _shutdown) = spawn_broker("h", store.clone());

    let (sink1, mut rx1) = consumer();
    broker
        .subscribe(
            "c1",
            SubscribeOptions::new()
                .starting_at(StartFrom::Genesis)
                .with_topics(["a"]),
            sink1,
        )
        .await
        .unwrap();

    let (sink2, mut rx2) = consumer();
    broker
        .subscribe(
            "c2",
            SubscribeOptions::new()
                .starting_at(StartFrom::Genesis)
                .with_topics(["b"])
                .untracked(),
            sink2,
        )
        .await
        .unwrap();

    // Each subscriber sees exactly its own topic, in order
    assert_eq!(recv_and_ack(&broker, "c1", &mut rx1).await.number, 1);
    assert_eq!(recv_and_ack(&broker, "c2", &mut rx2).await.number, 2);
    assert_eq!(recv_and_ack(&broker, "c1", &mut rx1).await.number, 3);
    recv_none(&mut rx1).await;
    recv_none(&mut rx2).await;

    // Only the tracked subscriber moves the durable position
    assert_eq!(store.get_handle("h").unwrap().unwrap().position, 3);
}

#[tokio::test]
async fn test_untracked_acks_do_not_advance_handle() {
    let store = Arc::new(MemoryEventStore::new());
    seed(&store, &[("x", "b"), ("x", "b")]);

    let (broker, _shutdown) = spawn_broker("h", store.clone());
    let (sink, mut rx) = consumer();
    broker
        .subscribe(
            "c1",
            SubscribeOptions::new()
                .starting_at(StartFrom::Genesis)
                .untracked(),
            sink,
        )
        .await
        .unwrap();

    assert_eq!(recv_and_ack(&broker, "c1", &mut rx).await.number, 1);
    assert_eq!(recv_and_ack(&broker, "c1", &mut rx).await.number, 2);

    assert_eq!(store.get_handle("h").unwrap(), None);
}

#[tokio::test]
async fn test_at_most_one_delivery_in_flight() {
    let store = Arc::new(MemoryEventStore::new());
    seed(&store, &[("x", "a"), ("x", "b"), ("x", "a"), ("x", "b")]);

    let (broker, _shutdown) = spawn_broker("h", store.clone());

    let (sink1, mut rx1) = consumer();
    broker
        .subscribe(
            "c1",
            SubscribeOptions::new()
                .starting_at(StartFrom::Genesis)
                .with_topics(["a"]),
            sink1,
        )
        .await
        .unwrap();
    let (sink2, mut rx2) = consumer();
    broker
        .subscribe(
            "c2",
            SubscribeOptions::new()
                .starting_at(StartFrom::Genesis)
                .with_topics(["b"]),
            sink2,
        )
        .await
        .unwrap();

    // Event 1 is delivered to c1; while it is unacknowledged nothing moves,
    // even though c2's event 2 is next in the log
    assert_eq!(recv(&mut rx1).await.number, 1);
    recv_none(&mut rx2).await;

    let state = broker.state().await.unwrap();
    let in_flight: Vec<_> = state
        .subscriptions
        .iter()
        .filter(|s| s.syn > s.ack)
        .collect();
    assert_eq!(in_flight.len(), 1);
    assert!(!state.ready);
    // ack <= syn holds for everyone
    assert!(state.subscriptions.iter().all(|s| s.ack <= s.syn));

    broker.ack("c1", 1).await.unwrap();
    assert_eq!(recv_and_ack(&broker, "c2", &mut rx2).await.number, 2);
    assert_eq!(recv_and_ack(&broker, "c1", &mut rx1).await.number, 3);
    assert_eq!(recv_and_ack(&broker, "c2", &mut rx2).await.number, 4);
}

#[tokio::test]
async fn test_scope_unions_cover_all_subscribers() {
    let store = Arc::new(MemoryEventStore::new());

    let (broker, _shutdown) = spawn_broker("h", store.clone());

    let (sink1, _rx1) = consumer();
    broker
        .subscribe(
            "c1",
            SubscribeOptions::new().with_stream("x").with_topics(["a"]),
            sink1,
        )
        .await
        .unwrap();
    let (sink2, _rx2) = consumer();
    broker
        .subscribe(
            "c2",
            SubscribeOptions::new().with_stream("y").with_topics(["b"]),
            sink2,
        )
        .await
        .unwrap();

    let state = broker.state().await.unwrap();
    assert_eq!(state.streams, vec!["x".to_string(), "y".to_string()]);
    assert_eq!(state.topics, vec!["a".to_string(), "b".to_string()]);

    // An unconstrained subscriber widens the scope to everything
    let (sink3, _rx3) = consumer();
    broker
        .subscribe("c3", SubscribeOptions::new(), sink3)
        .await
        .unwrap();

    let state = broker.state().await.unwrap();
    assert!(state.streams.is_empty());
    assert!(state.topics.is_empty());
}

#[tokio::test]
async fn test_unsubscribe_releases_in_flight_delivery() {
    let store = Arc::new(MemoryEventStore::new());
    seed(&store, &[("x", "a"), ("x", "a")]);

    let (broker, _shutdown) = spawn_broker("h", store.clone());

    let (sink1, mut rx1) = consumer();
    broker
        .subscribe(
            "c1",
            SubscribeOptions::new().starting_at(StartFrom::Genesis),
            sink1,
        )
        .await
        .unwrap();
    // Event 1 goes to c1 (subscribed first) and stays unacknowledged
    assert_eq!(recv(&mut rx1).await.number, 1);

    let (sink2, mut rx2) = consumer();
    broker
        .subscribe(
            "c2",
            SubscribeOptions::new().starting_at(StartFrom::Genesis),
            sink2,
        )
        .await
        .unwrap();

    // Dropping c1 resolves the outstanding delivery and progress resumes
    broker.unsubscribe("c1").await.unwrap();
    let next = recv_and_ack(&broker, "c2", &mut rx2).await;
    assert!(next.number >= 1);

    let state = broker.state().await.unwrap();
    assert_eq!(state.subscriptions.len(), 1);
    assert_eq!(state.subscriptions[0].id, "c2");
}

#[tokio::test]
async fn test_dead_consumer_is_dropped_and_skipped() {
    let store = Arc::new(MemoryEventStore::new());

    let (broker, _shutdown) = spawn_broker("h", store.clone());

    // c1's receiving side is gone before anything is delivered
    let (sink1, rx1) = consumer();
    drop(rx1);
    broker
        .subscribe(
            "c1",
            SubscribeOptions::new().starting_at(StartFrom::Genesis),
            sink1,
        )
        .await
        .unwrap();

    let (sink2, mut rx2) = consumer();
    broker
        .subscribe(
            "c2",
            SubscribeOptions::new().starting_at(StartFrom::Genesis),
            sink2,
        )
        .await
        .unwrap();

    store.append(NewEvent::new("x", "a"));

    // Dispatch tries c1 first, finds it dead, drops it, and delivers to c2
    assert_eq!(recv_and_ack(&broker, "c2", &mut rx2).await.number, 1);

    let state = broker.state().await.unwrap();
    assert_eq!(state.subscriptions.len(), 1);
    assert_eq!(state.subscriptions[0].id, "c2");
}
