//! The per-handle broker
//!
//! A broker is a single-owner state machine fed by a mailbox: subscribes,
//! acks, worker pushes, and live events are all handled one at a time, so
//! no lock ever guards broker state. The one parallel piece is the
//! catch-up worker, which communicates by messages only.
//!
//! Dispatch is globally serialized: at most one event is in flight across
//! all subscribers of a broker, and the next event moves only after the
//! previous one is acknowledged (or its subscriber is gone).

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::subscription::{
    StartFrom, SubscribeOptions, Subscriber, Subscription, SubscriptionTable,
};
use crate::worker::{self, WorkerHandle, WorkerOutcome};
use conduit_common::{Event, Handle};
use conduit_store::{EventCursor, EventQuery, EventStore};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Messages handled by the broker actor
pub(crate) enum BrokerMsg {
    Subscribe {
        consumer: String,
        opts: SubscribeOptions,
        sink: mpsc::UnboundedSender<Event>,
        reply: oneshot::Sender<Result<Subscription>>,
    },
    Unsubscribe {
        consumer: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Ack {
        consumer: String,
        number: u64,
        reply: oneshot::Sender<Result<u64>>,
    },
    GetSubscription {
        consumer: String,
        reply: oneshot::Sender<Option<Subscription>>,
    },
    GetState {
        reply: oneshot::Sender<BrokerState>,
    },
    /// An event produced by the catch-up worker
    Push { worker: u64, event: Event },
    /// Terminal report from a worker
    WorkerDone {
        worker: u64,
        outcome: WorkerOutcome,
    },
}

/// Dispatch mode, derived from worker and buffer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerMode {
    /// A worker is draining history from the store
    CatchUp,
    /// History is drained; buffered events remain
    Draining,
    /// Buffer empty, store notifications armed
    LiveTail,
}

/// Read-only snapshot of broker state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerState {
    pub handle: Handle,
    pub mode: BrokerMode,
    pub ready: bool,
    pub buffer_len: usize,
    pub streams: Vec<String>,
    pub topics: Vec<String>,
    pub subscriptions: Vec<Subscription>,
}

/// Cloneable client handle to a running broker
#[derive(Clone)]
pub struct BrokerHandle {
    handle_id: String,
    tx: mpsc::UnboundedSender<BrokerMsg>,
    call_timeout: Duration,
}

impl BrokerHandle {
    /// The handle id this broker serves
    pub fn handle_id(&self) -> &str {
        &self.handle_id
    }

    /// Create or return the subscription for `consumer`
    ///
    /// Idempotent: if the consumer is already subscribed, its existing
    /// subscription is returned unchanged and `sink` is ignored. Delivered
    /// events arrive on `sink`, one at a time, each gated on [`ack`](Self::ack).
    pub async fn subscribe(
        &self,
        consumer: impl Into<String>,
        opts: SubscribeOptions,
        sink: mpsc::UnboundedSender<Event>,
    ) -> Result<Subscription> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerMsg::Subscribe {
            consumer: consumer.into(),
            opts,
            sink,
            reply,
        })?;
        self.bounded(rx).await?
    }

    /// Remove the subscription for `consumer` (no-op if absent)
    pub async fn unsubscribe(&self, consumer: impl Into<String>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerMsg::Unsubscribe {
            consumer: consumer.into(),
            reply,
        })?;
        self.bounded(rx).await?
    }

    /// Acknowledge delivery of event `number`
    ///
    /// Acks that do not match the outstanding delivery are ignored. This is
    /// the one call that can surface a storage error: persisting the
    /// advanced handle position happens on this path.
    pub async fn ack(&self, consumer: impl Into<String>, number: u64) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerMsg::Ack {
            consumer: consumer.into(),
            number,
            reply,
        })?;
        rx.await.map_err(|_| BrokerError::Closed)?
    }

    /// Snapshot of the subscription for `consumer`, if any
    pub async fn subscription(&self, consumer: impl Into<String>) -> Result<Option<Subscription>> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerMsg::GetSubscription {
            consumer: consumer.into(),
            reply,
        })?;
        self.bounded(rx).await
    }

    /// Snapshot of the broker's state
    pub async fn state(&self) -> Result<BrokerState> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerMsg::GetState { reply })?;
        self.bounded(rx).await
    }

    fn send(&self, msg: BrokerMsg) -> Result<()> {
        self.tx.send(msg).map_err(|_| BrokerError::Closed)
    }

    async fn bounded<T>(&self, rx: oneshot::Receiver<T>) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(BrokerError::Closed),
            Err(_) => Err(BrokerError::Timeout),
        }
    }
}

/// The broker actor for one handle
pub struct Broker<S: EventStore> {
    handle_id: String,
    store: Arc<S>,
    config: BrokerConfig,

    /// Cached copy of the durable cursor
    handle: Handle,

    subscriptions: SubscriptionTable,

    /// Deduplicated stream scope for store queries (over-approximation)
    streams: Vec<String>,

    /// Deduplicated topic scope for store queries (over-approximation)
    topics: Vec<String>,

    /// Overflow buffer for reconciliation results and live-tail events
    buffer: VecDeque<Event>,

    /// At most one catch-up worker
    worker: Option<WorkerHandle>,

    /// No delivery is in flight
    ready: bool,

    /// Live-tail notification channel; `None` while catching up
    live: Option<mpsc::UnboundedReceiver<Event>>,

    rx: mpsc::UnboundedReceiver<BrokerMsg>,
    tx: mpsc::UnboundedSender<BrokerMsg>,
    next_worker_id: u64,
}

impl<S: EventStore> Broker<S> {
    /// Create a broker for `handle_id`, loading its persisted cursor
    ///
    /// A handle with no persisted row starts at position 0; the row is
    /// first written when a tracked subscriber's ack advances it.
    pub fn new(handle_id: impl Into<String>, store: Arc<S>, config: BrokerConfig) -> Result<Self> {
        let handle_id = handle_id.into();
        let handle = store
            .get_handle(&handle_id)?
            .unwrap_or_else(|| Handle::new(&handle_id));
        let (tx, rx) = mpsc::unbounded_channel();

        tracing::info!(
            "[{}] broker created at position {}",
            handle_id,
            handle.position
        );

        Ok(Self {
            handle_id,
            store,
            config,
            handle,
            subscriptions: SubscriptionTable::new(),
            streams: Vec::new(),
            topics: Vec::new(),
            buffer: VecDeque::new(),
            worker: None,
            ready: true,
            live: None,
            rx,
            tx,
            next_worker_id: 1,
        })
    }

    /// Client handle for this broker
    pub fn handle(&self) -> BrokerHandle {
        BrokerHandle {
            handle_id: self.handle_id.clone(),
            tx: self.tx.clone(),
            call_timeout: self.config.call_timeout,
        }
    }

    /// Run the actor until `shutdown` fires
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::info!("[{}] shutdown signal received", self.handle_id);
                    break;
                }

                msg = self.rx.recv() => match msg {
                    Some(msg) => self.handle_msg(msg),
                    None => break,
                },

                event = Self::next_live_event(&mut self.live) => match event {
                    Some(event) => self.on_live_event(event),
                    None => self.live = None,
                },
            }
        }

        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        tracing::info!("[{}] broker stopped", self.handle_id);
    }

    /// Resolves to the next live-tail event, or pends forever while
    /// notifications are disarmed
    async fn next_live_event(live: &mut Option<mpsc::UnboundedReceiver<Event>>) -> Option<Event> {
        match live {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    fn handle_msg(&mut self, msg: BrokerMsg) {
        match msg {
            BrokerMsg::Subscribe {
                consumer,
                opts,
                sink,
                reply,
            } => {
                let _ = reply.send(self.on_subscribe(consumer, opts, sink));
            }
            BrokerMsg::Unsubscribe { consumer, reply } => {
                let _ = reply.send(self.on_unsubscribe(&consumer));
            }
            BrokerMsg::Ack {
                consumer,
                number,
                reply,
            } => {
                let _ = reply.send(self.on_ack(&consumer, number));
            }
            BrokerMsg::GetSubscription { consumer, reply } => {
                let _ = reply.send(self.subscriptions.get(&consumer).map(Subscriber::snapshot));
            }
            BrokerMsg::GetState { reply } => {
                let _ = reply.send(self.state_snapshot());
            }
            BrokerMsg::Push { worker, event } => self.on_push(worker, event),
            BrokerMsg::WorkerDone { worker, outcome } => self.on_worker_done(worker, outcome),
        }
    }

    fn on_subscribe(
        &mut self,
        consumer: String,
        opts: SubscribeOptions,
        sink: mpsc::UnboundedSender<Event>,
    ) -> Result<Subscription> {
        if let Some(existing) = self.subscriptions.get(&consumer) {
            // Idempotent: the existing subscription is returned unchanged
            return Ok(existing.snapshot());
        }

        let start = self.resolve_start(opts.start)?;
        tracing::debug!(
            "[{}] subscribing {} at {} (track: {})",
            self.handle_id,
            consumer,
            start,
            opts.track
        );

        let subscriber = Subscriber::new(consumer, &self.handle_id, start, opts, sink);
        let snapshot = subscriber.snapshot();
        self.subscriptions.insert(subscriber);
        self.recompute_scope();
        self.start_catch_up();
        Ok(snapshot)
    }

    /// Resolve the start position for a new subscription
    ///
    /// A handle with durable progress overrides the requested start: the
    /// broker cannot rewind below its persisted position.
    fn resolve_start(&self, start: StartFrom) -> Result<u64> {
        if self.handle.position > 0 {
            return Ok(self.handle.position);
        }
        match start {
            StartFrom::Current => Ok(self.store.index()?),
            StartFrom::Genesis => Ok(0),
            StartFrom::Exact(number) => Ok(number),
        }
    }

    fn on_unsubscribe(&mut self, consumer: &str) -> Result<()> {
        let Some(removed) = self.subscriptions.remove(consumer) else {
            return Ok(());
        };
        tracing::debug!("[{}] unsubscribed {}", self.handle_id, consumer);

        if removed.in_flight() {
            // Nobody will ack the outstanding delivery
            self.ready = true;
        }
        if self.subscriptions.is_empty() {
            self.park();
            return Ok(());
        }
        self.recompute_scope();
        self.sched_next();
        Ok(())
    }

    /// Stop all delivery machinery; the broker idles until the next
    /// subscribe
    fn park(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        self.buffer.clear();
        self.live = None;
        self.ready = true;
        tracing::debug!("[{}] no subscribers left, parked", self.handle_id);
    }

    fn on_ack(&mut self, consumer: &str, number: u64) -> Result<u64> {
        let track = {
            let Some(subscriber) = self.subscriptions.get_mut(consumer) else {
                return Ok(number);
            };
            if subscriber.syn != number || !subscriber.in_flight() {
                // Acks that do not match the outstanding delivery are
                // ignored (idempotent)
                tracing::debug!(
                    "[{}] ignoring ack {} from {} (syn {}, ack {})",
                    self.handle_id,
                    number,
                    consumer,
                    subscriber.syn,
                    subscriber.ack
                );
                return Ok(number);
            }
            subscriber.ack = number;
            subscriber.track
        };

        let max_ack = self.subscriptions.max_ack().unwrap_or(0);
        self.buffer.retain(|e| e.number > max_ack);
        self.ready = true;

        // Durability follows the fastest tracked subscriber
        let result = if track && number == max_ack && number > self.handle.position {
            match self.store.upsert_handle(&self.handle_id, number) {
                Ok(handle) => {
                    tracing::debug!("[{}] handle advanced to {}", self.handle_id, number);
                    self.handle = handle;
                    Ok(number)
                }
                Err(err) => {
                    // The in-memory ack stays advanced; the next qualifying
                    // ack retries the persist
                    tracing::error!(
                        "[{}] failed to persist handle at {}: {}",
                        self.handle_id,
                        number,
                        err
                    );
                    Err(err.into())
                }
            }
        } else {
            Ok(number)
        };

        self.sched_next();
        result
    }

    fn on_push(&mut self, worker_id: u64, event: Event) {
        match self.worker.as_mut() {
            Some(worker) if worker.id == worker_id => worker.waiting = true,
            _ => {
                tracing::debug!(
                    "[{}] ignoring push {} from stale worker {}",
                    self.handle_id,
                    event.number,
                    worker_id
                );
                return;
            }
        }

        if !self.dispatch(event) {
            self.sched_next();
        }
    }

    /// Deliver `event` to the first subscriber whose filter accepts it
    ///
    /// Returns false when nobody accepts (the event is dropped from the
    /// broker's view and `ready` is released). Subscribers whose sink has
    /// closed are dropped and the next taker is tried.
    fn dispatch(&mut self, event: Event) -> bool {
        loop {
            let Some(index) = self.subscriptions.first_accepting(&event) else {
                self.ready = true;
                return false;
            };
            match self.subscriptions.deliver(index, &event) {
                Ok(consumer) => {
                    tracing::debug!(
                        "[{}] delivered {} to {}",
                        self.handle_id,
                        event.number,
                        consumer
                    );
                    self.ready = false;
                    return true;
                }
                Err(consumer) => {
                    tracing::warn!(
                        "[{}] dropping {}: consumer is gone",
                        self.handle_id,
                        consumer
                    );
                    self.subscriptions.remove(&consumer);
                    if self.subscriptions.is_empty() {
                        self.park();
                        return false;
                    }
                    self.recompute_scope();
                }
            }
        }
    }

    fn on_worker_done(&mut self, worker_id: u64, outcome: WorkerOutcome) {
        if !self.worker.as_ref().is_some_and(|w| w.id == worker_id) {
            tracing::debug!(
                "[{}] ignoring report from stale worker {}: {:?}",
                self.handle_id,
                worker_id,
                outcome
            );
            return;
        }
        self.worker = None;

        match outcome {
            WorkerOutcome::Finished { boundary } => self.enter_live_tail(boundary),
            WorkerOutcome::Aborted { last } => {
                tracing::warn!(
                    "[{}] catch-up aborted after {}, reconciling from there",
                    self.handle_id,
                    last
                );
                self.enter_live_tail(last);
            }
            WorkerOutcome::Stopped { last } => {
                // A stop this broker did not issue; degrade like an abort
                tracing::warn!(
                    "[{}] worker stopped unexpectedly after {}",
                    self.handle_id,
                    last
                );
                self.enter_live_tail(last);
            }
        }
    }

    /// Transition to live-tail mode, closing the race between the worker's
    /// snapshot and concurrent appends
    ///
    /// Notifications are armed before the reconciliation query so an append
    /// between the two is caught on the live channel; the per-subscriber
    /// position gate drops any duplicate this ordering produces.
    fn enter_live_tail(&mut self, boundary: u64) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.store.register_listener(tx);
        self.live = Some(rx);

        let query = self.scoped_query(boundary);
        match self.store.query_events(&query) {
            Ok(mut cursor) => loop {
                match cursor.next_batch(self.config.batch_size) {
                    Ok(events) if events.is_empty() => break,
                    Ok(events) => self.buffer.extend(events),
                    Err(err) => {
                        tracing::error!(
                            "[{}] reconciliation read failed: {}",
                            self.handle_id,
                            err
                        );
                        break;
                    }
                }
            },
            Err(err) => {
                tracing::error!("[{}] reconciliation query failed: {}", self.handle_id, err);
            }
        }

        tracing::info!(
            "[{}] caught up at {}, live tail armed ({} buffered)",
            self.handle_id,
            boundary,
            self.buffer.len()
        );
        self.sched_next();
    }

    fn on_live_event(&mut self, event: Event) {
        self.buffer.push_back(event);
        self.sched_next();
    }

    /// Stop any current worker and start a fresh one from the lowest syn
    fn start_catch_up(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        // Buffered events are committed and therefore inside the new
        // worker's boundary; rewound history must not be delivered behind
        // them
        self.buffer.clear();
        self.live = None;
        self.ready = self.subscriptions.all_quiescent();

        let from = self.subscriptions.min_syn().unwrap_or(self.handle.position);
        let query = self.scoped_query(from);
        let id = self.next_worker_id;
        self.next_worker_id += 1;

        tracing::info!("[{}] catch-up {} starting after {}", self.handle_id, id, from);
        self.worker = Some(worker::spawn(
            id,
            Arc::clone(&self.store),
            self.handle_id.clone(),
            query,
            self.config.batch_size,
            self.tx.clone(),
        ));
        self.sched_next();
    }

    fn scoped_query(&self, from: u64) -> EventQuery {
        EventQuery::events()
            .after(from)
            .in_streams(self.streams.iter().cloned())
            .with_topics(self.topics.iter().cloned())
    }

    fn recompute_scope(&mut self) {
        self.streams = self.subscriptions.stream_union();
        self.topics = self.subscriptions.topic_union();
    }

    /// Take the next step that can make progress, if any
    ///
    /// Invoked after every state change that may unblock delivery: either
    /// release the parked worker, or pop the buffer head and dispatch it
    /// through the same path worker pushes take.
    fn sched_next(&mut self) {
        loop {
            if self.buffer.is_empty() {
                if self.ready
                    && let Some(worker) = self.worker.as_mut()
                    && worker.waiting
                {
                    worker.advance();
                }
                return;
            }
            if !self.ready || !self.subscriptions.all_quiescent() {
                return;
            }
            let Some(event) = self.buffer.pop_front() else {
                return;
            };
            self.ready = false;
            if self.dispatch(event) {
                return;
            }
            // Nobody wanted it; dispatch released `ready`, keep draining
        }
    }

    fn state_snapshot(&self) -> BrokerState {
        let mode = if self.worker.is_some() {
            BrokerMode::CatchUp
        } else if !self.buffer.is_empty() {
            BrokerMode::Draining
        } else {
            BrokerMode::LiveTail
        };
        BrokerState {
            handle: self.handle.clone(),
            mode,
            ready: self.ready,
            buffer_len: self.buffer.len(),
            streams: self.streams.clone(),
            topics: self.topics.clone(),
            subscriptions: self.subscriptions.snapshots(),
        }
    }
}
