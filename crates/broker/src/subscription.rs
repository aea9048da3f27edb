//! Subscriber records and the in-memory subscription table
//!
//! The table is owned by a single broker and keyed by consumer identity.
//! It also derives the stream/topic unions used to scope store queries.
//! Those unions over-approximate: a subscriber with no stream constraint
//! (or an empty topic whitelist) forces the corresponding union to be
//! unconstrained, so a scoped query can never hide events from any
//! subscriber. Per-event admission always goes through the filter.

use crate::filter;
use conduit_common::Event;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Where a new subscription starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFrom {
    /// The current head of the log; history is skipped
    Current,
    /// The beginning of the log
    Genesis,
    /// Strictly after the given event number
    Exact(u64),
}

/// Options accepted by subscribe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Requested start position; ignored when the handle already has
    /// durable progress
    pub start: StartFrom,

    /// Topic whitelist; empty means all topics
    pub topics: Vec<String>,

    /// Optional stream scope; `None` means all streams
    pub stream: Option<String>,

    /// Whether this subscriber's acks advance the durable handle position
    pub track: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            start: StartFrom::Current,
            topics: Vec::new(),
            stream: None,
            track: true,
        }
    }
}

impl SubscribeOptions {
    /// Options with the defaults: start at head, all topics, all streams,
    /// tracked
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requested start position
    pub fn starting_at(mut self, start: StartFrom) -> Self {
        self.start = start;
        self
    }

    /// Restrict visible events to the given topics
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict visible events to a single stream
    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self
    }

    /// Exclude this subscriber's acks from durable position tracking
    pub fn untracked(mut self) -> Self {
        self.track = false;
        self
    }
}

/// Read-only snapshot of a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Consumer identity, unique per broker
    pub id: String,
    /// Owning handle id
    pub handle: String,
    /// Highest event number acknowledged by this subscriber
    pub ack: u64,
    /// Highest event number sent to this subscriber
    pub syn: u64,
    /// Whether acks contribute to durability
    pub track: bool,
    /// Optional stream scope
    pub stream: Option<String>,
    /// Topic whitelist; empty means all topics
    pub topics: Vec<String>,
}

/// Internal subscriber record owned by a broker
#[derive(Debug)]
pub(crate) struct Subscriber {
    pub id: String,
    pub handle: String,
    pub ack: u64,
    pub syn: u64,
    pub track: bool,
    pub stream: Option<String>,
    pub topics: Vec<String>,
    /// Delivery channel to the consumer
    pub sink: mpsc::UnboundedSender<Event>,
}

impl Subscriber {
    pub(crate) fn new(
        id: String,
        handle: impl Into<String>,
        start: u64,
        opts: SubscribeOptions,
        sink: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            id,
            handle: handle.into(),
            ack: start,
            syn: start,
            track: opts.track,
            stream: opts.stream,
            topics: opts.topics,
            sink,
        }
    }

    /// Whether a delivery is outstanding
    pub(crate) fn in_flight(&self) -> bool {
        self.syn > self.ack
    }

    pub(crate) fn snapshot(&self) -> Subscription {
        Subscription {
            id: self.id.clone(),
            handle: self.handle.clone(),
            ack: self.ack,
            syn: self.syn,
            track: self.track,
            stream: self.stream.clone(),
            topics: self.topics.clone(),
        }
    }
}

/// In-memory set of subscribers keyed by consumer identity
///
/// Kept in subscribe order so dispatch ("first subscriber whose filter
/// accepts") is deterministic.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionTable {
    subscribers: Vec<Subscriber>,
}

impl SubscriptionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Subscriber> {
        self.subscribers.iter().find(|s| s.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Subscriber> {
        self.subscribers.iter_mut().find(|s| s.id == id)
    }

    pub(crate) fn insert(&mut self, subscriber: Subscriber) {
        self.subscribers.push(subscriber);
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Subscriber> {
        let index = self.subscribers.iter().position(|s| s.id == id)?;
        Some(self.subscribers.remove(index))
    }

    /// Lowest syn across subscribers; the catch-up worker restarts from here
    pub(crate) fn min_syn(&self) -> Option<u64> {
        self.subscribers.iter().map(|s| s.syn).min()
    }

    /// Highest ack across subscribers; the buffer is pruned up to here
    pub(crate) fn max_ack(&self) -> Option<u64> {
        self.subscribers.iter().map(|s| s.ack).max()
    }

    /// No subscriber has a delivery outstanding
    pub(crate) fn all_quiescent(&self) -> bool {
        self.subscribers.iter().all(|s| s.ack == s.syn)
    }

    /// Index of the first subscriber whose filter accepts `event`
    pub(crate) fn first_accepting(&self, event: &Event) -> Option<usize> {
        self.subscribers
            .iter()
            .position(|s| filter::accepts(s, event))
    }

    /// Send `event` to the subscriber at `index`, marking it in-flight
    ///
    /// Returns the consumer id either way; `Err` means the consumer's
    /// channel has closed and the subscriber should be dropped.
    pub(crate) fn deliver(
        &mut self,
        index: usize,
        event: &Event,
    ) -> std::result::Result<String, String> {
        let subscriber = &mut self.subscribers[index];
        match subscriber.sink.send(event.clone()) {
            Ok(()) => {
                subscriber.syn = event.number;
                Ok(subscriber.id.clone())
            }
            Err(_) => Err(subscriber.id.clone()),
        }
    }

    /// Deduplicated stream scope for store queries
    ///
    /// Empty (= unconstrained) as soon as one subscriber has no stream
    /// constraint.
    pub(crate) fn stream_union(&self) -> Vec<String> {
        let mut union = Vec::new();
        for subscriber in &self.subscribers {
            match &subscriber.stream {
                None => return Vec::new(),
                Some(stream) if !union.contains(stream) => union.push(stream.clone()),
                Some(_) => {}
            }
        }
        union
    }

    /// Deduplicated topic scope for store queries
    ///
    /// Empty (= unconstrained) as soon as one subscriber whitelists nothing.
    pub(crate) fn topic_union(&self) -> Vec<String> {
        let mut union = Vec::new();
        for subscriber in &self.subscribers {
            if subscriber.topics.is_empty() {
                return Vec::new();
            }
            for topic in &subscriber.topics {
                if !union.contains(topic) {
                    union.push(topic.clone());
                }
            }
        }
        union
    }

    pub(crate) fn snapshots(&self) -> Vec<Subscription> {
        self.subscribers.iter().map(Subscriber::snapshot).collect()
    }
}
