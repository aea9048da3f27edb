//! Event store interface consumed by conduit brokers
//!
//! This crate defines the storage seam: brokers drain history and resume
//! durable cursors through [`EventStore`] without knowing which backend is
//! behind it. Backends (in-memory, fjall) live in sibling crates.
//!
//! All methods are synchronous: the broker serializes its own state
//! transitions, and catch-up reads happen on a dedicated worker task, so an
//! async storage interface would buy nothing here.

pub mod error;
mod query;

pub use error::{Result, StoreError};
pub use query::EventQuery;

use conduit_common::{Event, Handle};
use tokio::sync::mpsc;

/// Channel on which a store pushes newly committed events to a registered
/// listener. Stores drop listeners whose receiving side has gone away.
pub type EventListener = mpsc::UnboundedSender<Event>;

/// Storage backend for an event log with durable handle cursors
pub trait EventStore: Send + Sync + 'static {
    /// Streaming cursor type produced by [`query_events`](Self::query_events)
    type Cursor: EventCursor;

    /// Highest committed event number (0 when the log is empty)
    fn index(&self) -> Result<u64>;

    /// Look up a persisted handle cursor
    fn get_handle(&self, id: &str) -> Result<Option<Handle>>;

    /// Insert or update a handle cursor
    ///
    /// Monotonicity of the position is enforced by the caller (the broker),
    /// not by storage.
    fn upsert_handle(&self, id: &str, position: u64) -> Result<Handle>;

    /// Open a cursor over committed events matching `query`, in ascending
    /// `number` order
    ///
    /// The cursor observes a consistent snapshot: events committed after the
    /// cursor was opened are not returned.
    fn query_events(&self, query: &EventQuery) -> Result<Self::Cursor>;

    /// Register a listener to be signalled with every event committed from
    /// now on
    fn register_listener(&self, listener: EventListener);
}

/// Streaming read over the results of a store query
pub trait EventCursor: Send {
    /// Fetch up to `limit` further events
    ///
    /// An empty batch means the cursor is exhausted; implementations must
    /// scan past non-matching rows rather than return an empty non-terminal
    /// batch.
    fn next_batch(&mut self, limit: usize) -> Result<Vec<Event>>;
}

/// Input for appending an event
///
/// The store assigns the global `number` and per-stream `position` at commit
/// time; callers only name the stream, topic, type, and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Stream the event belongs to
    pub stream_id: String,
    /// Topic used for subscription whitelisting
    pub topic: String,
    /// Application-level event type
    pub event_type: String,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
}

impl NewEvent {
    /// Create an append input with empty type and payload
    pub fn new(stream_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            topic: topic.into(),
            event_type: String::new(),
            payload: Vec::new(),
        }
    }

    /// Set the application-level event type
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    /// Set the payload bytes
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}
