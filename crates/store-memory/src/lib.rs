//! In-memory event store backend
//!
//! Backs broker tests and demos. Appends assign the dense global number and
//! the per-stream position, then signal every registered listener; cursors
//! clone the matching events at query time, which gives catch-up readers the
//! same consistent-snapshot view a storage-level read transaction would.

use conduit_common::{Event, Handle};
use conduit_store::{EventCursor, EventListener, EventQuery, EventStore, NewEvent, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

/// In-memory event store with live notifications
pub struct MemoryEventStore {
    inner: Mutex<Inner>,
}

struct Inner {
    /// Committed events; `events[n - 1].number == n`
    events: Vec<Event>,
    /// Next per-stream position ordinals
    stream_positions: HashMap<String, u64>,
    /// Persisted handle cursors
    handles: HashMap<String, Handle>,
    /// Listeners signalled on every append
    listeners: Vec<EventListener>,
}

impl MemoryEventStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: Vec::new(),
                stream_positions: HashMap::new(),
                handles: HashMap::new(),
                listeners: Vec::new(),
            }),
        }
    }

    /// Append an event, assigning its number and stream position
    ///
    /// Registered listeners are signalled before this returns; listeners
    /// whose channel has closed are dropped.
    pub fn append(&self, input: NewEvent) -> Event {
        let mut inner = self.inner.lock();

        let number = inner.events.len() as u64 + 1;
        let position = inner
            .stream_positions
            .entry(input.stream_id.clone())
            .and_modify(|p| *p += 1)
            .or_insert(1);
        let event = Event {
            number,
            position: *position,
            stream_id: input.stream_id,
            topic: input.topic,
            event_type: input.event_type,
            payload: input.payload,
        };

        inner.events.push(event.clone());
        inner.listeners.retain(|l| l.send(event.clone()).is_ok());

        event
    }

    /// Number of committed events
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for MemoryEventStore {
    type Cursor = MemoryCursor;

    fn index(&self) -> Result<u64> {
        Ok(self.inner.lock().events.len() as u64)
    }

    fn get_handle(&self, id: &str) -> Result<Option<Handle>> {
        Ok(self.inner.lock().handles.get(id).cloned())
    }

    fn upsert_handle(&self, id: &str, position: u64) -> Result<Handle> {
        let mut inner = self.inner.lock();
        let handle = match inner.handles.get(id) {
            Some(existing) => existing.at_position(position),
            None => Handle::new(id).at_position(position),
        };
        inner.handles.insert(id.to_string(), handle.clone());
        Ok(handle)
    }

    fn query_events(&self, query: &EventQuery) -> Result<MemoryCursor> {
        let inner = self.inner.lock();
        let events: Vec<Event> = inner
            .events
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        Ok(MemoryCursor { events, next: 0 })
    }

    fn register_listener(&self, listener: EventListener) {
        self.inner.lock().listeners.push(listener);
    }
}

/// Cursor over a snapshot of matching events
pub struct MemoryCursor {
    events: Vec<Event>,
    next: usize,
}

impl EventCursor for MemoryCursor {
    fn next_batch(&mut self, limit: usize) -> Result<Vec<Event>> {
        let end = (self.next + limit).min(self.events.len());
        let batch = self.events[self.next..end].to_vec();
        self.next = end;
        Ok(batch)
    }
}
