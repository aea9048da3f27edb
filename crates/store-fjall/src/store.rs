//! Fjall-backed event store implementation

use crate::config::FjallConfig;
use crate::encoding::{self, INDEX_KEY};
use conduit_common::{Event, Handle};
use conduit_store::{
    EventCursor, EventListener, EventQuery, EventStore, NewEvent, Result, StoreError,
};
use fjall::{Keyspace, Partition, PartitionCreateOptions};
use parking_lot::Mutex;

/// Durable event store on a fjall keyspace
pub struct FjallEventStore {
    keyspace: Keyspace,

    /// Committed events: big-endian number -> JSON row
    events: Partition,

    /// Handle cursors: id -> JSON row
    handles: Partition,

    /// Log index and per-stream position counters
    meta: Partition,

    /// Persist mode applied after each write
    persist_mode: fjall::PersistMode,

    /// Serializes number/position allocation with the append batch
    write_lock: Mutex<()>,

    /// Listeners signalled on every append
    listeners: Mutex<Vec<EventListener>>,
}

impl FjallEventStore {
    /// Open (or create) a store at the configured directory
    pub fn open(config: FjallConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let keyspace = fjall::Config::new(&config.data_dir)
            .cache_size(config.cache_size)
            .open()
            .map_err(StoreError::backend)?;

        let events = keyspace
            .open_partition(
                "events",
                PartitionCreateOptions::default()
                    .block_size(64 * 1024)
                    .compression(config.compression),
            )
            .map_err(StoreError::backend)?;

        let handles = keyspace
            .open_partition(
                "handles",
                PartitionCreateOptions::default()
                    .block_size(16 * 1024)
                    .compression(fjall::CompressionType::None),
            )
            .map_err(StoreError::backend)?;

        let meta = keyspace
            .open_partition(
                "meta",
                PartitionCreateOptions::default()
                    .block_size(16 * 1024)
                    .compression(fjall::CompressionType::None),
            )
            .map_err(StoreError::backend)?;

        Ok(Self {
            keyspace,
            events,
            handles,
            meta,
            persist_mode: config.persist_mode,
            write_lock: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Append an event, assigning its number and stream position
    ///
    /// The event row, the log index, and the stream position counter are
    /// committed in one atomic batch. Registered listeners are signalled
    /// after the batch is durable.
    pub fn append(&self, input: NewEvent) -> Result<Event> {
        let _guard = self.write_lock.lock();

        let number = self.load_index()? + 1;
        let position = self.load_stream_position(&input.stream_id)? + 1;
        let event = Event {
            number,
            position,
            stream_id: input.stream_id,
            topic: input.topic,
            event_type: input.event_type,
            payload: input.payload,
        };

        let row = serde_json::to_vec(&event)?;
        let mut batch = self.keyspace.batch();
        batch.insert(&self.events, encoding::number_key(number), row);
        batch.insert(&self.meta, INDEX_KEY, encoding::number_key(number));
        batch.insert(
            &self.meta,
            encoding::stream_position_key(&event.stream_id),
            encoding::number_key(position),
        );
        batch.commit().map_err(StoreError::backend)?;
        self.keyspace
            .persist(self.persist_mode)
            .map_err(StoreError::backend)?;

        self.notify(&event);
        Ok(event)
    }

    fn load_index(&self) -> Result<u64> {
        match self.meta.get(INDEX_KEY).map_err(StoreError::backend)? {
            Some(value) => encoding::decode_number(&value),
            None => Ok(0),
        }
    }

    fn load_stream_position(&self, stream_id: &str) -> Result<u64> {
        let key = encoding::stream_position_key(stream_id);
        match self.meta.get(&key).map_err(StoreError::backend)? {
            Some(value) => encoding::decode_number(&value),
            None => Ok(0),
        }
    }

    fn notify(&self, event: &Event) {
        self.listeners
            .lock()
            .retain(|l| l.send(event.clone()).is_ok());
    }
}

impl EventStore for FjallEventStore {
    type Cursor = FjallCursor;

    fn index(&self) -> Result<u64> {
        self.load_index()
    }

    fn get_handle(&self, id: &str) -> Result<Option<Handle>> {
        match self.handles.get(id.as_bytes()).map_err(StoreError::backend)? {
            Some(row) => Ok(Some(serde_json::from_slice(&row)?)),
            None => Ok(None),
        }
    }

    fn upsert_handle(&self, id: &str, position: u64) -> Result<Handle> {
        let handle = match self.get_handle(id)? {
            Some(existing) => existing.at_position(position),
            None => Handle::new(id).at_position(position),
        };
        let row = serde_json::to_vec(&handle)?;
        self.handles
            .insert(id.as_bytes(), row)
            .map_err(StoreError::backend)?;
        self.keyspace
            .persist(self.persist_mode)
            .map_err(StoreError::backend)?;
        Ok(handle)
    }

    fn query_events(&self, query: &EventQuery) -> Result<FjallCursor> {
        Ok(FjallCursor {
            events: self.events.clone(),
            query: query.clone(),
            last: query.from,
            boundary: self.load_index()?,
        })
    }

    fn register_listener(&self, listener: EventListener) {
        self.listeners.lock().push(listener);
    }
}

impl Drop for FjallEventStore {
    fn drop(&mut self) {
        // Ensure data is persisted on drop
        let _ = self.keyspace.persist(fjall::PersistMode::SyncAll);
    }
}

/// Cursor over committed events, capped at the log index captured when the
/// cursor was opened
pub struct FjallCursor {
    events: Partition,
    query: EventQuery,
    /// Highest key examined so far
    last: u64,
    /// Log index at cursor creation; rows past it are never scanned
    boundary: u64,
}

impl EventCursor for FjallCursor {
    fn next_batch(&mut self, limit: usize) -> Result<Vec<Event>> {
        let mut batch = Vec::new();
        if self.last >= self.boundary || limit == 0 {
            return Ok(batch);
        }

        let start = encoding::number_key(self.last + 1);
        let end = encoding::number_key(self.boundary);
        for item in self.events.range(start..=end) {
            let (key, row) = item.map_err(StoreError::backend)?;
            self.last = encoding::decode_number(&key)?;
            let event: Event = serde_json::from_slice(&row)?;
            if self.query.matches(&event) {
                batch.push(event);
                if batch.len() == limit {
                    break;
                }
            }
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn open_temp() -> FjallEventStore {
        let dir = tempfile::tempdir().unwrap().keep();
        let config = FjallConfig::new(dir).with_persist_mode(fjall::PersistMode::SyncAll);
        FjallEventStore::open(config).unwrap()
    }

    fn input(stream: &str, topic: &str) -> NewEvent {
        NewEvent::new(stream, topic).with_event_type("test")
    }

    #[test]
    fn test_append_assigns_numbers_and_positions() {
        let store = open_temp();
        let a = store.append(input("x", "a")).unwrap();
        let b = store.append(input("y", "a")).unwrap();
        let c = store.append(input("x", "b")).unwrap();

        assert_eq!((a.number, b.number, c.number), (1, 2, 3));
        assert_eq!((a.position, b.position, c.position), (1, 1, 2));
        assert_eq!(store.index().unwrap(), 3);
    }

    #[test]
    fn test_cursor_scans_in_order_with_filter() {
        let store = open_temp();
        for topic in ["a", "b", "a", "c", "a"] {
            store.append(input("x", topic)).unwrap();
        }

        let query = EventQuery::events().after(1).with_topics(["a"]);
        let mut cursor = store.query_events(&query).unwrap();

        let first = cursor.next_batch(1).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].number, 3);

        let rest = cursor.next_batch(10).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].number, 5);

        assert!(cursor.next_batch(10).unwrap().is_empty());
    }

    #[test]
    fn test_cursor_does_not_see_later_appends() {
        let store = open_temp();
        store.append(input("x", "a")).unwrap();
        store.append(input("x", "a")).unwrap();

        let mut cursor = store.query_events(&EventQuery::events()).unwrap();
        store.append(input("x", "a")).unwrap();

        assert_eq!(cursor.next_batch(10).unwrap().len(), 2);
        assert!(cursor.next_batch(10).unwrap().is_empty());
    }

    #[test]
    fn test_listeners_receive_appends() {
        let store = open_temp();
        let (tx, mut rx) = mpsc::unbounded_channel();
        store.register_listener(tx);

        let appended = store.append(input("x", "a")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), appended);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap().keep();
        let config = FjallConfig::new(&dir).with_persist_mode(fjall::PersistMode::SyncAll);

        {
            let store = FjallEventStore::open(config.clone()).unwrap();
            store.append(input("x", "a")).unwrap();
            store.append(input("x", "a")).unwrap();
            store.upsert_handle("h", 2).unwrap();
        }

        let store = FjallEventStore::open(config).unwrap();
        assert_eq!(store.index().unwrap(), 2);
        assert_eq!(store.get_handle("h").unwrap().unwrap().position, 2);

        // Numbering continues where the previous process stopped
        let next = store.append(input("x", "a")).unwrap();
        assert_eq!(next.number, 3);
        assert_eq!(next.position, 3);
    }

    #[test]
    fn test_handle_upsert_preserves_created_at() {
        let store = open_temp();
        let created = store.upsert_handle("h", 1).unwrap();
        let advanced = store.upsert_handle("h", 5).unwrap();
        assert_eq!(advanced.created_at, created.created_at);
        assert_eq!(advanced.position, 5);
    }
}
