//! Fjall-backed event store backend
//!
//! Durable implementation of the conduit store interface:
//! - `events` partition: big-endian event number -> JSON row
//! - `handles` partition: handle id -> JSON cursor row
//! - `meta` partition: log index and per-stream position counters
//!
//! Appends commit one atomic batch across all three partitions; catch-up
//! cursors never scan past the log index captured when they were opened,
//! which on an append-only immutable log is equivalent to a read
//! transaction.

mod config;
mod encoding;
mod store;

pub use config::FjallConfig;
pub use store::{FjallCursor, FjallEventStore};
