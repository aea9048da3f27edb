//! Ordered, at-least-once event delivery for subscription groups
//!
//! A [`Broker`] owns one *handle*: a named, durable cursor over a
//! monotonically numbered event log. Consumers subscribe to the broker with
//! per-subscriber stream/topic filters and receive events one at a time,
//! acknowledging each delivery before the next one is sent. The broker
//! merges two sources without reordering or duplicating a subscriber's
//! visible stream:
//!
//! - **Catch-up**: a worker task drains historical events from the store,
//!   one event per `continue` directive
//! - **Live tail**: once history is drained, newly committed events arrive
//!   via store notifications and are buffered for dispatch
//!
//! Acknowledgements from *tracked* subscribers advance the handle's durable
//! position, so a restarted broker resumes where the fastest tracked
//! subscriber left off. Delivery is at-least-once: slower tracked consumers
//! may see replays after a crash, never gaps.
//!
//! The broker consumes storage through the `conduit-store` traits; any
//! backend (in-memory, fjall) plugs in unchanged.

mod broker;
mod config;
pub mod error;
mod filter;
mod subscription;
mod worker;

pub use broker::{Broker, BrokerHandle, BrokerMode, BrokerState};
pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
pub use subscription::{StartFrom, SubscribeOptions, Subscription};
