//! Per-subscription admission predicate
//!
//! Decides whether an event may be delivered to a subscriber right now.
//! Flow control comes first: a subscriber with a delivery outstanding
//! accepts nothing. The position gate (`number > ack`) keeps each
//! subscriber's visible stream strictly increasing even when catch-up and
//! reconciliation produce duplicate events.

use crate::subscription::Subscriber;
use conduit_common::Event;

/// Whether `event` is visible to `subscriber` in its current flow state
pub(crate) fn accepts(subscriber: &Subscriber, event: &Event) -> bool {
    if subscriber.in_flight() {
        return false;
    }
    if event.number <= subscriber.ack {
        return false;
    }
    if let Some(stream) = &subscriber.stream
        && *stream != event.stream_id
    {
        return false;
    }
    if !subscriber.topics.is_empty() && !subscriber.topics.iter().any(|t| *t == event.topic) {
        return false;
    }
    true
}
