//! Event query composition
//!
//! A query is built by stacking reducers on an initial `events()` scope:
//! a strict lower bound on the event number, an optional stream scope, and an
//! optional topic scope. Ascending `number` order is inherent; an empty
//! stream or topic list means the clause is omitted entirely.

use conduit_common::Event;
use serde::{Deserialize, Serialize};

/// A composed query over the event log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQuery {
    /// Strict lower bound: only events with `number > from` match
    pub from: u64,
    /// Stream scope; empty means unconstrained
    pub streams: Vec<String>,
    /// Topic scope; empty means unconstrained
    pub topics: Vec<String>,
}

impl EventQuery {
    /// The unconstrained query over all events
    pub fn events() -> Self {
        Self::default()
    }

    /// Restrict to events numbered strictly after `number`
    pub fn after(mut self, number: u64) -> Self {
        self.from = number;
        self
    }

    /// Restrict to events belonging to any of the given streams
    ///
    /// An empty list leaves the query unconstrained by stream.
    pub fn in_streams<I, S>(mut self, streams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.streams = streams.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to events carrying any of the given topics
    ///
    /// An empty list leaves the query unconstrained by topic.
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `event` satisfies every clause of this query
    pub fn matches(&self, event: &Event) -> bool {
        if event.number <= self.from {
            return false;
        }
        if !self.streams.is_empty() && !self.streams.iter().any(|s| *s == event.stream_id) {
            return false;
        }
        if !self.topics.is_empty() && !self.topics.iter().any(|t| *t == event.topic) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(number: u64, stream: &str, topic: &str) -> Event {
        Event::new(number, number, stream, topic)
    }

    #[test]
    fn test_unconstrained_matches_everything() {
        let query = EventQuery::events();
        assert!(query.matches(&event(1, "a", "x")));
        assert!(query.matches(&event(999, "b", "y")));
    }

    #[test]
    fn test_from_is_exclusive() {
        let query = EventQuery::events().after(5);
        assert!(!query.matches(&event(5, "a", "x")));
        assert!(query.matches(&event(6, "a", "x")));
    }

    #[test]
    fn test_stream_scope() {
        let query = EventQuery::events().in_streams(["a", "b"]);
        assert!(query.matches(&event(1, "a", "x")));
        assert!(query.matches(&event(2, "b", "x")));
        assert!(!query.matches(&event(3, "c", "x")));
    }

    #[test]
    fn test_topic_scope() {
        let query = EventQuery::events().with_topics(["x"]);
        assert!(query.matches(&event(1, "a", "x")));
        assert!(!query.matches(&event(2, "a", "y")));
    }

    #[test]
    fn test_clauses_compose() {
        let query = EventQuery::events()
            .after(2)
            .in_streams(["a"])
            .with_topics(["x", "y"]);
        assert!(!query.matches(&event(2, "a", "x")));
        assert!(query.matches(&event(3, "a", "x")));
        assert!(query.matches(&event(4, "a", "y")));
        assert!(!query.matches(&event(5, "b", "x")));
        assert!(!query.matches(&event(6, "a", "z")));
    }
}
