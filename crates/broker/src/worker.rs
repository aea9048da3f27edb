//! Catch-up worker
//!
//! A one-shot task that streams historical events from the store to its
//! broker, one event per `continue` directive. The worker parks awaiting a
//! directive before every push (including the first), so a worker started
//! while a delivery is in flight cannot put a second event in flight.
//! `stop` is advisory: the worker notices it at the next park and reports
//! `Stopped`, which the broker discards as stale.

use crate::broker::BrokerMsg;
use conduit_common::Event;
use conduit_store::{EventCursor, EventQuery, EventStore};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Directive sent by the broker to its worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Directive {
    /// Advance to the next event
    Continue,
    /// Wind down and report the last pushed number
    Stop,
}

/// Terminal report from a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerOutcome {
    /// The cursor is exhausted; `boundary` is the log index captured at
    /// worker start
    Finished { boundary: u64 },
    /// The broker asked the worker to stop after pushing `last`
    Stopped { last: u64 },
    /// A storage error ended the worker after pushing `last`
    Aborted { last: u64 },
}

/// Broker-side handle to a running worker
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    /// Generation id; reports from superseded workers are discarded
    pub id: u64,
    /// Worker is parked awaiting a directive
    pub waiting: bool,
    directives: mpsc::UnboundedSender<Directive>,
}

impl WorkerHandle {
    /// Release the parked worker to push its next event
    pub(crate) fn advance(&mut self) {
        self.waiting = false;
        let _ = self.directives.send(Directive::Continue);
    }

    /// Ask the worker to wind down (advisory)
    pub(crate) fn stop(&self) {
        let _ = self.directives.send(Directive::Stop);
    }
}

/// Spawn a worker streaming events matching `query` in ascending order
pub(crate) fn spawn<S: EventStore>(
    id: u64,
    store: Arc<S>,
    handle_id: String,
    query: EventQuery,
    batch_size: usize,
    broker: mpsc::UnboundedSender<BrokerMsg>,
) -> WorkerHandle {
    let (directives, directive_rx) = mpsc::unbounded_channel();
    tokio::spawn(run(id, store, handle_id, query, batch_size, broker, directive_rx));
    WorkerHandle {
        id,
        waiting: true,
        directives,
    }
}

async fn run<S: EventStore>(
    id: u64,
    store: Arc<S>,
    handle_id: String,
    query: EventQuery,
    batch_size: usize,
    broker: mpsc::UnboundedSender<BrokerMsg>,
    mut directives: mpsc::UnboundedReceiver<Directive>,
) {
    let mut last = query.from;

    let report = |outcome: WorkerOutcome| {
        let _ = broker.send(BrokerMsg::WorkerDone {
            worker: id,
            outcome,
        });
    };

    // Capture the boundary before opening the cursor: events committed in
    // between appear in both the cursor and the reconciliation query, and
    // duplicates are filtered; a gap would not be.
    let boundary = match store.index() {
        Ok(index) => index,
        Err(err) => {
            tracing::warn!("[{}] worker {} failed to read index: {}", handle_id, id, err);
            report(WorkerOutcome::Aborted { last });
            return;
        }
    };
    let mut cursor = match store.query_events(&query) {
        Ok(cursor) => cursor,
        Err(err) => {
            tracing::warn!("[{}] worker {} failed to open cursor: {}", handle_id, id, err);
            report(WorkerOutcome::Aborted { last });
            return;
        }
    };

    let mut pending: VecDeque<Event> = VecDeque::new();

    loop {
        match directives.recv().await {
            Some(Directive::Continue) => {}
            Some(Directive::Stop) | None => {
                tracing::debug!("[{}] worker {} stopped after {}", handle_id, id, last);
                report(WorkerOutcome::Stopped { last });
                return;
            }
        }

        if pending.is_empty() {
            match cursor.next_batch(batch_size) {
                Ok(events) if events.is_empty() => {
                    tracing::debug!("[{}] worker {} finished at boundary {}", handle_id, id, boundary);
                    report(WorkerOutcome::Finished { boundary });
                    return;
                }
                Ok(events) => pending.extend(events),
                Err(err) => {
                    tracing::warn!("[{}] worker {} read failed after {}: {}", handle_id, id, last, err);
                    report(WorkerOutcome::Aborted { last });
                    return;
                }
            }
        }

        if let Some(event) = pending.pop_front() {
            last = event.number;
            if broker.send(BrokerMsg::Push { worker: id, event }).is_err() {
                // Broker is gone; nothing left to report to
                return;
            }
        }
    }
}
