//! Bounded Event Queues
//!
//! Lock-free MPMC queues carrying [`EventData`] between the scheduler, the
//! workers and the I/O collaborators. Producers hold a [`ProducerToken`]
//! that records their enqueue and retry statistics.

use std::sync::atomic::{AtomicBool, Ordering};

use common::EventData;
use crossbeam_queue::ArrayQueue;
use crossbeam_utils::Backoff;
use thiserror::Error;
use tracing::trace;

/// Queue errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue {0} closed: running flag cleared while waiting for space")]
    Closed(&'static str),
}

/// Per-producer handle
#[derive(Debug, Default, Clone)]
pub struct ProducerToken {
    /// Producer identifier, used in traces
    id: usize,
    /// Events successfully enqueued
    enqueued: u64,
    /// Failed attempts on a full queue
    retries: u64,
}

impl ProducerToken {
    pub fn new(id: usize) -> Self {
        Self { id, enqueued: 0, retries: 0 }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued
    }

    pub fn retries(&self) -> u64 {
        self.retries
    }
}

/// Bounded MPMC event queue
pub struct EventQueue {
    /// Name used in errors and traces
    name: &'static str,
    /// Backing ring
    inner: ArrayQueue<EventData>,
}

impl EventQueue {
    /// Create a queue holding at most `capacity` events
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            inner: ArrayQueue::new(capacity.max(1)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Enqueue without waiting. Returns false if the queue is full.
    pub fn try_enqueue(&self, token: &mut ProducerToken, event: EventData) -> bool {
        match self.inner.push(event) {
            Ok(()) => {
                token.enqueued += 1;
                true
            }
            Err(_) => {
                token.retries += 1;
                false
            }
        }
    }

    /// Enqueue, spinning with exponential backoff while the queue is full.
    /// Gives up with [`QueueError::Closed`] once `running` is cleared.
    pub fn enqueue_fallback(
        &self,
        token: &mut ProducerToken,
        event: EventData,
        running: &AtomicBool,
    ) -> Result<(), QueueError> {
        let mut pending = event;
        let backoff = Backoff::new();
        loop {
            match self.inner.push(pending) {
                Ok(()) => {
                    token.enqueued += 1;
                    return Ok(());
                }
                Err(rejected) => {
                    pending = rejected;
                    token.retries += 1;
                    if token.retries % 10_000 == 1 {
                        trace!(
                            "Producer {} waiting on full queue {} ({} retries)",
                            token.id, self.name, token.retries
                        );
                    }
                    if !running.load(Ordering::Acquire) {
                        return Err(QueueError::Closed(self.name));
                    }
                    backoff.snooze();
                }
            }
        }
    }

    /// Dequeue one event, never blocks
    pub fn try_dequeue(&self) -> Option<EventData> {
        self.inner.pop()
    }

    /// Append up to `max` events to `out`, never blocks. Returns the number
    /// of events taken.
    pub fn try_dequeue_bulk(&self, out: &mut Vec<EventData>, max: usize) -> usize {
        let mut taken = 0;
        while taken < max {
            match self.inner.pop() {
                Some(event) => {
                    out.push(event);
                    taken += 1;
                }
                None => break,
            }
        }
        taken
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
