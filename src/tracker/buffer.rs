use std::collections::VecDeque;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::tracker::event::Event;

/// An event waiting for delivery, together with the number of failed
/// delivery attempts it went through.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    event: Event,
    retries: u32,
}

impl QueuedEvent {
    #[must_use]
    pub fn new(event: Event) -> Self {
        QueuedEvent { event, retries: 0 }
    }

    #[must_use]
    pub fn event(&self) -> &Event {
        &self.event
    }

    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// Contiguous run of the oldest buffered events, taken in one go.
///
/// Serializes as the JSON array of its events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    entries: Vec<QueuedEvent>,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.entries.iter().map(QueuedEvent::event)
    }

    #[must_use]
    pub fn entries(&self) -> &[QueuedEvent] {
        &self.entries
    }

    #[must_use]
    pub fn sequences(&self) -> Vec<u64> {
        self.events().map(|event| event.sequence).collect()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Serialize for Batch {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.events())
    }
}

/// What happened to a batch handed back after a failed delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequeueOutcome {
    pub requeued: usize,
    /// Events that used up their attempts.
    pub expired: usize,
    /// Events pushed out because the buffer was full.
    pub evicted: usize,
}

/// Bounded FIFO of events awaiting delivery. When full, the oldest event is
/// evicted to make room.
#[derive(Debug)]
pub struct Buffer {
    queue: VecDeque<QueuedEvent>,
    capacity: usize,
}

impl Buffer {
    /// A zero `capacity` is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Buffer {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    /// Appends `event`, returning the evicted oldest event if the buffer was full.
    pub fn append(&mut self, event: Event) -> Option<Event> {
        let evicted = if self.is_full() {
            self.queue.pop_front().map(|queued| queued.event)
        } else {
            None
        };
        self.queue.push_back(QueuedEvent::new(event));
        evicted
    }

    /// Removes and returns up to `max_size` of the oldest events.
    pub fn take_batch(&mut self, max_size: usize) -> Batch {
        let count = max_size.min(self.queue.len());
        Batch {
            entries: self.queue.drain(..count).collect(),
        }
    }

    /// Splits the whole buffer into batches of at most `max_size` events.
    pub fn drain_batches(&mut self, max_size: usize) -> Vec<Batch> {
        let mut batches = Vec::new();
        loop {
            let batch = self.take_batch(max_size.max(1));
            if batch.is_empty() {
                break;
            }
            batches.push(batch);
        }
        batches
    }

    /// Puts a batch that failed delivery back in front of the queue.
    ///
    /// Every event's retry counter is incremented first. Events that have
    /// been retried more than `max_retries` times are dropped. If the buffer overflows, the oldest
    /// events are evicted.
    pub fn requeue(&mut self, batch: Batch, max_retries: u32) -> RequeueOutcome {
        let mut outcome = RequeueOutcome::default();

        for mut queued in batch.entries.into_iter().rev() {
            queued.retries += 1;
            if queued.retries > max_retries {
                debug!(
                    "BUFFER | event {} out of attempts after {} tries",
                    queued.event.sequence, queued.retries
                );
                outcome.expired += 1;
                continue;
            }
            self.queue.push_front(queued);
            outcome.requeued += 1;
        }

        while self.queue.len() > self.capacity {
            self.queue.pop_front();
            outcome.evicted += 1;
        }
        outcome.requeued -= outcome.evicted.min(outcome.requeued);

        outcome
    }

    /// Changes the capacity, evicting the oldest events that no longer fit.
    /// Returns how many were evicted. A zero `capacity` is treated as one.
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        let capacity = capacity.max(1);
        self.capacity = capacity;
        let overflow = self.queue.len().saturating_sub(capacity);
        self.queue.drain(..overflow);
        overflow
    }

    /// Drops every buffered event, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.queue.len();
        self.queue.clear();
        count
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.queue.iter().map(|queued| queued.event.clone()).collect()
    }
}
