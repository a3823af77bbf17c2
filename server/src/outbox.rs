//! Bounded per-connection queue of outbound packets
//!
//! The store fans events out by pushing into one outbox per subscriber, which
//! never blocks; a dedicated writer task drains the outbox onto the socket.
//! Memory stays bounded for slow readers:
//! - an `Updated` for a key whose newest queued event is also `Updated`
//!   replaces that event in place, so only the latest full record waits
//! - over capacity, the oldest `Updated` that a later queued event for the
//!   same key supersedes is dropped
//! - when nothing can be dropped the outbox is marked lagging and closed

use log::warn;
use shared::Packet;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::{watch, Notify};

pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Replaced a pending `Updated` for the same key
    Coalesced,
    /// Queued after evicting a superseded `Updated`
    QueuedWithDrop,
    /// Capacity exceeded with nothing droppable, the outbox is now closed
    Lagging,
    Closed,
}

#[derive(Debug, Default)]
struct OutboxState {
    queue: VecDeque<Packet>,
    closed: bool,
    lagging: bool,
    dropped: u64,
}

#[derive(Debug)]
pub struct Outbox {
    state: Mutex<OutboxState>,
    capacity: usize,
    ready: Notify,
    closed_tx: watch::Sender<bool>,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(OutboxState::default()),
            capacity: capacity.max(1),
            ready: Notify::new(),
            closed_tx,
        }
    }

    pub fn push(&self, packet: Packet) -> PushOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            Self::enqueue(&mut state, packet, self.capacity)
        };

        match outcome {
            PushOutcome::Lagging => self.close(),
            PushOutcome::Closed => {}
            _ => self.ready.notify_one(),
        }
        outcome
    }

    fn enqueue(state: &mut OutboxState, packet: Packet, capacity: usize) -> PushOutcome {
        if let Packet::Updated { key, record } = &packet {
            let newest_for_key = state
                .queue
                .iter_mut()
                .rev()
                .find(|queued| queued.event_key() == Some(key.as_str()));

            if let Some(Packet::Updated { record: pending, .. }) = newest_for_key {
                *pending = record.clone();
                return PushOutcome::Coalesced;
            }
        }

        state.queue.push_back(packet);
        if state.queue.len() <= capacity {
            return PushOutcome::Queued;
        }

        match Self::oldest_superseded(&state.queue) {
            Some(index) => {
                state.queue.remove(index);
                state.dropped += 1;
                PushOutcome::QueuedWithDrop
            }
            None => {
                state.lagging = true;
                PushOutcome::Lagging
            }
        }
    }

    /// Index of the oldest `Updated` followed by another event for its key
    fn oldest_superseded(queue: &VecDeque<Packet>) -> Option<usize> {
        queue.iter().enumerate().find_map(|(index, packet)| match packet {
            Packet::Updated { key, .. } => queue
                .iter()
                .skip(index + 1)
                .any(|later| later.event_key() == Some(key.as_str()))
                .then_some(index),
            _ => None,
        })
    }

    /// Waits for queued packets and takes all of them. Returns `None` once
    /// the outbox is closed and drained.
    pub async fn next_batch(&self) -> Option<Vec<Packet>> {
        loop {
            let notified = self.ready.notified();
            {
                let mut state = self.lock();
                if !state.queue.is_empty() && !state.lagging {
                    return Some(state.queue.drain(..).collect());
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stops accepting packets. Already queued packets can still be drained
    /// unless the outbox closed because it was lagging.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            if state.lagging {
                warn!(
                    "Outbox lagging with {} queued packets, closing",
                    state.queue.len()
                );
                state.queue.clear();
            }
        }
        self.closed_tx.send_replace(true);
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_lagging(&self) -> bool {
        self.lock().lagging
    }

    /// Receiver that flips to `true` when the outbox closes
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Number of superseded updates evicted so far
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OutboxState> {
        // A panic while holding this lock cannot leave the queue half-written
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOX_CAPACITY)
    }
}
