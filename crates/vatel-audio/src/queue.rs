//! Bounded FIFO hand-off from a real-time thread to an async consumer.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::sync::Notify;

enum Slot<T> {
    Item(T),
    /// Sentinel: nothing follows it.
    End,
}

struct Inner<T> {
    slots: VecDeque<Slot<T>>,
    /// Items currently queued, i.e. `slots` minus the sentinel.
    items: usize,
    finished: bool,
    ended: bool,
    dropped: u64,
}

/// What happened to a pushed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest queued item.
    QueuedDroppingOldest,
    /// The queue was already finished; the item was discarded.
    Rejected,
}

/// A bounded, drop-oldest queue with an explicit end-of-stream sentinel.
///
/// Producers never wait: on overflow the oldest queued item is evicted. The
/// single consumer awaits items and sees `None` once it reaches the sentinel,
/// so every item pushed before [`HandoffQueue::finish`] is delivered first.
pub struct HandoffQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T> HandoffQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: VecDeque::new(),
                items: 0,
                finished: false,
                ended: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, item: T) -> PushOutcome {
        let outcome = {
            let mut inner = self.lock();
            if inner.finished {
                return PushOutcome::Rejected;
            }
            let mut outcome = PushOutcome::Queued;
            if inner.items == self.capacity {
                // The sentinel is always last, so the front is a real item.
                inner.slots.pop_front();
                inner.items -= 1;
                inner.dropped += 1;
                outcome = PushOutcome::QueuedDroppingOldest;
            }
            inner.slots.push_back(Slot::Item(item));
            inner.items += 1;
            outcome
        };
        self.notify.notify_one();
        outcome
    }

    /// Enqueues the sentinel. Later pushes are rejected. Idempotent.
    pub fn finish(&self) {
        {
            let mut inner = self.lock();
            if inner.finished {
                return;
            }
            inner.finished = true;
            inner.slots.push_back(Slot::End);
        }
        self.notify.notify_one();
    }

    /// Waits for the next item; `None` once the sentinel has been reached.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut inner = self.lock();
                match inner.slots.pop_front() {
                    Some(Slot::Item(item)) => {
                        inner.items -= 1;
                        return Some(item);
                    }
                    Some(Slot::End) => {
                        inner.ended = true;
                        return None;
                    }
                    None if inner.ended => return None,
                    None => {}
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items evicted by overflow so far.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
