//! # Blocking Queue
//!
//! A FIFO used to hand callback dispatch records from the reader threads to
//! the callback pump. Consumers block in `wait_for_data` until an item is
//! available or `release` wakes them for shutdown; `reset` re-arms the queue
//! so a subscriber can reconnect after a disconnect.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct QueueState<T> {
    items: VecDeque<T>,
    released: bool,
}

/// FIFO with cancellable blocking waits.
pub struct BlockingQueue<T> {
    state: Mutex<QueueState<T>>,
    signal: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        BlockingQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                released: false,
            }),
            signal: Condvar::new(),
        }
    }

    /// Appends an item without blocking and wakes one waiter.
    pub fn enqueue(&self, item: T) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        self.signal.notify_one();
    }

    /// Removes the oldest item, if any.
    pub fn dequeue(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Blocks until an item is available or the queue is released.
    pub fn wait_for_data(&self) {
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.released {
            self.signal.wait(&mut state);
        }
    }

    /// Wakes all waiters; subsequent waits return immediately until `reset`.
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.released = true;
        self.signal.notify_all();
    }

    /// Discards all queued items.
    pub fn clear(&self) {
        self.state.lock().items.clear();
    }

    /// Re-arms the queue after a release so it can be used again.
    pub fn reset(&self) {
        self.state.lock().released = false;
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
