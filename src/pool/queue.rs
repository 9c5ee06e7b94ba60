use crate::error::{Error, Result};

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Error returned by [`WorkQueue::try_push`], handing the item back.
#[derive(Debug, PartialEq, Eq)]
pub enum TryPushError<T> {
    /// The queue holds `capacity` items.
    Full(T),

    /// The queue was closed.
    Closed(T),
}

impl<T> TryPushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TryPushError::Full(item) | TryPushError::Closed(item) => item,
        }
    }
}

impl<T> fmt::Display for TryPushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryPushError::Full(_) => f.write_str("work queue is full"),
            TryPushError::Closed(_) => f.write_str("work queue is closed"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for TryPushError<T> {}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded FIFO queue shared by an acceptor and a set of workers.
///
/// Producers block while the queue is full and consumers block while it
/// is empty. Closing the queue wakes everyone: further pushes fail,
/// and consumers drain what is left before seeing `None`.
pub struct WorkQueue<T> {
    state: Mutex<State<T>>,

    /// Signalled when an item is pushed or the queue is closed.
    not_empty: Condvar,

    /// Signalled when an item is popped or the queue is closed.
    not_full: Condvar,

    capacity: usize,
}

impl<T> WorkQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be > 0");

        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    // A panicking holder cannot leave the deque half-modified, so a
    // poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an item, blocking while the queue is full.
    ///
    /// Fails with [`Error::QueueClosed`] once the queue is closed; the
    /// item is dropped in that case.
    pub fn push(&self, item: T) -> Result<()> {
        let mut state = self.lock();

        while state.items.len() >= self.capacity && !state.closed {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        if state.closed {
            return Err(Error::QueueClosed);
        }

        state.items.push_back(item);
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Appends an item without blocking.
    pub fn try_push(&self, item: T) -> std::result::Result<(), TryPushError<T>> {
        let mut state = self.lock();

        if state.closed {
            return Err(TryPushError::Closed(item));
        }

        if state.items.len() >= self.capacity {
            return Err(TryPushError::Full(item));
        }

        state.items.push_back(item);
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();

        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }

            if state.closed {
                return None;
            }

            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Closes the queue and wakes every blocked producer and consumer.
    pub fn close(&self) {
        self.lock().closed = true;

        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}
