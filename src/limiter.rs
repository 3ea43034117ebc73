use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::{Error, Result};

struct State {
    current: u64,
    closed: bool,
}

/// A thread-safe monotonic watermark.
///
/// Producers publish new values with [`update`](Limiter::update); consumers
/// block in [`wait_greater_than`](Limiter::wait_greater_than) until the
/// watermark strictly exceeds their threshold or the limiter is closed.
pub struct Limiter {
    state: Mutex<State>,
    cond: Condvar,
}

impl Limiter {
    pub fn new(initial: u64) -> Self {
        Self {
            state: Mutex::new(State {
                current: initial,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Publishes a new watermark value and wakes all waiters.
    ///
    /// Panics if `value` is lower than the current watermark; the watermark
    /// is append-only and moving it backwards is a programming error.
    pub fn update(&self, value: u64) {
        let mut state = self.lock();
        assert!(
            value >= state.current,
            "limiter watermark moved backwards: {} -> {}",
            state.current,
            value
        );
        state.current = value;
        self.cond.notify_all();
    }

    /// Blocks until the watermark exceeds `from`, then returns it.
    ///
    /// Returns [`Error::Closed`] once the limiter is closed, immediately for
    /// calls made after the close.
    pub fn wait_greater_than(&self, from: u64) -> Result<u64> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(Error::Closed);
            }
            if state.current > from {
                return Ok(state.current);
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn current(&self) -> u64 {
        self.lock().current
    }

    /// Closes the limiter and wakes all waiters. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.cond.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // The only panic while holding the lock is the monotonicity assert;
        // the state itself stays consistent, so poisoning is recovered.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
