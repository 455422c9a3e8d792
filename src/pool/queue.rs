//! Bounded idle queue for one language.
//!
//! A counting semaphore tracks how many sandboxes are queued: `take` waits for
//! a permit, `try_put` adds one, and `close` closes the semaphore so every
//! blocked taker wakes with an error.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Semaphore;

use super::lock;
use super::registry::Sandbox;

/// The queue was closed while (or before) waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueClosed;

/// Why a sandbox could not be put back; the handle is returned to the caller.
#[derive(Debug)]
pub(crate) enum PutError {
    Full(Sandbox),
    Closed(Sandbox),
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Sandbox>,
    closed: bool,
}

#[derive(Debug)]
pub(crate) struct IdleQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    available: Semaphore,
}

impl IdleQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::default(),
            available: Semaphore::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Waits for a queued sandbox. Cancel-safe: dropping the future before it
    /// resolves takes nothing.
    pub async fn take(&self) -> Result<Sandbox, QueueClosed> {
        let permit = self.available.acquire().await.map_err(|_| QueueClosed)?;
        permit.forget();
        // A close between the permit and the pop drains the items first.
        lock(&self.state).items.pop_front().ok_or(QueueClosed)
    }

    /// Queues `sandbox` without waiting.
    pub fn try_put(&self, sandbox: Sandbox) -> Result<(), PutError> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(PutError::Closed(sandbox));
            }
            if state.items.len() >= self.capacity {
                return Err(PutError::Full(sandbox));
            }
            state.items.push_back(sandbox);
        }
        self.available.add_permits(1);
        Ok(())
    }

    /// Closes the queue, waking all waiters, and returns whatever was idle.
    pub fn close(&self) -> Vec<Sandbox> {
        let drained = {
            let mut state = lock(&self.state);
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.available.close();
        drained
    }
}
