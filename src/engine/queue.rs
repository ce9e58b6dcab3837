// ABOUTME: Thread-safe ready work queue shared by the producer and consumer
// ABOUTME: FIFO of runnable module ids with async blocking pop and close semantics

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

use crate::network::ModuleId;

/// Multi-producer, multi-consumer queue of modules that are ready to run.
///
/// `pop` waits until an entry arrives or the queue is closed and drained.
/// Every pushed entry is handed out exactly once.
#[derive(Debug, Default)]
pub struct ReadyWorkQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<ModuleId>,
    closed: bool,
    pushed: usize,
}

impl ReadyWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the queue has been closed and the entry was dropped.
    pub fn push(&self, id: ModuleId) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.items.push_back(id);
            state.pushed += 1;
        }
        self.available.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<ModuleId> {
        self.state.lock().items.pop_front()
    }

    /// Waits for the next entry. `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<ModuleId> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(id) = state.items.pop_front() {
                    return Some(id);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stops accepting entries. Entries already queued can still be popped.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Entries accepted over the queue's lifetime.
    pub fn total_pushed(&self) -> usize {
        self.state.lock().pushed
    }
}
