//! Fan-out of one producer to N registered queues.
//!
//! The distributor clones a record into every registered queue except the
//! last, which receives the original by move. Queue registration follows a
//! publish-once discipline: register everything during bootstrap, then share
//! the distributor behind an `Arc` and push from the producing stage.

use std::sync::Arc;

use crate::queue::BoundedSignalQueue;

/// Fan-out stage between a producer and its subscribers.
#[derive(Debug, Default)]
pub struct SignalBufferDistributor<T: Clone> {
    queues: Vec<Arc<BoundedSignalQueue<T>>>,
}

impl<T: Clone> SignalBufferDistributor<T> {
    /// Creates a distributor with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self { queues: Vec::new() }
    }

    /// Registers a subscriber queue. Not safe to interleave with pushes.
    pub fn register_queue(&mut self, queue: Arc<BoundedSignalQueue<T>>) {
        self.queues.push(queue);
    }

    /// Number of registered subscriber queues.
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Forwards `record` to every registered queue.
    ///
    /// Returns the number of queues that dropped a record to overflow.
    pub fn push(&self, record: T) -> usize {
        let mut dropped = 0;
        let Some((last, rest)) = self.queues.split_last() else {
            return 0;
        };
        for queue in rest {
            if !queue.try_push(record.clone()) {
                dropped += 1;
            }
        }
        if !last.try_push(record) {
            dropped += 1;
        }
        dropped
    }
}
