//! Bounded queues between pipeline stages.
//!
//! A [`BoundedSignalQueue`] carries one record type from one or more
//! producers to a single consumer. Pushes never block: on overflow either
//! the oldest or the incoming record is dropped per [`OverflowPolicy`] and
//! an overflow counter is incremented. The consumer side offers blocking
//! pops with timeout so workers can observe their stop flag.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// What to drop when a push meets a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued record to make room for the new one
    DropOldest,
    /// Reject the incoming record
    DropNewest,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::DropOldest
    }
}

/// Bounded MPSC queue with try-push semantics.
#[derive(Debug)]
pub struct BoundedSignalQueue<T> {
    name: String,
    capacity: usize,
    policy: OverflowPolicy,
    inner: Mutex<VecDeque<T>>,
    available: Condvar,
    overflows: AtomicU64,
}

impl<T> BoundedSignalQueue<T> {
    /// Creates a queue holding at most `capacity` records.
    ///
    /// A zero capacity is promoted to one so the queue is always usable.
    #[must_use]
    pub fn new(capacity: usize, name: impl Into<String>, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            policy,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            overflows: AtomicU64::new(0),
        }
    }

    /// Pushes a record without blocking.
    ///
    /// Returns `false` when the queue was full and a record (old or new,
    /// per policy) was dropped.
    pub fn try_push(&self, record: T) -> bool {
        let mut queue = self.inner.lock();
        let accepted = if queue.len() < self.capacity {
            queue.push_back(record);
            true
        } else {
            self.overflows.fetch_add(1, Ordering::Relaxed);
            match self.policy {
                OverflowPolicy::DropOldest => {
                    queue.pop_front();
                    queue.push_back(record);
                }
                OverflowPolicy::DropNewest => {}
            }
            false
        };
        drop(queue);
        self.available.notify_one();
        accepted
    }

    /// Pops the oldest record without blocking.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }

    /// Pops the oldest record, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.lock();
        loop {
            if let Some(record) = queue.pop_front() {
                return Some(record);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if self
                .available
                .wait_for(&mut queue, deadline - now)
                .timed_out()
            {
                return queue.pop_front();
            }
        }
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` when no record is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Maximum number of records the queue holds.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue name used in log messages.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of records dropped to overflow so far.
    pub fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_pop_order() {
        let queue = BoundedSignalQueue::new(4, "test", OverflowPolicy::DropOldest);
        assert!(queue.try_push(1));
        assert!(queue.try_push(2));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_drop_oldest_policy() {
        let queue = BoundedSignalQueue::new(2, "test", OverflowPolicy::DropOldest);
        queue.try_push(1);
        queue.try_push(2);
        assert!(!queue.try_push(3));
        assert_eq!(queue.overflow_count(), 1);
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
    }

    #[test]
    fn test_drop_newest_policy() {
        let queue = BoundedSignalQueue::new(2, "test", OverflowPolicy::DropNewest);
        queue.try_push(1);
        queue.try_push(2);
        assert!(!queue.try_push(3));
        assert_eq!(queue.overflow_count(), 1);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_pop_timeout_expires() {
        let queue: BoundedSignalQueue<u32> =
            BoundedSignalQueue::new(2, "test", OverflowPolicy::DropOldest);
        let start = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_pop_timeout_wakes_on_push() {
        let queue = Arc::new(BoundedSignalQueue::new(
            2,
            "test",
            OverflowPolicy::DropOldest,
        ));
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.try_push(7u32);
        });
        let popped = queue.pop_timeout(Duration::from_millis(500));
        handle.join().unwrap();
        assert_eq!(popped, Some(7));
    }

    #[test]
    fn test_zero_capacity_promoted() {
        let queue = BoundedSignalQueue::new(0, "test", OverflowPolicy::DropOldest);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.try_push(1));
    }
}
