//! Retry executor with exponential backoff.
//!
//! A [`Retryable`] is a unit of work the executor drives to completion on a
//! dedicated worker thread: `attempt` until it stops asking for a retry,
//! sleeping the current backoff in between and doubling it (saturating) up
//! to the configured maximum. Stopping the executor wakes the sleep and
//! reports [`RetryStatus::Abort`] through `on_finished`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

/// Outcome of one attempt, and the final outcome reported to the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStatus {
    /// The work completed
    Success,
    /// The work failed transiently; attempt again after the backoff
    Retry,
    /// The work was given up on
    Abort,
}

/// A retryable unit of work.
pub trait Retryable: Send {
    /// Performs one attempt.
    fn attempt(&mut self) -> RetryStatus;

    /// Receives the final outcome exactly once when the executor exits.
    fn on_finished(&mut self, status: RetryStatus);
}

/// Backoff bounds in milliseconds; doubling saturates at `max_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBackoff {
    /// First wait between attempts
    pub start_ms: u64,
    /// Ceiling for the doubled wait
    pub max_ms: u64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            start_ms: 1_000,
            max_ms: 64_000,
        }
    }
}

#[derive(Debug, Default)]
struct WakeSignal {
    stop: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl WakeSignal {
    /// Sleeps up to `millis`, returning early when stop is requested.
    fn sleep(&self, millis: u64) {
        let mut guard = self.lock.lock();
        if self.stop.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.wake.wait_for(&mut guard, Duration::from_millis(millis));
    }

    fn request_stop(&self) {
        let _guard = self.lock.lock();
        self.stop.store(true, Ordering::SeqCst);
        self.wake.notify_all();
    }

    fn reset(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }
}

/// Drives a [`Retryable`] on a dedicated worker thread.
pub struct RetryExecutor {
    name: String,
    backoff: RetryBackoff,
    signal: Arc<WakeSignal>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl RetryExecutor {
    /// Creates an executor; no thread is spawned until [`start`].
    ///
    /// [`start`]: RetryExecutor::start
    #[must_use]
    pub fn new(name: impl Into<String>, backoff: RetryBackoff) -> Self {
        Self {
            name: name.into(),
            backoff,
            signal: Arc::new(WakeSignal::default()),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Returns `true` while the worker thread is driving attempts.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the worker and starts attempting.
    ///
    /// Rejected with [`CoreError::AlreadyRunning`] while a previous run is
    /// still active.
    pub fn start(&mut self, mut retryable: Box<dyn Retryable>) -> CoreResult<()> {
        if self.is_running() {
            return Err(CoreError::AlreadyRunning {
                name: self.name.clone(),
            });
        }
        // Reap a worker that finished on its own.
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.signal.reset();
        self.running.store(true, Ordering::SeqCst);

        let signal = Arc::clone(&self.signal);
        let running = Arc::clone(&self.running);
        let backoff = self.backoff;
        let name = self.name.clone();

        let handle = std::thread::Builder::new()
            .name(format!("vetra-retry-{name}"))
            .spawn(move || {
                let mut wait_ms = backoff.start_ms;
                loop {
                    if signal.stop.load(Ordering::SeqCst) {
                        debug!(worker = %name, "stop requested, finishing with abort");
                        retryable.on_finished(RetryStatus::Abort);
                        break;
                    }
                    match retryable.attempt() {
                        RetryStatus::Retry => {
                            debug!(worker = %name, wait_ms, "attempt asked for retry");
                            signal.sleep(wait_ms);
                            wait_ms = wait_ms.saturating_mul(2).min(backoff.max_ms);
                        }
                        status => {
                            debug!(worker = %name, ?status, "attempt finished");
                            retryable.on_finished(status);
                            break;
                        }
                    }
                }
                running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CoreError::WorkerStart {
                    name: self.name.clone(),
                    reason: e.to_string(),
                }
            })?;

        self.worker = Some(handle);
        Ok(())
    }

    /// Stops the worker, waking any backoff sleep. Idempotent.
    pub fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.signal.request_stop();
        if handle.join().is_err() {
            warn!(worker = %self.name, "retry worker panicked");
        }
        self.signal.reset();
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for RetryExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}
