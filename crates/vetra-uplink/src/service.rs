//! Uplink drain service.
//!
//! A dedicated worker pops triggered collections from the uplink queue,
//! serializes them and hands them to the [`CollectionPublisher`]. Transport
//! warmup runs as a [`Retryable`] on the core retry executor; publish
//! failures get a bounded number of immediate retries before the payload is
//! dropped with a counter. The inspection thread is never blocked by any of
//! this.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use vetra_core::{
    BoundedSignalQueue, CoreError, CoreResult, RetryExecutor, RetryStatus, Retryable,
    UplinkConfig,
};
use vetra_inspection::TriggeredCollection;

use crate::payload::TriggeredCollectionPayload;
use crate::publisher::{CollectionPublisher, PayloadMeta};

const DRAIN_POLL: Duration = Duration::from_millis(100);
const PUBLISH_RETRY_PAUSE: Duration = Duration::from_millis(20);

/// Counters of the uplink boundary.
#[derive(Debug, Default)]
pub struct UplinkStats {
    /// Payloads published successfully
    pub payloads_published: AtomicU64,
    /// Payloads dropped after exhausting publish retries
    pub payloads_dropped: AtomicU64,
    /// Individual publish attempts that failed
    pub publish_failures: AtomicU64,
    /// Serialized bytes published
    pub bytes_published: AtomicU64,
}

/// Retries the transport connect with exponential backoff.
struct ConnectRetryable {
    publisher: Arc<Mutex<Box<dyn CollectionPublisher>>>,
    connected: Arc<AtomicBool>,
}

impl Retryable for ConnectRetryable {
    fn attempt(&mut self) -> RetryStatus {
        match self.publisher.lock().connect() {
            Ok(()) => {
                info!("uplink transport connected");
                self.connected.store(true, Ordering::Release);
                RetryStatus::Success
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "uplink connect failed, will retry");
                RetryStatus::Retry
            }
            Err(e) => {
                warn!(error = %e, "uplink connect failed permanently");
                RetryStatus::Abort
            }
        }
    }

    fn on_finished(&mut self, status: RetryStatus) {
        if status != RetryStatus::Success {
            warn!(?status, "uplink connect gave up");
        }
    }
}

/// Drains the uplink queue toward the transport.
pub struct UplinkService {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    connect_retry: RetryExecutor,
    stats: Arc<UplinkStats>,
    connected: Arc<AtomicBool>,
}

impl UplinkService {
    /// Starts the connect retryable and the drain worker.
    pub fn start(
        config: UplinkConfig,
        queue: Arc<BoundedSignalQueue<TriggeredCollection>>,
        publisher: Box<dyn CollectionPublisher>,
    ) -> CoreResult<Self> {
        let publisher = Arc::new(Mutex::new(publisher));
        let connected = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(UplinkStats::default());
        let stop = Arc::new(AtomicBool::new(false));

        let mut connect_retry = RetryExecutor::new("uplink-connect", config.retry_backoff);
        connect_retry.start(Box::new(ConnectRetryable {
            publisher: Arc::clone(&publisher),
            connected: Arc::clone(&connected),
        }))?;

        let stop_flag = Arc::clone(&stop);
        let worker_stats = Arc::clone(&stats);
        let retry_attempts = config.publish_retry_attempts;
        let handle = std::thread::Builder::new()
            .name("vetra-uplink".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    let Some(collection) = queue.pop_timeout(DRAIN_POLL) else {
                        continue;
                    };
                    publish_collection(
                        &collection,
                        &publisher,
                        &worker_stats,
                        retry_attempts,
                        &stop_flag,
                    );
                }
                debug!("uplink worker stopped");
            })
            .map_err(|e| CoreError::WorkerStart {
                name: "uplink".into(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            stop,
            worker: Some(handle),
            connect_retry,
            stats,
            connected,
        })
    }

    /// Counters of this service.
    #[must_use]
    pub fn stats(&self) -> Arc<UplinkStats> {
        Arc::clone(&self.stats)
    }

    /// Returns `true` once the transport connect succeeded.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Stops the connect retryable and the drain worker. Idempotent.
    pub fn stop(&mut self) {
        self.connect_retry.stop();
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("uplink worker panicked");
            }
        }
    }
}

impl Drop for UplinkService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn publish_collection(
    collection: &TriggeredCollection,
    publisher: &Mutex<Box<dyn CollectionPublisher>>,
    stats: &UplinkStats,
    retry_attempts: u32,
    stop: &AtomicBool,
) {
    let payload = TriggeredCollectionPayload::from_collection(collection);
    let bytes = match payload.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(campaign = %collection.campaign_id, error = %e, "payload serialization failed");
            stats.payloads_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };
    let meta = PayloadMeta {
        campaign_id: collection.campaign_id.clone(),
        compression: collection.compression,
    };

    for attempt in 0..=retry_attempts {
        match publisher.lock().publish(&bytes, &meta) {
            Ok(()) => {
                stats.payloads_published.fetch_add(1, Ordering::Relaxed);
                stats
                    .bytes_published
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                return;
            }
            Err(e) => {
                stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    campaign = %meta.campaign_id,
                    attempt,
                    error = %e,
                    "publish attempt failed"
                );
            }
        }
        if stop.load(Ordering::Acquire) {
            break;
        }
        std::thread::sleep(PUBLISH_RETRY_PAUSE);
    }
    stats.payloads_dropped.fetch_add(1, Ordering::Relaxed);
}
