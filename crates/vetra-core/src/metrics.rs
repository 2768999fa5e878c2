//! Data-plane counters.
//!
//! Counter groups are plain structs of atomics shared behind an `Arc` and
//! injected from the bootstrap. Stages increment with relaxed ordering;
//! exact cross-counter consistency is not needed, only eventual visibility.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters incremented by the CAN ingest path.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    /// Frames dropped because no dictionary snapshot was active
    pub frames_without_dictionary: AtomicU64,
    /// Frames dropped because no decoder method matched (even masked)
    pub frames_dropped_no_decoder: AtomicU64,
    /// Frames that arrived with a timestamp older than their predecessor
    pub non_monotonic_frames: AtomicU64,
    /// Signals skipped during decode (range or width violations)
    pub decode_errors: AtomicU64,
    /// Messages whose format was marked invalid
    pub format_invalid: AtomicU64,
}

/// Counters incremented by the inspection engine.
#[derive(Debug, Default)]
pub struct InspectionMetrics {
    /// Samples dropped for arriving older than the history tail
    pub out_of_order_samples: AtomicU64,
    /// Expression evaluations that hit a type mismatch
    pub type_mismatch_evaluations: AtomicU64,
    /// Expression evaluations that resolved to undefined
    pub undefined_evaluations: AtomicU64,
    /// Custom function invocations that reported a runtime error
    pub custom_function_errors: AtomicU64,
    /// Fires suppressed by the minimum inter-trigger interval
    pub suppressed_triggers: AtomicU64,
    /// Collection frames emitted to the uplink queue
    pub triggers_emitted: AtomicU64,
    /// Collection frames lost to a full uplink queue
    pub uplink_drops: AtomicU64,
    /// Campaign documents rejected at ingestion
    pub campaigns_rejected: AtomicU64,
}

/// Relaxed increment helper for counter fields.
pub fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Relaxed read helper for counter fields.
pub fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}
