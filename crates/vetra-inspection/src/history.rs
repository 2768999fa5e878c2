//! Per-signal inspection history.
//!
//! Each signal referenced by an active campaign owns a time-ordered ring of
//! `(timestamp, value)` samples. The ring is sized to cover the largest
//! window any campaign asks of the signal: the sample-count bound directly,
//! and the time bound converted to worst-case samples via the smallest
//! inter-sample gap observed so far (the maximum ingestion rate, so a
//! burst can never push in-window samples out). Rings are owned solely by
//! the inspection worker; no locking happens here.

use std::collections::VecDeque;

use vetra_core::{SignalValue, Timestamp};

use crate::ast::Aggregate;

/// One history entry.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySample {
    /// Sample time
    pub timestamp: Timestamp,
    /// Sample value
    pub value: SignalValue,
}

/// Bounded time-ordered ring of samples for one signal.
#[derive(Debug)]
pub struct SignalHistory {
    samples: VecDeque<HistorySample>,
    count_bound: usize,
    window_ms: u64,
    hard_cap: usize,
    /// Smallest inter-sample gap seen; zero until two samples arrived
    min_interval_ms: u64,
    out_of_order: u64,
}

impl SignalHistory {
    /// Creates a history covering `count_bound` samples and `window_ms`
    /// milliseconds (zero disables the time bound), never exceeding
    /// `hard_cap` samples.
    #[must_use]
    pub fn new(count_bound: usize, window_ms: u64, hard_cap: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            count_bound: count_bound.max(1),
            window_ms,
            hard_cap: hard_cap.max(2),
            min_interval_ms: 0,
            out_of_order: 0,
        }
    }

    /// Appends a sample.
    ///
    /// Samples older than the newest stored timestamp are dropped with a
    /// counter; an equal timestamp is accepted. Returns `false` on drop.
    pub fn append(&mut self, timestamp: Timestamp, value: SignalValue) -> bool {
        if let Some(last) = self.samples.back() {
            if timestamp < last.timestamp {
                self.out_of_order += 1;
                return false;
            }
            let delta = timestamp.elapsed_since(last.timestamp).max(1);
            self.min_interval_ms = if self.min_interval_ms == 0 {
                delta
            } else {
                self.min_interval_ms.min(delta)
            };
        }
        self.samples.push_back(HistorySample { timestamp, value });
        self.evict(timestamp);
        true
    }

    /// Evicts entries beyond the time window and the capacity bound.
    fn evict(&mut self, now: Timestamp) {
        if self.window_ms > 0 {
            let horizon = now.saturating_sub(self.window_ms);
            while self
                .samples
                .front()
                .is_some_and(|s| s.timestamp < horizon)
            {
                self.samples.pop_front();
            }
        }
        let capacity = self.effective_capacity();
        while self.samples.len() > capacity {
            self.samples.pop_front();
        }
    }

    /// Worst-case sample capacity for the configured windows at the fastest
    /// ingestion rate observed.
    ///
    /// The running-minimum gap is updated by the same append that creates
    /// the pressure, so the bound already covers a burst when eviction
    /// runs; the window can never hold more samples than
    /// `window / min_gap + 1`, and only the hard cap may cut below that.
    fn effective_capacity(&self) -> usize {
        let mut capacity = self.count_bound;
        if self.window_ms > 0 {
            let interval = self.min_interval_ms.max(1);
            let needed = (self.window_ms / interval) as usize + 1;
            capacity = capacity.max(needed);
        }
        capacity.min(self.hard_cap)
    }

    /// Most recent sample.
    #[must_use]
    pub fn latest(&self) -> Option<&HistorySample> {
        self.samples.back()
    }

    /// Second-most-recent sample.
    #[must_use]
    pub fn previous(&self) -> Option<&HistorySample> {
        let len = self.samples.len();
        if len < 2 {
            None
        } else {
            self.samples.get(len - 2)
        }
    }

    /// Rolling aggregate over the last `n` samples.
    #[must_use]
    pub fn aggregate_by_count(&self, aggregate: Aggregate, n: usize) -> SignalValue {
        let start = self.samples.len().saturating_sub(n);
        fold(aggregate, self.samples.iter().skip(start))
    }

    /// Rolling aggregate over the samples of the last `window_ms`.
    #[must_use]
    pub fn aggregate_by_time(
        &self,
        aggregate: Aggregate,
        window_ms: u64,
        now: Timestamp,
    ) -> SignalValue {
        let horizon = now.saturating_sub(window_ms);
        fold(
            aggregate,
            self.samples.iter().filter(|s| s.timestamp >= horizon),
        )
    }

    /// Returns `true` when a sample arrived at or after `since`.
    #[must_use]
    pub fn has_received_since(&self, since: Timestamp) -> bool {
        self.samples
            .back()
            .is_some_and(|s| s.timestamp >= since)
    }

    /// Most recent samples matching an optional count and time bound, in
    /// timestamp order.
    #[must_use]
    pub fn recent_samples(
        &self,
        max_samples: Option<usize>,
        window_ms: Option<u64>,
        now: Timestamp,
    ) -> Vec<HistorySample> {
        let horizon = window_ms.map(|w| now.saturating_sub(w));
        let in_window: Vec<&HistorySample> = self
            .samples
            .iter()
            .filter(|s| horizon.map_or(true, |h| s.timestamp >= h))
            .collect();
        let start = max_samples.map_or(0, |n| in_window.len().saturating_sub(n));
        in_window[start..].iter().map(|s| (*s).clone()).collect()
    }

    /// Number of stored samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` when no sample is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples dropped for arriving out of order.
    #[must_use]
    pub fn out_of_order_count(&self) -> u64 {
        self.out_of_order
    }

    /// Age of the oldest stored sample relative to the newest.
    #[must_use]
    pub fn stored_age_ms(&self) -> u64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(oldest), Some(newest)) => newest.timestamp.elapsed_since(oldest.timestamp),
            _ => 0,
        }
    }

    /// Updates the window bounds, evicting immediately.
    pub fn resize(&mut self, count_bound: usize, window_ms: u64) {
        self.count_bound = count_bound.max(1);
        self.window_ms = window_ms;
        if let Some(newest) = self.samples.back().map(|s| s.timestamp) {
            self.evict(newest);
        }
    }
}

/// Folds numeric samples into the requested aggregate.
///
/// Bools coerce to `{0, 1}`; strings and undefined are skipped. `Count`
/// counts the numeric samples and is defined on an empty window; the other
/// aggregates are undefined there.
fn fold<'a>(aggregate: Aggregate, samples: impl Iterator<Item = &'a HistorySample>) -> SignalValue {
    let mut count = 0u64;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for sample in samples {
        let Some(value) = sample.value.as_f64() else {
            continue;
        };
        count += 1;
        sum += value;
        min = min.min(value);
        max = max.max(value);
    }
    if count == 0 {
        return match aggregate {
            Aggregate::Count => SignalValue::Double(0.0),
            _ => SignalValue::Undefined,
        };
    }
    match aggregate {
        Aggregate::Min => SignalValue::Double(min),
        Aggregate::Max => SignalValue::Double(max),
        Aggregate::Sum => SignalValue::Double(sum),
        Aggregate::Avg => SignalValue::Double(sum / count as f64),
        Aggregate::Count => SignalValue::Double(count as f64),
    }
}
