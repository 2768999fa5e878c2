//! CAN data consumer and the external data source feeding it.
//!
//! The consumer applies the dictionary snapshot observed at frame entry to
//! one incoming frame, producing a [`CollectedDataFrame`] per the matched
//! collect policy and handing it to the distributor. Decode problems warn
//! and count; they never stop the next frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use vetra_core::{
    metrics, ChannelId, Clock, CollectedCanRawFrame, CollectedDataFrame, CollectedSignal,
    IngestMetrics, SignalBufferDistributor, SignalType, SignalValue, Timestamp,
    MAX_CAN_FRAME_BYTES,
};

use crate::decoder::decode_message;
use crate::dictionary::{CanDecoderDictionary, DictionaryHandle};
use crate::format::{CanMessageDecoderMethod, CAN_EXTENDED_ID_MASK};

/// Applies the active dictionary to incoming frames.
pub struct CanDataConsumer {
    distributor: Arc<SignalBufferDistributor<CollectedDataFrame>>,
    metrics: Arc<IngestMetrics>,
}

impl CanDataConsumer {
    /// Creates a consumer pushing into `distributor`.
    #[must_use]
    pub fn new(
        distributor: Arc<SignalBufferDistributor<CollectedDataFrame>>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            distributor,
            metrics,
        }
    }

    /// Finds the decode method for `(channel, frame_id)`.
    ///
    /// Falls back to the extended-id masked form and rewrites the caller's
    /// frame id on a fallback hit, so downstream records carry the canonical
    /// id. Cloud dictionaries do not carry the extended-frame flag.
    fn find_decoder_method<'a>(
        channel: ChannelId,
        frame_id: &mut u32,
        dictionary: &'a CanDecoderDictionary,
    ) -> Option<&'a CanMessageDecoderMethod> {
        let channel_map = dictionary.decoder_methods.get(&channel)?;
        if let Some(method) = channel_map.get(frame_id) {
            return Some(method);
        }
        let masked = *frame_id & CAN_EXTENDED_ID_MASK;
        if let Some(method) = channel_map.get(&masked) {
            *frame_id = masked;
            return Some(method);
        }
        None
    }

    /// Processes one frame under `dictionary`, the snapshot loaded at entry.
    ///
    /// A `None` snapshot means the dictionary was invalidated; the frame is
    /// dropped with a counter and no side effects.
    pub fn process_frame(
        &self,
        channel: ChannelId,
        dictionary: Option<&Arc<CanDecoderDictionary>>,
        frame_id: u32,
        data: &[u8],
        timestamp: Timestamp,
    ) {
        let Some(dictionary) = dictionary else {
            metrics::bump(&self.metrics.frames_without_dictionary);
            return;
        };
        let data = &data[..data.len().min(MAX_CAN_FRAME_BYTES)];

        let mut frame_id = frame_id;
        let Some(method) = Self::find_decoder_method(channel, &mut frame_id, dictionary) else {
            metrics::bump(&self.metrics.frames_dropped_no_decoder);
            return;
        };

        let mut collected = CollectedDataFrame::default();
        if method.collect_policy.wants_raw() {
            collected.raw_frame = Some(CollectedCanRawFrame::new(
                channel, frame_id, timestamp, data,
            ));
        }
        if method.collect_policy.wants_decode() {
            if method.format.is_valid() {
                let outcome =
                    decode_message(data, &method.format, &dictionary.signal_ids_to_collect);
                if !outcome.fully_decoded() {
                    warn!(
                        frame_id,
                        channel,
                        skipped = outcome.skipped_signals,
                        "CAN frame decoding incomplete"
                    );
                    self.metrics
                        .decode_errors
                        .fetch_add(outcome.skipped_signals as u64, Ordering::Relaxed);
                }
                collected.signals = outcome
                    .signals
                    .into_iter()
                    .map(|decoded| {
                        let value = match decoded.signal_type {
                            SignalType::Bool => SignalValue::Bool(decoded.physical_value != 0.0),
                            _ => SignalValue::Double(decoded.physical_value),
                        };
                        CollectedSignal::new(decoded.signal_id, timestamp, value, decoded.signal_type)
                    })
                    .collect();
            } else {
                warn!(
                    format_message_id = method.format.message_id,
                    frame_id, channel, "CAN message format invalid, skipping decode"
                );
                metrics::bump(&self.metrics.format_invalid);
            }
        }

        self.distributor.push(collected);
    }
}

/// Bus-facing intake for one CAN channel.
///
/// The socket reader (or a test) calls [`ingest`] per frame; dictionary
/// updates arrive through [`on_dictionary_update`] and take effect at the
/// next frame boundary.
///
/// [`ingest`]: ExternalCanDataSource::ingest
/// [`on_dictionary_update`]: ExternalCanDataSource::on_dictionary_update
pub struct ExternalCanDataSource {
    channel_id: ChannelId,
    consumer: CanDataConsumer,
    dictionary: Arc<DictionaryHandle>,
    clock: Arc<dyn Clock>,
    last_frame_time: AtomicU64,
    metrics: Arc<IngestMetrics>,
}

impl ExternalCanDataSource {
    /// Creates a data source for one channel.
    #[must_use]
    pub fn new(
        channel_id: ChannelId,
        consumer: CanDataConsumer,
        dictionary: Arc<DictionaryHandle>,
        clock: Arc<dyn Clock>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            channel_id,
            consumer,
            dictionary,
            clock,
            last_frame_time: AtomicU64::new(0),
            metrics,
        }
    }

    /// Ingests one frame from the bus.
    ///
    /// A zero timestamp is replaced by the injected clock. The extended-id
    /// flag may be present in the high bit of `frame_id` per the SocketCAN
    /// convention. Non-monotonic arrival is counted, not dropped; the
    /// history ring downstream is the ordering authority.
    pub fn ingest(&self, timestamp: Timestamp, frame_id: u32, data: &[u8]) {
        let timestamp = if timestamp == Timestamp::ZERO {
            self.clock.now_ms()
        } else {
            timestamp
        };
        let last = self.last_frame_time.swap(timestamp.as_millis(), Ordering::Relaxed);
        if timestamp.as_millis() < last {
            metrics::bump(&self.metrics.non_monotonic_frames);
        }

        // One snapshot load per frame: mid-frame swaps never split a frame.
        let snapshot = self.dictionary.load();
        self.consumer
            .process_frame(self.channel_id, snapshot.as_ref(), frame_id, data, timestamp);
    }

    /// Atomically replaces the active dictionary; `None` invalidates it.
    pub fn on_dictionary_update(&self, dictionary: Option<Arc<CanDecoderDictionary>>) {
        self.dictionary.swap(dictionary);
    }

    /// Channel this source ingests for.
    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }
}
