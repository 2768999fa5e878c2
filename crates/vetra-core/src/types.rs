//! Core data types for the VETRA pipeline.
//!
//! These types flow between the CAN decoding stage, the buffering fabric and
//! the inspection engine. Records are kept small and cheap to clone: raw
//! frames carry their payload in a fixed inline array, and string signal
//! values are reference-counted handles.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Opaque 32-bit signal identifier assigned by the cloud.
pub type SignalId = u32;

/// Sentinel for an unknown or invalid signal id.
pub const INVALID_SIGNAL_ID: SignalId = u32::MAX;

/// Small integer naming one bus instance.
pub type ChannelId = u8;

/// Sentinel for an unknown CAN channel.
pub const INVALID_CAN_CHANNEL: ChannelId = u8::MAX;

/// Maximum payload size of a CAN frame (CAN FD).
pub const MAX_CAN_FRAME_BYTES: usize = 64;

/// Monotonic milliseconds since an agent-chosen epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The agent epoch.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Creates a timestamp from milliseconds since the agent epoch.
    #[must_use]
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the agent epoch.
    #[must_use]
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`, zero if `earlier` is newer.
    #[must_use]
    pub fn elapsed_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// This timestamp shifted back by `millis`, saturating at the epoch.
    #[must_use]
    pub fn saturating_sub(&self, millis: u64) -> Timestamp {
        Timestamp(self.0.saturating_sub(millis))
    }

    /// This timestamp shifted forward by `millis`.
    #[must_use]
    pub fn add_millis(&self, millis: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(millis))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Declared storage type of a signal in the decoder manifest.
///
/// Decoded integer signals keep their declared tag while the payload travels
/// as a double; the value union deliberately has no integer arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    /// Boolean flag
    Bool,
    /// Unsigned 8-bit integer
    Uint8,
    /// Signed 8-bit integer
    Int8,
    /// Unsigned 16-bit integer
    Uint16,
    /// Signed 16-bit integer
    Int16,
    /// Unsigned 32-bit integer
    Uint32,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 64-bit integer
    Uint64,
    /// Signed 64-bit integer
    Int64,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// UTF-8 string
    Text,
}

impl Default for SignalType {
    fn default() -> Self {
        Self::Double
    }
}

/// Tagged union over the value domains a signal can take.
///
/// Numeric coercion treats `Bool` as `{0.0, 1.0}`; strings never coerce to
/// numbers. `Undefined` marks a signal that has no sample yet or an
/// expression that could not be evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalValue {
    /// No value available
    Undefined,
    /// Boolean value
    Bool(bool),
    /// Numeric value
    Double(f64),
    /// String value, shared by handle
    Text(Arc<str>),
}

impl SignalValue {
    /// Creates a string value from anything string-like.
    #[must_use]
    pub fn text(value: impl AsRef<str>) -> Self {
        Self::Text(Arc::from(value.as_ref()))
    }

    /// Returns `true` for [`SignalValue::Undefined`].
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Numeric view: doubles as-is, bools as `{0.0, 1.0}`, strings and
    /// undefined as `None`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(_) | Self::Undefined => None,
        }
    }

    /// Boolean view: bools as-is, doubles as `v != 0`, strings and undefined
    /// as `None`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Double(v) => Some(*v != 0.0),
            Self::Text(_) | Self::Undefined => None,
        }
    }

    /// String view; numeric values do not stringify.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for SignalValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for SignalValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// One decoded signal sample.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedSignal {
    /// Cloud-assigned signal id
    pub signal_id: SignalId,
    /// Receive time of the frame the sample was decoded from
    pub timestamp: Timestamp,
    /// Decoded physical value
    pub value: SignalValue,
    /// Declared storage type from the decoder manifest
    pub signal_type: SignalType,
}

impl CollectedSignal {
    /// Creates a collected signal sample.
    #[must_use]
    pub fn new(
        signal_id: SignalId,
        timestamp: Timestamp,
        value: SignalValue,
        signal_type: SignalType,
    ) -> Self {
        Self {
            signal_id,
            timestamp,
            value,
            signal_type,
        }
    }
}

/// A raw CAN frame captured for collection.
///
/// The payload lives in a fixed inline array so the hot path never touches
/// the heap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectedCanRawFrame {
    /// Bus the frame arrived on
    pub channel_id: ChannelId,
    /// Canonical (masked) frame id
    pub frame_id: u32,
    /// Receive time
    pub receive_time: Timestamp,
    /// Inline payload storage
    pub data: [u8; MAX_CAN_FRAME_BYTES],
    /// Number of valid payload bytes
    pub size: u8,
}

impl CollectedCanRawFrame {
    /// Copies up to [`MAX_CAN_FRAME_BYTES`] of `payload` into a raw-frame
    /// record.
    #[must_use]
    pub fn new(
        channel_id: ChannelId,
        frame_id: u32,
        receive_time: Timestamp,
        payload: &[u8],
    ) -> Self {
        let size = payload.len().min(MAX_CAN_FRAME_BYTES);
        let mut data = [0u8; MAX_CAN_FRAME_BYTES];
        data[..size].copy_from_slice(&payload[..size]);
        Self {
            channel_id,
            frame_id,
            receive_time,
            data,
            size: size as u8,
        }
    }

    /// The valid payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }
}

/// The record the CAN consumer hands to the buffering fabric: an optional
/// raw frame plus the signals decoded from it.
///
/// An empty frame is a legal no-op for downstream consumers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedDataFrame {
    /// Raw capture, present when the collect policy asked for it
    pub raw_frame: Option<CollectedCanRawFrame>,
    /// Decoded signal samples in format order
    pub signals: Vec<CollectedSignal>,
}

impl CollectedDataFrame {
    /// Returns `true` when the frame carries neither a raw capture nor
    /// signals.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw_frame.is_none() && self.signals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::new(1_000);
        assert_eq!(t.elapsed_since(Timestamp::new(400)), 600);
        assert_eq!(Timestamp::new(400).elapsed_since(t), 0);
        assert_eq!(t.saturating_sub(2_000), Timestamp::ZERO);
        assert_eq!(t.add_millis(50).as_millis(), 1_050);
    }

    #[test]
    fn test_value_numeric_coercion() {
        assert_eq!(SignalValue::Double(2.5).as_f64(), Some(2.5));
        assert_eq!(SignalValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(SignalValue::Bool(false).as_f64(), Some(0.0));
        assert_eq!(SignalValue::text("fast").as_f64(), None);
        assert_eq!(SignalValue::Undefined.as_f64(), None);
    }

    #[test]
    fn test_value_boolean_coercion() {
        assert_eq!(SignalValue::Double(0.0).as_bool(), Some(false));
        assert_eq!(SignalValue::Double(-3.0).as_bool(), Some(true));
        assert_eq!(SignalValue::text("true").as_bool(), None);
    }

    #[test]
    fn test_raw_frame_truncates_payload() {
        let payload = [0xAAu8; 100];
        let frame = CollectedCanRawFrame::new(0, 0x123, Timestamp::ZERO, &payload);
        assert_eq!(frame.size as usize, MAX_CAN_FRAME_BYTES);
        assert_eq!(frame.payload().len(), MAX_CAN_FRAME_BYTES);
    }

    #[test]
    fn test_empty_data_frame() {
        let frame = CollectedDataFrame::default();
        assert!(frame.is_empty());
    }
}
