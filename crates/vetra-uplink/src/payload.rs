//! Cloud payload model for triggered collections.
//!
//! One [`TriggeredCollectionPayload`] per fire: campaign id, event id,
//! wall-clock fire time, per-sample signal values, raw frames hex-encoded,
//! and whatever the custom functions appended at `condition_end`.
//! Undefined-valued samples never leave the agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vetra_core::{SignalType, SignalValue};
use vetra_inspection::TriggeredCollection;

/// Signal value as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    /// Boolean value
    Bool(bool),
    /// Numeric value
    Number(f64),
    /// String value
    Text(String),
}

impl PayloadValue {
    fn from_signal_value(value: &SignalValue) -> Option<Self> {
        match value {
            SignalValue::Bool(b) => Some(Self::Bool(*b)),
            SignalValue::Double(v) => Some(Self::Number(*v)),
            SignalValue::Text(s) => Some(Self::Text(s.to_string())),
            SignalValue::Undefined => None,
        }
    }
}

/// One collected signal sample on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSignal {
    /// Cloud-assigned signal id
    pub signal_id: u32,
    /// Sample time, monotonic milliseconds
    pub timestamp_ms: u64,
    /// Sample value
    pub value: PayloadValue,
    /// Declared storage type
    pub signal_type: SignalType,
}

/// One raw CAN frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadRawFrame {
    /// Bus the frame arrived on
    pub channel_id: u8,
    /// Canonical frame id
    pub frame_id: u32,
    /// Receive time, monotonic milliseconds
    pub receive_time_ms: u64,
    /// Hex-encoded payload bytes
    pub data: String,
    /// Number of payload bytes
    pub size: u8,
}

/// The record published per campaign fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredCollectionPayload {
    /// Campaign that fired
    pub campaign_id: String,
    /// Unique id of this fire
    pub event_id: Uuid,
    /// Wall-clock fire time
    pub fire_time: DateTime<Utc>,
    /// Monotonic trigger time
    pub trigger_timestamp_ms: u64,
    /// Collected signal samples
    pub signals: Vec<PayloadSignal>,
    /// Raw CAN frames within the campaign's raw window
    pub raw_can_frames: Vec<PayloadRawFrame>,
}

impl TriggeredCollectionPayload {
    /// Builds the wire payload from an engine collection.
    #[must_use]
    pub fn from_collection(collection: &TriggeredCollection) -> Self {
        let signals = collection
            .signals
            .iter()
            .filter_map(|signal| {
                PayloadValue::from_signal_value(&signal.value).map(|value| PayloadSignal {
                    signal_id: signal.signal_id,
                    timestamp_ms: signal.timestamp.as_millis(),
                    value,
                    signal_type: signal.signal_type,
                })
            })
            .collect();
        let raw_can_frames = collection
            .raw_frames
            .iter()
            .map(|frame| PayloadRawFrame {
                channel_id: frame.channel_id,
                frame_id: frame.frame_id,
                receive_time_ms: frame.receive_time.as_millis(),
                data: hex_encode(frame.payload()),
                size: frame.size,
            })
            .collect();
        Self {
            campaign_id: collection.campaign_id.clone(),
            event_id: collection.event_id,
            fire_time: collection.fire_time,
            trigger_timestamp_ms: collection.trigger_time.as_millis(),
            signals,
            raw_can_frames,
        }
    }

    /// Serializes the payload to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
