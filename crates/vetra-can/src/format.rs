//! CAN signal and message formats.
//!
//! A [`CanMessageFormat`] describes how one frame id decodes into signals;
//! the [`CanMessageDecoderMethod`] pairs it with the collect policy the
//! cloud asked for. Formats arrive inside a decoder manifest and are
//! immutable once the dictionary is built.

use serde::{Deserialize, Serialize};

use vetra_core::{SignalId, SignalType, INVALID_SIGNAL_ID};

/// SocketCAN extended-frame id mask (29 bits).
pub const CAN_EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// SocketCAN extended-frame flag, carried in the high bit of the frame id.
pub const CAN_EXTENDED_ID_FLAG: u32 = 0x8000_0000;

/// Sentinel for a message id no dictionary will ever carry.
pub const INVALID_CAN_MESSAGE_ID: u32 = 0;

/// Bit-level description of one signal inside a CAN frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CanSignalFormat {
    /// Cloud-assigned signal id
    pub signal_id: SignalId,
    /// Position of the first payload bit of the signal
    pub first_bit_position: u16,
    /// Width of the signal in bits (1..=64)
    pub size_in_bits: u16,
    /// Motorola byte order when `true`, Intel otherwise
    pub is_big_endian: bool,
    /// Two's-complement interpretation of the raw bits
    pub is_signed: bool,
    /// Scale applied to the raw value
    pub factor: f64,
    /// Offset added after scaling
    pub offset: f64,
    /// Declared storage type of the physical value
    pub signal_type: SignalType,
}

impl Default for CanSignalFormat {
    fn default() -> Self {
        Self {
            signal_id: INVALID_SIGNAL_ID,
            first_bit_position: 0,
            size_in_bits: 0,
            is_big_endian: false,
            is_signed: false,
            factor: 1.0,
            offset: 0.0,
            signal_type: SignalType::Double,
        }
    }
}

/// Decode description of one CAN message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CanMessageFormat {
    /// Frame id the format applies to
    pub message_id: u32,
    /// Declared frame length in bytes
    pub size_in_bytes: u8,
    /// Signal layouts within the frame
    pub signals: Vec<CanSignalFormat>,
}

impl CanMessageFormat {
    /// A default-constructed format is invalid until it names a message id.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.message_id != INVALID_CAN_MESSAGE_ID
    }
}

/// What to emit for a matched frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanCollectPolicy {
    /// Copy the raw payload only
    Raw,
    /// Decode signals only
    Decode,
    /// Copy the raw payload and decode signals
    RawAndDecode,
}

impl CanCollectPolicy {
    /// Returns `true` when a raw capture is requested.
    #[must_use]
    pub fn wants_raw(&self) -> bool {
        matches!(self, Self::Raw | Self::RawAndDecode)
    }

    /// Returns `true` when signal decoding is requested.
    #[must_use]
    pub fn wants_decode(&self) -> bool {
        matches!(self, Self::Decode | Self::RawAndDecode)
    }
}

/// Format plus collect policy for one `(channel, frame id)` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanMessageDecoderMethod {
    /// What the cloud asked to collect for this message
    pub collect_policy: CanCollectPolicy,
    /// Bit-level frame layout
    pub format: CanMessageFormat,
}
