//! Bit-exact signal extraction from CAN frame payloads.
//!
//! The extractor walks the payload bytewise starting at the byte holding the
//! first bit position: downward toward byte zero for Motorola (big-endian)
//! signals, upward for Intel (little-endian) signals, then masks to the
//! declared width. Signed signals are sign-extended before the
//! `raw * factor + offset` scaling, which happens in `f64`.

use std::collections::HashSet;

use vetra_core::{SignalId, SignalType, INVALID_SIGNAL_ID};

use crate::format::{CanMessageFormat, CanSignalFormat};

/// One signal extracted from a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct CanDecodedSignal {
    /// Cloud-assigned signal id
    pub signal_id: SignalId,
    /// Physical value after factor and offset
    pub physical_value: f64,
    /// Declared storage type
    pub signal_type: SignalType,
}

/// Result of decoding one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeOutcome {
    /// Successfully extracted signals, in format order
    pub signals: Vec<CanDecodedSignal>,
    /// Signals skipped for range or width violations
    pub skipped_signals: usize,
}

impl DecodeOutcome {
    /// Returns `true` when no signal had to be skipped.
    #[must_use]
    pub fn fully_decoded(&self) -> bool {
        self.skipped_signals == 0
    }
}

/// Extracts the raw bits of one signal from a frame payload.
///
/// The caller must have range-checked the format against the payload; see
/// [`decode_message`] for the guards. Width is at most 64 bits.
#[must_use]
pub fn extract_raw(data: &[u8], signal: &CanSignalFormat) -> u64 {
    let start_bit = signal.first_bit_position as usize;
    let width = signal.size_in_bits as usize;
    let start_byte = start_bit / 8;
    let start_bit_in_byte = start_bit % 8;

    let mut result = (data[start_byte] as u64) >> start_bit_in_byte;
    let mut result_length = 8 - start_bit_in_byte;

    if signal.is_big_endian {
        let end_byte = (start_byte * 8 + 8 - start_bit_in_byte - width) / 8;
        let mut byte = start_byte;
        while byte > end_byte {
            byte -= 1;
            result |= (data[byte] as u64) << result_length;
            result_length += 8;
        }
    } else {
        let end_byte = (start_bit + width - 1) / 8;
        for byte in (start_byte + 1)..=end_byte {
            result |= (data[byte] as u64) << result_length;
            result_length += 8;
        }
    }

    if width < 64 {
        result &= u64::MAX >> (64 - width);
    }
    result
}

/// Sign-extends a `width`-bit raw value into an `i64`.
fn sign_extend(raw: u64, width: u16) -> i64 {
    if width == 0 || width >= 64 {
        return raw as i64;
    }
    let sign_bit = 1u64 << (width - 1);
    if raw & sign_bit != 0 {
        (raw | (u64::MAX << width)) as i64
    } else {
        raw as i64
    }
}

/// Decodes every collectable signal of `format` from `data`.
///
/// Signals whose id is not in `signals_to_collect` or equals the invalid
/// sentinel are ignored. A signal whose bits do not fit the payload is
/// skipped alone; the remaining signals still decode.
#[must_use]
pub fn decode_message(
    data: &[u8],
    format: &CanMessageFormat,
    signals_to_collect: &HashSet<SignalId>,
) -> DecodeOutcome {
    let frame_bits = data.len() * 8;
    let mut outcome = DecodeOutcome::default();

    for signal in &format.signals {
        if signal.signal_id == INVALID_SIGNAL_ID
            || !signals_to_collect.contains(&signal.signal_id)
        {
            continue;
        }
        if !signal_fits(signal, frame_bits) {
            outcome.skipped_signals += 1;
            continue;
        }

        let raw = extract_raw(data, signal);
        let magnitude = if signal.is_signed {
            sign_extend(raw, signal.size_in_bits) as f64
        } else {
            raw as f64
        };
        let physical_value = magnitude * signal.factor + signal.offset;
        outcome.signals.push(CanDecodedSignal {
            signal_id: signal.signal_id,
            physical_value,
            signal_type: signal.signal_type,
        });
    }
    outcome
}

/// Range guards applied per signal before extraction.
fn signal_fits(signal: &CanSignalFormat, frame_bits: usize) -> bool {
    let start_bit = signal.first_bit_position as usize;
    let width = signal.size_in_bits as usize;
    if start_bit >= frame_bits || width < 1 || width > 64 || width > frame_bits {
        return false;
    }
    if signal.is_big_endian {
        // Motorola bits run downward from the start byte toward byte zero.
        let available = start_bit - (start_bit % 8) + 8;
        width <= available
    } else {
        start_bit + width <= frame_bits
    }
}
