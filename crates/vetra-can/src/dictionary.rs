//! Decoder dictionary: immutable snapshot mapping `(channel, frame id)` to
//! a decode method, replaced atomically on cloud push.
//!
//! Readers load the current snapshot once per frame; a swap between two
//! frames never affects a frame in flight, and a cleared handle means
//! "dictionary invalidated" (frames drop with a counter).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use vetra_core::{ChannelId, SignalId, INVALID_SIGNAL_ID};

use crate::error::{CanError, CanResult};
use crate::format::{CanCollectPolicy, CanMessageDecoderMethod, CanMessageFormat, CanSignalFormat};

/// Widest raw extraction the decoder supports.
const MAX_SIGNAL_WIDTH_BITS: u16 = 64;

/// Immutable decode state for all channels.
#[derive(Debug, Default, Clone)]
pub struct CanDecoderDictionary {
    /// Per-channel map from frame id to decode method
    pub decoder_methods: HashMap<ChannelId, HashMap<u32, CanMessageDecoderMethod>>,
    /// Signal ids the cloud asked to collect
    pub signal_ids_to_collect: HashSet<SignalId>,
}

impl CanDecoderDictionary {
    /// Looks up the decode method for an exact `(channel, frame id)` pair.
    #[must_use]
    pub fn method_for(&self, channel: ChannelId, frame_id: u32) -> Option<&CanMessageDecoderMethod> {
        self.decoder_methods.get(&channel)?.get(&frame_id)
    }

    /// Builds a dictionary from a cloud decoder manifest.
    ///
    /// Rejects structurally unusable documents; the caller keeps the
    /// previous dictionary in that case.
    pub fn from_manifest(document: &DecoderManifestDocument) -> CanResult<Self> {
        let mut decoder_methods: HashMap<ChannelId, HashMap<u32, CanMessageDecoderMethod>> =
            HashMap::new();
        let mut signal_ids_to_collect = HashSet::new();

        for message in &document.messages {
            if message.message_id == 0 {
                return Err(CanError::invalid_manifest("message id 0 is reserved"));
            }
            let mut seen_signals = HashSet::new();
            for signal in &message.signals {
                validate_signal_format(message.message_id, signal)?;
                if !seen_signals.insert(signal.signal_id) {
                    return Err(CanError::InvalidSignalFormat {
                        signal_id: signal.signal_id,
                        message_id: message.message_id,
                        reason: "duplicate signal id within message".into(),
                    });
                }
                signal_ids_to_collect.insert(signal.signal_id);
            }

            let method = CanMessageDecoderMethod {
                collect_policy: message.collect_policy,
                format: CanMessageFormat {
                    message_id: message.message_id,
                    size_in_bytes: message.size_in_bytes,
                    signals: message.signals.clone(),
                },
            };
            let replaced = decoder_methods
                .entry(message.channel_id)
                .or_default()
                .insert(message.message_id, method);
            if replaced.is_some() {
                return Err(CanError::invalid_manifest(format!(
                    "duplicate message {:#x} on channel {}",
                    message.message_id, message.channel_id
                )));
            }
        }

        info!(
            manifest = %document.name,
            messages = document.messages.len(),
            signals = signal_ids_to_collect.len(),
            "decoder dictionary built"
        );
        Ok(Self {
            decoder_methods,
            signal_ids_to_collect,
        })
    }
}

fn validate_signal_format(message_id: u32, signal: &CanSignalFormat) -> CanResult<()> {
    if signal.signal_id == INVALID_SIGNAL_ID {
        return Err(CanError::InvalidSignalFormat {
            signal_id: signal.signal_id,
            message_id,
            reason: "signal id is the invalid sentinel".into(),
        });
    }
    if signal.size_in_bits == 0 {
        return Err(CanError::InvalidSignalFormat {
            signal_id: signal.signal_id,
            message_id,
            reason: "zero width".into(),
        });
    }
    if signal.size_in_bits > MAX_SIGNAL_WIDTH_BITS {
        return Err(CanError::InvalidSignalFormat {
            signal_id: signal.signal_id,
            message_id,
            reason: format!("width {} exceeds {} bits", signal.size_in_bits, MAX_SIGNAL_WIDTH_BITS),
        });
    }
    Ok(())
}

/// One message entry of a decoder manifest document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestMessage {
    /// Bus the message arrives on
    pub channel_id: ChannelId,
    /// Frame id (canonical, without the extended flag)
    pub message_id: u32,
    /// Declared frame length
    pub size_in_bytes: u8,
    /// Collect policy for the message
    pub collect_policy: CanCollectPolicy,
    /// Signal layouts
    #[serde(default)]
    pub signals: Vec<CanSignalFormat>,
}

/// Cloud decoder manifest document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecoderManifestDocument {
    /// Manifest name, used in logs only
    pub name: String,
    /// Message entries
    pub messages: Vec<ManifestMessage>,
}

/// Atomically swappable holder for the active dictionary snapshot.
#[derive(Debug, Default)]
pub struct DictionaryHandle {
    current: RwLock<Option<Arc<CanDecoderDictionary>>>,
}

impl DictionaryHandle {
    /// Creates a handle with no active dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the current snapshot; `None` means invalidated.
    pub fn load(&self) -> Option<Arc<CanDecoderDictionary>> {
        self.current.read().clone()
    }

    /// Replaces the snapshot. `None` invalidates the dictionary.
    pub fn swap(&self, dictionary: Option<Arc<CanDecoderDictionary>>) {
        *self.current.write() = dictionary;
    }
}
