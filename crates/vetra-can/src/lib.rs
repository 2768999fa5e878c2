//! # VETRA CAN
//!
//! CAN-side decoding for the VETRA telemetry agent: signal and message
//! formats, the swappable decoder dictionary, bit-exact signal extraction
//! from classic and FD frames, and the consumer that turns bus frames into
//! [`vetra_core::CollectedDataFrame`] records.
//!
//! ## Pipeline position
//!
//! ```text
//! bus frame ──▶ ExternalCanDataSource ──▶ CanDataConsumer ──▶ distributor
//!                     │                        │
//!              DictionaryHandle         CanDecoderDictionary
//!              (atomic snapshot)        (immutable, Arc-shared)
//! ```
//!
//! A frame is processed entirely under the dictionary snapshot loaded at
//! entry; swapping the dictionary mid-frame never affects a frame in
//! flight, and a cleared handle drops frames with a counter.

#![forbid(unsafe_code)]

pub mod consumer;
pub mod decoder;
pub mod dictionary;
pub mod error;
pub mod format;

pub use consumer::{CanDataConsumer, ExternalCanDataSource};
pub use decoder::{decode_message, extract_raw, CanDecodedSignal, DecodeOutcome};
pub use dictionary::{
    CanDecoderDictionary, DecoderManifestDocument, DictionaryHandle, ManifestMessage,
};
pub use error::{CanError, CanResult};
pub use format::{
    CanCollectPolicy, CanMessageDecoderMethod, CanMessageFormat, CanSignalFormat,
    CAN_EXTENDED_ID_FLAG, CAN_EXTENDED_ID_MASK,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
