//! # VETRA Uplink
//!
//! The uplink boundary of the VETRA telemetry agent. Triggered collections
//! drain from the uplink queue on a dedicated worker, serialize to the
//! cloud payload shape and go out through an opaque
//! [`CollectionPublisher`]. Connection warmup runs through the core
//! [`RetryExecutor`](vetra_core::RetryExecutor) with exponential backoff.
//!
//! The transport itself (MQTT, HTTP, …) is out of scope; implementors of
//! [`CollectionPublisher`] receive finished payload bytes plus
//! [`PayloadMeta`] carrying the campaign's compression intent.

#![forbid(unsafe_code)]

pub mod error;
pub mod payload;
pub mod publisher;
pub mod service;

pub use error::{UplinkError, UplinkResult};
pub use payload::{PayloadRawFrame, PayloadSignal, PayloadValue, TriggeredCollectionPayload};
pub use publisher::{CollectionPublisher, PayloadMeta};
pub use service::{UplinkService, UplinkStats};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
