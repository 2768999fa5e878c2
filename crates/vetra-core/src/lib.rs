//! # VETRA Core
//!
//! Core types, traits, and plumbing for the VETRA vehicle telemetry agent.
//!
//! This crate provides the foundational building blocks used throughout the
//! VETRA ecosystem, including:
//!
//! - **Core Data Types**: [`SignalValue`], [`CollectedSignal`],
//!   [`CollectedCanRawFrame`], and [`CollectedDataFrame`] for representing
//!   decoded vehicle signals and raw bus captures.
//!
//! - **Buffering Fabric**: [`BoundedSignalQueue`] and
//!   [`SignalBufferDistributor`] carrying typed records between the pipeline
//!   stages under backpressure.
//!
//! - **Retry Executor**: [`RetryExecutor`] driving a [`Retryable`] unit of
//!   work with exponential backoff on a dedicated worker.
//!
//! - **Configuration**: [`AgentConfig`], the structured document the
//!   bootstrap passes down to every stage. The core never reads environment
//!   variables.
//!
//! - **Metrics**: atomic counter groups ([`IngestMetrics`],
//!   [`InspectionMetrics`]) injected from the bootstrap so that stages stay
//!   testable in isolation.
//!
//! ## Example
//!
//! ```rust
//! use vetra_core::{SignalValue, Timestamp, CollectedSignal, SignalType};
//!
//! let signal = CollectedSignal::new(
//!     42,
//!     Timestamp::new(1_000),
//!     SignalValue::Double(17.5),
//!     SignalType::Double,
//! );
//!
//! assert_eq!(signal.value.as_f64(), Some(17.5));
//! ```

#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod distributor;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AgentConfig, AgentConfigBuilder, CanIngestConfig, InspectionConfig, UplinkConfig,
};
pub use distributor::SignalBufferDistributor;
pub use error::{CoreError, CoreResult};
pub use metrics::{IngestMetrics, InspectionMetrics};
pub use queue::{BoundedSignalQueue, OverflowPolicy};
pub use retry::{RetryBackoff, RetryExecutor, RetryStatus, Retryable};
pub use types::{
    ChannelId, CollectedCanRawFrame, CollectedDataFrame, CollectedSignal, SignalId, SignalType,
    SignalValue, Timestamp, INVALID_CAN_CHANNEL, INVALID_SIGNAL_ID, MAX_CAN_FRAME_BYTES,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
///
/// ```rust
/// use vetra_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::AgentConfig;
    pub use crate::distributor::SignalBufferDistributor;
    pub use crate::error::{CoreError, CoreResult};
    pub use crate::queue::{BoundedSignalQueue, OverflowPolicy};
    pub use crate::retry::{RetryBackoff, RetryExecutor, RetryStatus, Retryable};
    pub use crate::types::{
        ChannelId, CollectedCanRawFrame, CollectedDataFrame, CollectedSignal, SignalId,
        SignalType, SignalValue, Timestamp, INVALID_SIGNAL_ID,
    };
}
