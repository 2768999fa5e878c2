//! # VETRA Inspection
//!
//! The collection inspection engine of the VETRA telemetry agent: per-signal
//! history rings with windowed aggregates, the campaign condition language
//! (lexer, parser, evaluator), user-registered custom functions with
//! per-invocation state, edge-triggered activation and the bounded
//! collection emitter.
//!
//! ## Pipeline position
//!
//! ```text
//! distributor ──▶ input queue ──▶ InspectionWorker
//!                                     │
//!                        CollectionInspectionEngine
//!                        histories · campaigns · custom functions
//!                                     │ on fire
//!                                     ▼
//!                         uplink queue (TriggeredCollection)
//! ```
//!
//! Campaigns arrive as cloud JSON documents ([`CampaignDocument`]), are
//! compiled against a [`SignalNameMap`] into immutable [`Campaign`] values
//! and swapped into the engine atomically between worker iterations.

#![forbid(unsafe_code)]

pub mod ast;
pub mod campaign;
pub mod custom;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod history;
pub mod lexer;
pub mod names;
pub mod parser;

pub use ast::{Aggregate, BinaryOp, Expression, InvocationId, UnaryOp, WindowRequirement};
pub use campaign::{
    Campaign, CampaignDocument, CampaignId, CampaignSignal, CompressionMode, TriggerMode,
    CONDITION_LANGUAGE_VERSION,
};
pub use custom::{
    CustomFunction, CustomFunctionRegistry, CustomFunctionResult, MultiRisingEdgeTrigger,
};
pub use engine::{CollectionInspectionEngine, InspectionWorker, TriggeredCollection};
pub use error::{InspectionError, InspectionResult};
pub use evaluator::{evaluate, EvaluationContext};
pub use history::{HistorySample, SignalHistory};
pub use names::SignalNameMap;
pub use parser::parse_expression;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
