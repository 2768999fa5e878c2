//! Campaigns: cloud-issued collection rules.
//!
//! A campaign pairs a condition expression with what to collect when it
//! fires. Campaigns are immutable once active; a cloud push replaces the
//! whole set atomically from the engine's point of view. The JSON document
//! shape follows the cloud collection-scheme layout; malformed documents
//! are rejected and the previous set kept.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vetra_core::SignalId;

use crate::ast::{Expression, InvocationId, WindowRequirement};
use crate::error::{InspectionError, InspectionResult};
use crate::names::SignalNameMap;
use crate::parser::parse_expression;

/// Cloud-assigned campaign identifier.
pub type CampaignId = String;

/// Supported condition language version.
pub const CONDITION_LANGUAGE_VERSION: u32 = 1;

/// When a satisfied condition fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerMode {
    /// Fire only on a false-or-undefined → true transition
    RisingEdge,
    /// Fire on every evaluation that returns true
    Always,
}

/// Payload compression the transport should apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressionMode {
    /// Snappy block compression
    Snappy,
    /// No compression
    None,
}

impl Default for CompressionMode {
    fn default() -> Self {
        Self::None
    }
}

/// One signal the campaign collects on trigger, with its window.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignSignal {
    /// Signal to pull from history
    pub signal_id: SignalId,
    /// Time span to pull, latest-only when both bounds are absent
    pub window_ms: Option<u64>,
    /// Sample count to pull
    pub max_samples: Option<usize>,
}

/// An active collection rule.
#[derive(Debug, Clone)]
pub struct Campaign {
    /// Cloud-assigned id
    pub campaign_id: CampaignId,
    /// Condition expression
    pub condition: Arc<Expression>,
    /// When a satisfied condition fires
    pub trigger_mode: TriggerMode,
    /// Signals pulled into the collection frame on fire
    pub signals_to_collect: Vec<CampaignSignal>,
    /// Include recent raw frames in the collection frame
    pub collect_raw_frames: bool,
    /// Look-back for raw frames, milliseconds
    pub raw_frame_window_ms: u64,
    /// Minimum gap between two fires, milliseconds
    pub min_trigger_interval_ms: u64,
    /// Campaign stops evaluating past this instant
    pub expiry: Option<DateTime<Utc>>,
    /// Compression the transport should apply to emitted payloads
    pub compression: CompressionMode,
    /// Custom-function call sites of the condition, for cleanup
    pub invocation_sites: Vec<(String, InvocationId)>,
}

impl Campaign {
    /// Builds a campaign from a cloud document.
    ///
    /// `next_invocation` is the engine-owned counter handing out globally
    /// unique invocation ids.
    pub fn from_document(
        document: &CampaignDocument,
        names: &SignalNameMap,
        next_invocation: &mut InvocationId,
    ) -> InspectionResult<Self> {
        let scheme = &document.collection_scheme.condition_based_collection_scheme;
        if scheme.condition_language_version != CONDITION_LANGUAGE_VERSION {
            return Err(InspectionError::UnsupportedLanguageVersion {
                version: scheme.condition_language_version,
            });
        }
        if document.campaign_id.is_empty() {
            return Err(InspectionError::invalid_campaign("empty campaign id"));
        }
        let condition = parse_expression(&scheme.expression, names, next_invocation)?;

        let mut signals_to_collect = Vec::with_capacity(document.signals_to_collect.len());
        for entry in &document.signals_to_collect {
            let signal_id = names
                .resolve(&entry.name)
                .ok_or_else(|| InspectionError::UnknownSignal {
                    name: entry.name.clone(),
                })?;
            signals_to_collect.push(CampaignSignal {
                signal_id,
                window_ms: entry.window_duration_ms,
                max_samples: entry.max_sample_count,
            });
        }

        let mut invocation_sites = Vec::new();
        condition.custom_function_sites(&mut invocation_sites);

        Ok(Self {
            campaign_id: document.campaign_id.clone(),
            condition: Arc::new(condition),
            trigger_mode: scheme.trigger_mode,
            signals_to_collect,
            collect_raw_frames: document.collect_raw_can_frames,
            raw_frame_window_ms: document.raw_can_frame_window_ms,
            min_trigger_interval_ms: scheme.minimum_trigger_interval_ms,
            expiry: document.expiry_time,
            compression: document.compression,
            invocation_sites,
        })
    }

    /// Signal ids of the collect set.
    #[must_use]
    pub fn collect_set(&self) -> HashSet<SignalId> {
        self.signals_to_collect
            .iter()
            .map(|s| s.signal_id)
            .collect()
    }

    /// Every signal the campaign touches: condition references plus the
    /// collect set.
    #[must_use]
    pub fn referenced_signals(&self) -> HashSet<SignalId> {
        let mut out = HashSet::new();
        self.condition.referenced_signals(&mut out);
        for signal in &self.signals_to_collect {
            out.insert(signal.signal_id);
        }
        out
    }

    /// Visits the history window requirements of the campaign: condition
    /// windows plus the collect windows.
    pub fn window_requirements(&self, visit: &mut impl FnMut(SignalId, WindowRequirement)) {
        self.condition.window_requirements(visit);
        for signal in &self.signals_to_collect {
            if let Some(window_ms) = signal.window_ms {
                visit(signal.signal_id, WindowRequirement::TimeMs(window_ms));
            }
            if let Some(samples) = signal.max_samples {
                visit(signal.signal_id, WindowRequirement::Samples(samples));
            }
            visit(signal.signal_id, WindowRequirement::Samples(1));
        }
    }

    /// Returns `true` when the campaign is past its expiry.
    #[must_use]
    pub fn is_expired(&self, wall_clock: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| wall_clock > expiry)
    }
}

/// Condition section of a campaign document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionBasedCollectionScheme {
    /// Condition language version, must be 1
    pub condition_language_version: u32,
    /// Condition expression text
    pub expression: String,
    /// When to fire
    pub trigger_mode: TriggerMode,
    /// Minimum gap between fires, milliseconds
    #[serde(default)]
    pub minimum_trigger_interval_ms: u64,
}

/// Collection-scheme wrapper matching the cloud document nesting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionScheme {
    /// Condition-based scheme; the only supported kind
    pub condition_based_collection_scheme: ConditionBasedCollectionScheme,
}

/// One collect-set entry of a campaign document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalToCollect {
    /// Fully-qualified signal name
    pub name: String,
    /// Sample-count window
    #[serde(default)]
    pub max_sample_count: Option<usize>,
    /// Time window, milliseconds
    #[serde(default)]
    pub window_duration_ms: Option<u64>,
}

/// Cloud campaign document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDocument {
    /// Cloud-assigned campaign id
    pub campaign_id: String,
    /// Collection scheme
    pub collection_scheme: CollectionScheme,
    /// Signals to collect on trigger
    #[serde(default)]
    pub signals_to_collect: Vec<SignalToCollect>,
    /// Payload compression
    #[serde(default)]
    pub compression: CompressionMode,
    /// Include recent raw CAN frames on trigger
    #[serde(default)]
    pub collect_raw_can_frames: bool,
    /// Raw-frame look-back, milliseconds
    #[serde(default = "default_raw_frame_window_ms")]
    pub raw_can_frame_window_ms: u64,
    /// Campaign expiry
    #[serde(default)]
    pub expiry_time: Option<DateTime<Utc>>,
}

fn default_raw_frame_window_ms() -> u64 {
    1_000
}

impl CampaignDocument {
    /// Parses a campaign document from JSON.
    pub fn from_json(json: &str) -> InspectionResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| InspectionError::invalid_campaign(e.to_string()))
    }
}
