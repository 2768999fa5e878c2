//! Agent configuration.
//!
//! Configuration reaches the core as a structured document; nothing in the
//! pipeline reads environment variables. The bootstrap deserializes an
//! [`AgentConfig`] and hands each stage its section.

use serde::{Deserialize, Serialize};

use crate::queue::OverflowPolicy;
use crate::retry::RetryBackoff;

/// CAN ingest stage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanIngestConfig {
    /// Number of bus channels to ingest from
    pub channels: u8,
    /// Capacity of the decoded-frame queue feeding inspection
    pub signal_queue_capacity: usize,
    /// Overflow behaviour of the decoded-frame queue
    pub overflow_policy: OverflowPolicy,
}

impl Default for CanIngestConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            signal_queue_capacity: 1_000,
            overflow_policy: OverflowPolicy::DropOldest,
        }
    }
}

/// Inspection engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionConfig {
    /// Capacity of the engine input queue
    pub input_queue_capacity: usize,
    /// How long the worker blocks on its input queue per iteration
    pub poll_interval_ms: u64,
    /// Hard ceiling on samples retained per signal history ring
    pub max_history_samples_per_signal: usize,
    /// Capacity of the raw-frame ring shared by all campaigns
    pub raw_frame_ring_capacity: usize,
    /// Upper bound on signals in one emitted collection frame
    pub max_collected_signals: usize,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            input_queue_capacity: 1_000,
            poll_interval_ms: 50,
            max_history_samples_per_signal: 10_000,
            raw_frame_ring_capacity: 256,
            max_collected_signals: 4_096,
        }
    }
}

/// Uplink boundary configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    /// Capacity of the triggered-collection queue
    pub queue_capacity: usize,
    /// Backoff for the connect retryable
    pub retry_backoff: RetryBackoff,
    /// Immediate publish retries before a payload is dropped
    pub publish_retry_attempts: u32,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            retry_backoff: RetryBackoff::default(),
            publish_retry_attempts: 2,
        }
    }
}

/// Top-level agent configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// CAN ingest section
    pub can: CanIngestConfig,
    /// Inspection engine section
    pub inspection: InspectionConfig,
    /// Uplink section
    pub uplink: UplinkConfig,
}

impl AgentConfig {
    /// Create a new configuration builder.
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }
}

/// Builder for [`AgentConfig`].
#[derive(Debug, Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    /// Set the number of CAN channels
    pub fn channels(mut self, channels: u8) -> Self {
        self.config.can.channels = channels.max(1);
        self
    }

    /// Set the decoded-frame queue capacity
    pub fn signal_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.can.signal_queue_capacity = capacity.max(1);
        self
    }

    /// Set the engine input queue capacity
    pub fn input_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.inspection.input_queue_capacity = capacity.max(1);
        self
    }

    /// Set the per-signal history ceiling
    pub fn max_history_samples_per_signal(mut self, samples: usize) -> Self {
        self.config.inspection.max_history_samples_per_signal = samples.max(2);
        self
    }

    /// Set the uplink queue capacity
    pub fn uplink_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.uplink.queue_capacity = capacity.max(1);
        self
    }

    /// Set the uplink connect backoff
    pub fn uplink_retry_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.config.uplink.retry_backoff = backoff;
        self
    }

    /// Build the configuration
    pub fn build(self) -> AgentConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder_clamps() {
        let config = AgentConfig::builder()
            .channels(0)
            .signal_queue_capacity(0)
            .max_history_samples_per_signal(0)
            .build();
        assert_eq!(config.can.channels, 1);
        assert_eq!(config.can.signal_queue_capacity, 1);
        assert_eq!(config.inspection.max_history_samples_per_signal, 2);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = AgentConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: AgentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: AgentConfig =
            serde_json::from_str(r#"{"can": {"channels": 3}}"#).unwrap();
        assert_eq!(config.can.channels, 3);
        assert_eq!(
            config.inspection.input_queue_capacity,
            InspectionConfig::default().input_queue_capacity
        );
    }
}
