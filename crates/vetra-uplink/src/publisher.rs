//! Publisher seam toward the opaque transport.

use vetra_inspection::CompressionMode;

use crate::error::UplinkResult;

/// Per-payload metadata the transport needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadMeta {
    /// Campaign the payload belongs to
    pub campaign_id: String,
    /// Compression the campaign asked the transport to apply
    pub compression: CompressionMode,
}

/// Opaque transport for finished collection payloads.
///
/// Implementations are driven from the uplink worker thread only. `connect`
/// is retried with exponential backoff through the core retry executor;
/// `publish` failures are retried a bounded number of times before the
/// payload is dropped with a counter.
pub trait CollectionPublisher: Send {
    /// Establishes the transport session. Called until it succeeds.
    fn connect(&mut self) -> UplinkResult<()> {
        Ok(())
    }

    /// Publishes one serialized payload.
    fn publish(&mut self, payload: &[u8], meta: &PayloadMeta) -> UplinkResult<()>;
}
