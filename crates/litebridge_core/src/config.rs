//! Bridge configuration.

use litebridge_codec::Trust;
use std::time::Duration;

/// Tuning knobs for decoding and blob access.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Eagerness budget used when a caller does not pass one.
    pub default_depth: u32,

    /// Largest single read from a blob stream. Zero reads one byte at a time.
    pub blob_chunk_size: usize,

    /// Deadline for implicit blob loads (`None` = unbounded).
    pub blob_load_timeout: Option<Duration>,

    /// Whether buffers from the engine are validated before use.
    pub trust: Trust,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_depth: 1,
            blob_chunk_size: 64 * 1024, // 64 KiB
            blob_load_timeout: Some(Duration::from_secs(30)),
            trust: Trust::Untrusted,
        }
    }
}

impl BridgeConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default decode depth.
    #[must_use]
    pub const fn default_depth(mut self, depth: u32) -> Self {
        self.default_depth = depth;
        self
    }

    /// Sets the blob read chunk size. Zero is treated as one byte.
    #[must_use]
    pub const fn blob_chunk_size(mut self, size: usize) -> Self {
        self.blob_chunk_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets the deadline for implicit blob loads.
    #[must_use]
    pub const fn blob_load_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.blob_load_timeout = timeout;
        self
    }

    /// Chunk size actually used for blob reads, never zero.
    pub(crate) fn chunk_size(&self) -> usize {
        self.blob_chunk_size.max(1)
    }

    /// Sets how buffers are trusted.
    #[must_use]
    pub const fn trust(mut self, trust: Trust) -> Self {
        self.trust = trust;
        self
    }
}
