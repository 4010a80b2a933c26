use std::time::Duration;

use crate::manifest::ErasureConfig;

/// Knobs for the encode pipeline. The secret-sharing arity is deliberately
/// not independent: shares are always `total_shards` with threshold
/// `data_shards`, so a reconstruction from any k shards also recovers k
/// distinct key-share labels.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub erasure: ErasureConfig,
    /// Target size of one data shard; block size is
    /// `target_chunk_size * data_shards`.
    pub target_chunk_size: usize,
    /// Replicas requested per chunk when sampling nodes.
    pub chunks_tolerance: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            erasure: ErasureConfig { data_shards: 3, parity_shards: 2 },
            target_chunk_size: 500 * 1024,
            chunks_tolerance: 3,
        }
    }
}

impl PipelineConfig {
    pub fn block_size(&self) -> usize {
        self.target_chunk_size * self.erasure.data_shards
    }
}

/// Gossip scheduling and identity for one bootstrap node.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// This node's reachable address (hidden-service identity + port).
    pub address: String,
    /// The configured bootstrap set; entries equal to `address` are never
    /// picked as peers.
    pub peers: Vec<String>,
    /// Rounds run every `base_period + uniform(0, base_period)`.
    pub base_period: Duration,
}

#[derive(Clone, Debug)]
pub struct RetentionConfig {
    pub base_period: Duration,
    /// How long past `release_time` chunks and manifests are kept.
    pub retention_window: chrono::Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { base_period: Duration::from_secs(3600), retention_window: chrono::Duration::days(7) }
    }
}
