use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const HASH_ALGORITHM: &str = "BLAKE3";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErasureConfig {
    pub data_shards: usize,
    pub parity_shards: usize,
}

impl ErasureConfig {
    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }
}

/// One erasure shard's catalog entry: where it lives, its position in the
/// shard array, and the key share paired with it. The `shard_index` and
/// `key_share_label` together store the label↔shard bijection decode
/// recombines by.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChunkDescriptor {
    pub chunk_id: String,
    /// 0-based position in the erasure shard array, data shards first.
    pub shard_index: usize,
    /// Secret-sharing x-coordinate, 1..=shards_per_block, unique per block.
    pub key_share_label: u8,
    pub key_share_bytes: Vec<u8>,
    /// Addresses holding a copy of this shard's data.
    pub nodes: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BlockDescriptor {
    /// Exact ciphertext length before the erasure split; reconstruction
    /// truncates back to this.
    pub encrypted_size: usize,
    pub chunks: Vec<ChunkDescriptor>,
}

/// One per uploaded file. Created once by the encode pipeline, immutable
/// afterwards (the retention sweeper may delete it whole).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FileManifest {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    /// RFC 3339; content is inaccessible before this.
    pub release_time: String,
    /// Hex hash of the original plaintext stream.
    pub content_hash: String,
    pub hash_algorithm: String,
    pub block_count: u32,
    pub shards_per_block: usize,
    pub erasure: ErasureConfig,
    pub blocks: BTreeMap<u32, BlockDescriptor>,
}

impl FileManifest {
    /// Structural invariants decode relies on: shard arity, contiguous block
    /// indexing, shard_index permutation, and distinct key-share labels.
    pub fn validate(&self) -> Result<()> {
        if self.shards_per_block != self.erasure.total_shards() {
            return Err(Error::InvalidManifest(format!(
                "shards_per_block {} != data {} + parity {}",
                self.shards_per_block, self.erasure.data_shards, self.erasure.parity_shards
            )));
        }
        if self.blocks.len() != self.block_count as usize {
            return Err(Error::InvalidManifest(format!(
                "expected {} blocks, manifest has {}",
                self.block_count,
                self.blocks.len()
            )));
        }
        for (expect, (&index, block)) in self.blocks.iter().enumerate() {
            if index != expect as u32 {
                return Err(Error::InvalidManifest(format!(
                    "block indices not contiguous: found {index}, expected {expect}"
                )));
            }
            if block.chunks.len() != self.shards_per_block {
                return Err(Error::InvalidManifest(format!(
                    "block {index} has {} chunks, expected {}",
                    block.chunks.len(),
                    self.shards_per_block
                )));
            }
            let mut seen_shards = vec![false; self.shards_per_block];
            let mut seen_labels = [false; 256];
            for chunk in &block.chunks {
                if chunk.shard_index >= self.shards_per_block || seen_shards[chunk.shard_index] {
                    return Err(Error::InvalidManifest(format!(
                        "block {index}: shard indices are not a permutation"
                    )));
                }
                seen_shards[chunk.shard_index] = true;
                if chunk.key_share_label == 0 || seen_labels[chunk.key_share_label as usize] {
                    return Err(Error::InvalidManifest(format!(
                        "block {index}: duplicate or zero key share label"
                    )));
                }
                seen_labels[chunk.key_share_label as usize] = true;
            }
        }
        Ok(())
    }

    /// Chunk count across all blocks.
    pub fn total_chunks(&self) -> usize {
        self.blocks.values().map(|b| b.chunks.len()).sum()
    }
}
