use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cipher;
use crate::error::{Error, Result};
use crate::manifest::FileManifest;
use crate::rs_codec::RsCodec;
use crate::secret;
use crate::timelock::TimeLock;

/// One delivered chunk. Duplicates and chunk ids foreign to the manifest
/// are tolerated; callers may over-fetch freely.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub chunk_id: String,
    pub shard_bytes: Vec<u8>,
}

pub struct Decoder {
    timelock: Arc<dyn TimeLock>,
}

impl Decoder {
    pub fn new(timelock: Arc<dyn TimeLock>) -> Self {
        Self { timelock }
    }

    /// Reassemble the original file from a manifest and per-block
    /// deliveries, writing plaintext to `output` strictly in block order.
    /// Any failure aborts the whole call; bytes are only written for blocks
    /// that fully decoded, and the final whole-file hash check guards
    /// against cross-block substitution.
    pub fn decode<W: Write>(
        &self,
        manifest: &FileManifest,
        deliveries: &BTreeMap<u32, Vec<Delivery>>,
        mut output: W,
    ) -> Result<()> {
        manifest.validate()?;
        let erasure = manifest.erasure;
        let total_shards = erasure.total_shards();
        let rs = RsCodec::new(erasure.data_shards, erasure.parity_shards)?;
        let mut hasher = blake3::Hasher::new();

        for (&block_index, descriptor) in &manifest.blocks {
            let delivered = deliveries.get(&block_index).map(|d| d.as_slice()).unwrap_or(&[]);

            // Slot fill, first write wins. Shares are collected afterwards
            // from every filled slot's descriptor: the stored label↔shard
            // bijection means a reconstructed shard carries its original
            // share too.
            let mut slots: Vec<Option<Vec<u8>>> = vec![None; total_shards];
            for delivery in delivered {
                let Some(chunk) =
                    descriptor.chunks.iter().find(|c| c.chunk_id == delivery.chunk_id)
                else {
                    warn!(block = block_index, chunk_id = %delivery.chunk_id,
                        "delivered chunk not in manifest, ignoring");
                    continue;
                };
                if slots[chunk.shard_index].is_none() {
                    slots[chunk.shard_index] = Some(delivery.shard_bytes.clone());
                }
            }

            let have = slots.iter().filter(|s| s.is_some()).count();
            if have < erasure.data_shards {
                return Err(Error::InsufficientShards {
                    block: block_index,
                    have,
                    need: erasure.data_shards,
                });
            }

            rs.reconstruct(&mut slots)
                .map_err(|e| Error::ReconstructionFailed(block_index, e))?;
            let ciphertext = rs
                .join(&slots, descriptor.encrypted_size)
                .map_err(|e| Error::ReconstructionFailed(block_index, e))?;

            let mut shares: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
            for chunk in &descriptor.chunks {
                if slots[chunk.shard_index].is_some() {
                    shares.insert(chunk.key_share_label, chunk.key_share_bytes.clone());
                }
            }
            if shares.len() < erasure.data_shards {
                return Err(Error::InsufficientKeyShares {
                    block: block_index,
                    have: shares.len(),
                    need: erasure.data_shards,
                });
            }

            let locked_key = secret::combine(&shares)
                .map_err(|e| Error::ReconstructionFailed(block_index, e))?;
            let key_bytes = self.timelock.unlock(&locked_key)?;
            let key: [u8; cipher::KEY_LEN] = key_bytes
                .as_slice()
                .try_into()
                .map_err(|_| Error::IntegrityFailure(block_index))?;

            let plaintext =
                cipher::open(&key, &ciphertext).ok_or(Error::IntegrityFailure(block_index))?;
            hasher.update(&plaintext);
            output.write_all(&plaintext)?;
            debug!(block = block_index, bytes = plaintext.len(), "decoded block");
        }

        // Buffered writers defer errors to flush; surface them here rather
        // than letting the caller finalize a truncated output.
        output.flush()?;

        let actual = hasher.finalize().to_hex().to_string();
        if actual != manifest.content_hash {
            return Err(Error::FileCorrupted {
                expected: manifest.content_hash.clone(),
                actual,
            });
        }
        Ok(())
    }
}
