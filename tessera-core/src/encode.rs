use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use tracing::debug;
use uuid::Uuid;

use crate::auth::Keypair;
use crate::cipher;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::manifest::{
    BlockDescriptor, ChunkDescriptor, FileManifest, HASH_ALGORITHM,
};
use crate::payload::ChunkPayload;
use crate::rs_codec::RsCodec;
use crate::secret;
use crate::timelock::TimeLock;

/// Encode output: the manifest plus, per block, shard bytes indexed
/// identically to the manifest's chunk order. Key shares travel in the
/// manifest; shard bytes travel to storage nodes.
#[derive(Debug)]
pub struct EncodedFile {
    pub manifest: FileManifest,
    pub shards: Vec<Vec<Vec<u8>>>,
}

impl EncodedFile {
    /// `(chunk_id, nodes, shard_bytes)` triples in manifest order, ready
    /// for distribution.
    pub fn distribution_plan(&self) -> Vec<(&str, &[String], &[u8])> {
        let mut plan = Vec::with_capacity(self.manifest.total_chunks());
        for (&block, descriptor) in &self.manifest.blocks {
            for (pos, chunk) in descriptor.chunks.iter().enumerate() {
                plan.push((
                    chunk.chunk_id.as_str(),
                    chunk.nodes.as_slice(),
                    self.shards[block as usize][pos].as_slice(),
                ));
            }
        }
        plan
    }

    /// Signed wire payload for one chunk, as a storage node will persist it.
    pub fn payload_for(
        &self,
        block: u32,
        position: usize,
        keypair: &Keypair,
        owner_address: &str,
    ) -> Result<ChunkPayload> {
        let descriptor = self
            .manifest
            .blocks
            .get(&block)
            .and_then(|b| b.chunks.get(position))
            .ok_or_else(|| Error::EncodeFailed(format!("no chunk {block}/{position}")))?;
        let mut payload = ChunkPayload {
            owner_address: owner_address.to_string(),
            owner_public_key: keypair.public_key(),
            chunk_id: descriptor.chunk_id.clone(),
            shard_bytes: self.shards[block as usize][position].clone(),
            release_time: self.manifest.release_time.clone(),
            signature: Vec::new(),
        };
        payload.sign(keypair)?;
        Ok(payload)
    }
}

pub struct Encoder {
    cfg: PipelineConfig,
    timelock: Arc<dyn TimeLock>,
}

impl Encoder {
    pub fn new(cfg: PipelineConfig, timelock: Arc<dyn TimeLock>) -> Result<Self> {
        let total = cfg.erasure.total_shards();
        if cfg.erasure.data_shards == 0 || cfg.erasure.parity_shards == 0 {
            return Err(Error::EncodeFailed("data and parity shard counts must be nonzero".into()));
        }
        if total > 255 {
            // Key-share labels are single bytes.
            return Err(Error::EncodeFailed(format!("total shards {total} exceeds 255")));
        }
        if cfg.target_chunk_size == 0 || cfg.chunks_tolerance == 0 {
            return Err(Error::EncodeFailed("chunk size and tolerance must be nonzero".into()));
        }
        Ok(Self { cfg, timelock })
    }

    /// Split `input` into time-locked, erasure-coded blocks and build the
    /// manifest. Any failure aborts the whole call; nothing partial is
    /// ever published. Blocks are processed strictly in index order.
    pub fn encode<R: Read>(
        &self,
        mut input: R,
        file_name: &str,
        release_time: &str,
        nodes: &[String],
    ) -> Result<EncodedFile> {
        let release: DateTime<Utc> = DateTime::parse_from_rfc3339(release_time)
            .map_err(|_| Error::InvalidReleaseTime(release_time.to_string()))?
            .with_timezone(&Utc);
        let round = self.timelock.round_for(&release)?;

        let erasure = self.cfg.erasure;
        let total_shards = erasure.total_shards();
        let rs = RsCodec::new(erasure.data_shards, erasure.parity_shards)?;
        let block_size = self.cfg.block_size();

        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; block_size];
        let mut blocks: BTreeMap<u32, BlockDescriptor> = BTreeMap::new();
        let mut shard_sets: Vec<Vec<Vec<u8>>> = Vec::new();
        let mut file_size: u64 = 0;
        let mut block_index: u32 = 0;
        let mut rng = rand::thread_rng();

        loop {
            let n = read_full(&mut input, &mut buffer)
                .map_err(|e| Error::EncodeFailed(format!("read input: {e}")))?;
            if n == 0 {
                break;
            }
            let block = &buffer[..n];
            hasher.update(block);
            file_size += n as u64;

            // Fresh symmetric key per block; only its time-locked form is
            // ever shared, and only as secret shares.
            let key = cipher::generate_key(&mut OsRng);
            let ciphertext = cipher::seal(&key, block, &mut OsRng)
                .ok_or_else(|| Error::EncodeFailed("block exceeds AEAD length bound".into()))?;
            let encrypted_size = ciphertext.len();
            let locked_key = self.timelock.lock(&key, round)?;

            let mut shards = rs.split_blob(&ciphertext);
            rs.encode(&mut shards)?;

            let shares = secret::split(
                &locked_key,
                total_shards as u8,
                erasure.data_shards as u8,
                &mut OsRng,
            );
            // Bijection between shard indices and share labels; the pairing
            // order is arbitrary but recorded per chunk, since decode
            // recombines by label, not position.
            let labels: Vec<u8> = shares.keys().copied().collect();

            let mut chunks = Vec::with_capacity(total_shards);
            for (shard_index, label) in labels.iter().enumerate() {
                chunks.push(ChunkDescriptor {
                    chunk_id: Uuid::new_v4().to_string(),
                    shard_index,
                    key_share_label: *label,
                    key_share_bytes: shares[label].clone(),
                    nodes: nodes
                        .choose_multiple(&mut rng, self.cfg.chunks_tolerance)
                        .cloned()
                        .collect(),
                });
            }

            debug!(block = block_index, encrypted_size, "encoded block");
            blocks.insert(block_index, BlockDescriptor { encrypted_size, chunks });
            shard_sets.push(shards);
            block_index += 1;
            if n < block_size {
                break;
            }
        }

        let manifest = FileManifest {
            file_id: Uuid::new_v4().to_string(),
            file_name: file_name.to_string(),
            file_size,
            release_time: release_time.to_string(),
            content_hash: hasher.finalize().to_hex().to_string(),
            hash_algorithm: HASH_ALGORITHM.to_string(),
            block_count: block_index,
            shards_per_block: total_shards,
            erasure,
            blocks,
        };
        debug_assert!(manifest.validate().is_ok());
        Ok(EncodedFile { manifest, shards: shard_sets })
    }
}

fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
