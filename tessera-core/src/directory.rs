use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, Result};
use crate::manifest::FileManifest;
use crate::payload::{ActiveNodeRecord, ChunkPayload};
use crate::store::{KvStore, BUCKET_CHUNKS, BUCKET_MANIFESTS, BUCKET_NODES};

/// Bootstrap-node view of the node registry and manifest catalog, plus the
/// storage-node chunk table. The synchronization engine is the only writer
/// to the registry and catalog apart from `subscribe` and `publish`; all
/// read-then-write paths go through the store's atomic `update`.
#[derive(Clone)]
pub struct Directory {
    store: Arc<dyn KvStore>,
}

impl Directory {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn KvStore> {
        self.store.clone()
    }

    /// Register or refresh a storage node. `last_seen` is assigned here, at
    /// the record's origin, in nanoseconds.
    pub fn subscribe(&self, address: &str, public_key: &[u8], now: DateTime<Utc>) -> Result<()> {
        let record = ActiveNodeRecord {
            public_key: public_key.to_vec(),
            last_seen: now.timestamp_nanos_opt().unwrap_or(i64::MAX),
        };
        let bytes = serde_json::to_vec(&record)?;
        self.store.put(BUCKET_NODES, address, &bytes)
    }

    pub fn active_addresses(&self) -> Result<Vec<String>> {
        self.store.list_keys(BUCKET_NODES)
    }

    pub fn active_nodes(&self) -> Result<BTreeMap<String, ActiveNodeRecord>> {
        let mut out = BTreeMap::new();
        for (address, bytes) in self.store.list_all(BUCKET_NODES)? {
            out.insert(address, serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Last-writer-wins by `last_seen`: insert when absent, otherwise keep
    /// the larger timestamp. One atomic transaction.
    pub fn merge_node(&self, address: &str, incoming: &ActiveNodeRecord) -> Result<()> {
        let incoming_bytes = serde_json::to_vec(incoming)?;
        self.store.update(BUCKET_NODES, address, &mut |current| match current {
            None => Some(incoming_bytes.clone()),
            Some(bytes) => {
                match serde_json::from_slice::<ActiveNodeRecord>(bytes) {
                    Ok(local) if local.last_seen >= incoming.last_seen => Some(bytes.to_vec()),
                    // Undecodable local records lose to a valid incoming one.
                    _ => Some(incoming_bytes.clone()),
                }
            }
        })
    }

    /// Add-only: manifests are immutable and globally unique by file_id, so
    /// the merge is insert-if-absent.
    pub fn insert_manifest(&self, manifest: &FileManifest) -> Result<()> {
        let bytes = serde_json::to_vec(manifest)?;
        self.store.update(BUCKET_MANIFESTS, &manifest.file_id, &mut |current| match current {
            Some(existing) => Some(existing.to_vec()),
            None => Some(bytes.clone()),
        })
    }

    pub fn get_manifest(&self, file_id: &str) -> Result<Option<FileManifest>> {
        match self.store.get(BUCKET_MANIFESTS, file_id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn manifests(&self) -> Result<BTreeMap<String, FileManifest>> {
        let mut out = BTreeMap::new();
        for (file_id, bytes) in self.store.list_all(BUCKET_MANIFESTS)? {
            out.insert(file_id, serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Sample up to `n` distinct node addresses without mutating anything;
    /// when fewer than `n` nodes exist, all of them are returned.
    pub fn sample_nodes(&self, n: usize, rng: &mut impl Rng) -> Result<Vec<String>> {
        let addresses = self.active_addresses()?;
        Ok(addresses.choose_multiple(rng, n).cloned().collect())
    }

    /// Storage-node side: persist a shard payload after verifying its
    /// signature. Keyed by chunk_id.
    pub fn put_chunk(&self, payload: &ChunkPayload) -> Result<()> {
        payload.verify()?;
        let bytes = serde_json::to_vec(payload)?;
        self.store.put(BUCKET_CHUNKS, &payload.chunk_id, &bytes)
    }

    /// Storage-node side: hand out a chunk only once its release time has
    /// passed. This gate plus the time-locked key is what makes the release
    /// time enforceable rather than advisory.
    pub fn get_chunk(&self, chunk_id: &str, now: DateTime<Utc>) -> Result<Option<ChunkPayload>> {
        let Some(bytes) = self.store.get(BUCKET_CHUNKS, chunk_id)? else {
            return Ok(None);
        };
        let payload: ChunkPayload = serde_json::from_slice(&bytes)?;
        let release = DateTime::parse_from_rfc3339(&payload.release_time)
            .map_err(|_| Error::InvalidReleaseTime(payload.release_time.clone()))?
            .with_timezone(&Utc);
        if now < release {
            let round = release.timestamp().max(0) as u64;
            return Err(Error::ReleaseNotYetAvailable(round));
        }
        Ok(Some(payload))
    }
}
