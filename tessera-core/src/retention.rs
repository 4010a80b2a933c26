//! Retention sweeps. Storage nodes drop chunk payloads once their release
//! time is a full retention window in the past; bootstrap nodes drop
//! expired manifests the same way, then garbage-collect registry entries
//! no remaining manifest references. Nodes are cheap to re-subscribe, so
//! an unreferenced record is assumed retirable.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::RetentionConfig;
use crate::error::Result;
use crate::manifest::FileManifest;
use crate::payload::ChunkPayload;
use crate::store::{KvStore, BUCKET_CHUNKS, BUCKET_MANIFESTS, BUCKET_NODES};
use crate::task::TaskHandle;
use crate::timelock::Clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Storage,
    Bootstrap,
}

pub struct RetentionSweeper {
    cfg: RetentionConfig,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl RetentionSweeper {
    pub fn new(cfg: RetentionConfig, store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { cfg, store, clock }
    }

    fn expired(&self, release_time: &str, now: DateTime<Utc>) -> Option<bool> {
        let release = DateTime::parse_from_rfc3339(release_time).ok()?.with_timezone(&Utc);
        Some(now > release + self.cfg.retention_window)
    }

    /// Storage role: delete chunk payloads past their retention horizon.
    pub fn sweep_chunks(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut removed = 0;
        for (chunk_id, bytes) in self.store.list_all(BUCKET_CHUNKS)? {
            let payload: ChunkPayload = match serde_json::from_slice(&bytes) {
                Ok(p) => p,
                Err(e) => {
                    warn!(chunk_id = %chunk_id, error = %e, "undecodable chunk payload, skipping");
                    continue;
                }
            };
            match self.expired(&payload.release_time, now) {
                Some(true) => {
                    self.store.delete(BUCKET_CHUNKS, &chunk_id)?;
                    removed += 1;
                }
                Some(false) => {}
                None => {
                    warn!(chunk_id = %chunk_id, "unparsable release time, skipping");
                }
            }
        }
        Ok(removed)
    }

    /// Bootstrap role: delete expired manifests, then any registry record
    /// no surviving manifest's chunk node lists mention.
    pub fn sweep_catalog(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut removed = 0;
        for (file_id, bytes) in self.store.list_all(BUCKET_MANIFESTS)? {
            let manifest: FileManifest = match serde_json::from_slice(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    warn!(file_id = %file_id, error = %e, "undecodable manifest, skipping");
                    continue;
                }
            };
            match self.expired(&manifest.release_time, now) {
                Some(true) => {
                    self.store.delete(BUCKET_MANIFESTS, &file_id)?;
                    removed += 1;
                }
                Some(false) => {}
                None => {
                    warn!(file_id = %file_id, "unparsable release time, skipping");
                }
            }
        }

        // Registry GC against what's left.
        let mut referenced: std::collections::HashSet<String> = Default::default();
        for bytes in self.store.list_all(BUCKET_MANIFESTS)?.values() {
            if let Ok(manifest) = serde_json::from_slice::<FileManifest>(bytes) {
                for block in manifest.blocks.values() {
                    for chunk in &block.chunks {
                        referenced.extend(chunk.nodes.iter().cloned());
                    }
                }
            }
        }
        for address in self.store.list_keys(BUCKET_NODES)? {
            if !referenced.contains(&address) {
                self.store.delete(BUCKET_NODES, &address)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Periodic jittered loop; sweep failures are logged, never fatal.
    pub fn spawn(self: Arc<Self>, role: Role) -> TaskHandle {
        let (tx, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            loop {
                let delay = {
                    let mut rng = rand::thread_rng();
                    let base = self.cfg.base_period;
                    base + rng.gen_range(Duration::ZERO..base.max(Duration::from_millis(1)))
                };
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        let swept = match role {
                            Role::Storage => self.sweep_chunks(),
                            Role::Bootstrap => self.sweep_catalog(),
                        };
                        match swept {
                            Ok(n) if n > 0 => info!(removed = n, "retention sweep"),
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "retention sweep failed"),
                        }
                    }
                    changed = rx.changed() => {
                        // A dropped sender counts as shutdown too.
                        if changed.is_err() || *rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });
        TaskHandle::new(tx, handle)
    }
}
