//! Anti-entropy synchronization between bootstrap nodes: periodically pick
//! a random peer, exchange signed snapshots of the node registry and
//! manifest catalog, and merge both directions with convergent rules. The
//! merge is commutative and idempotent, so any number of repeated,
//! reordered, or relayed exchanges reach the same state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::auth::{self, Keypair};
use crate::config::SyncConfig;
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::manifest::FileManifest;
use crate::payload::ActiveNodeRecord;
use crate::task::TaskHandle;

/// One node's view of the two replicated tables. BTreeMaps keep the signed
/// JSON bytes deterministic.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Snapshot {
    pub address: String,
    pub public_key: Vec<u8>,
    pub active_nodes: BTreeMap<String, ActiveNodeRecord>,
    pub manifests: BTreeMap<String, FileManifest>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SignedSnapshot {
    pub snapshot: Snapshot,
    pub signature: Vec<u8>,
}

impl SignedSnapshot {
    pub fn sign(snapshot: Snapshot, keypair: &Keypair) -> Result<Self> {
        let bytes = serde_json::to_vec(&snapshot)?;
        Ok(Self { signature: keypair.sign(&bytes), snapshot })
    }

    /// Verify against the key the snapshot itself carries (self-certifying
    /// identity, as with every other request).
    pub fn verify(&self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.snapshot)?;
        if auth::verify(&bytes, &self.signature, &self.snapshot.public_key) {
            Ok(())
        } else {
            Err(Error::Unauthenticated)
        }
    }
}

/// Transport seam: deliver a snapshot to a peer and bring back its reply
/// snapshot. Hidden-service HTTP in production, a loopback in tests.
#[async_trait]
pub trait SnapshotExchange: Send + Sync {
    async fn exchange(&self, peer: &str, snapshot: SignedSnapshot) -> Result<SignedSnapshot>;
}

pub struct SyncEngine {
    cfg: SyncConfig,
    directory: Directory,
    keypair: Keypair,
    transport: Arc<dyn SnapshotExchange>,
}

impl SyncEngine {
    pub fn new(
        cfg: SyncConfig,
        directory: Directory,
        keypair: Keypair,
        transport: Arc<dyn SnapshotExchange>,
    ) -> Self {
        Self { cfg, directory, keypair, transport }
    }

    /// Signed snapshot of the current local tables.
    pub fn snapshot(&self) -> Result<SignedSnapshot> {
        let snapshot = Snapshot {
            address: self.cfg.address.clone(),
            public_key: self.keypair.public_key(),
            active_nodes: self.directory.active_nodes()?,
            manifests: self.directory.manifests()?,
        };
        SignedSnapshot::sign(snapshot, &self.keypair)
    }

    /// Merge rule. Registry: insert-if-absent, else keep the larger
    /// `last_seen` (atomic per record). Catalog: add-only by file_id.
    pub fn merge(&self, incoming: &Snapshot) -> Result<()> {
        for (address, record) in &incoming.active_nodes {
            self.directory.merge_node(address, record)?;
        }
        for manifest in incoming.manifests.values() {
            self.directory.insert_manifest(manifest)?;
        }
        Ok(())
    }

    /// Responder side: verify, merge, and reply with the local view *after*
    /// incorporating the incoming data, so the initiator converges in the
    /// same round trip.
    pub fn handle_snapshot(&self, incoming: SignedSnapshot) -> Result<SignedSnapshot> {
        incoming.verify()?;
        self.merge(&incoming.snapshot)?;
        self.snapshot()
    }

    /// Initiator side of one gossip round.
    pub async fn run_once(&self, rng: &mut (impl Rng + Send)) -> Result<()> {
        let peers: Vec<&String> =
            self.cfg.peers.iter().filter(|p| **p != self.cfg.address).collect();
        let Some(peer) = peers.choose(rng) else {
            return Ok(()); // nothing to gossip with
        };
        let outgoing = self.snapshot()?;
        let reply = self.transport.exchange(peer, outgoing).await?;
        reply.verify()?;
        self.merge(&reply.snapshot)?;
        info!(peer = %peer, "synchronized");
        Ok(())
    }

    /// Periodic gossip loop with `base + uniform(0, base)` jitter so the
    /// fleet never synchronizes in lockstep. Failures are logged and the
    /// loop continues; it stops at the next tick after shutdown flips.
    pub fn spawn(self: Arc<Self>) -> TaskHandle {
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
                        let mut rng = rand::rngs::OsRng;
                        if let Err(e) = self.run_once(&mut rng).await {
                            warn!(error = %e, "synchronization round failed");
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
