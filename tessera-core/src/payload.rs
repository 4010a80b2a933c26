use serde::{Deserialize, Serialize};

use crate::auth::{self, Keypair};
use crate::error::{Error, Result};

/// Registry value on a bootstrap node, keyed by node address. `last_seen`
/// is origin wall time in nanoseconds and only ever grows per address, so
/// last-writer-wins merges converge.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ActiveNodeRecord {
    pub public_key: Vec<u8>,
    pub last_seen: i64,
}

/// Wire/storage form of one shard held by a storage node. This is the only
/// place shard content lives; the bootstrap directory never sees it.
/// Signed with the empty-signature convention: the signature covers the
/// JSON of the payload with `signature` cleared.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChunkPayload {
    pub owner_address: String,
    pub owner_public_key: Vec<u8>,
    pub chunk_id: String,
    pub shard_bytes: Vec<u8>,
    pub release_time: String,
    pub signature: Vec<u8>,
}

impl ChunkPayload {
    fn signing_bytes(&self) -> Result<Vec<u8>> {
        let mut unsigned = self.clone();
        unsigned.signature = Vec::new();
        Ok(serde_json::to_vec(&unsigned)?)
    }

    pub fn sign(&mut self, keypair: &Keypair) -> Result<()> {
        self.signature = keypair.sign(&self.signing_bytes()?);
        Ok(())
    }

    /// The whole payload is rejected on any mismatch; callers never learn
    /// which field failed.
    pub fn verify(&self) -> Result<()> {
        let bytes = self.signing_bytes()?;
        if auth::verify(&bytes, &self.signature, &self.owner_public_key) {
            Ok(())
        } else {
            Err(Error::Unauthenticated)
        }
    }
}
