use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::{Error, Result};

/// Reed-Solomon wrapper plus the split/join usage protocol: ciphertext is
/// cut into `k` equal-length zero-padded pieces, parity is a pure function
/// of those pieces, and `join` truncates back to the original length.
pub struct RsCodec {
    pub k: usize,
    pub m: usize,
    inner: ReedSolomon,
}

impl RsCodec {
    pub fn new(k: usize, m: usize) -> Result<Self> {
        let inner = ReedSolomon::new(k, m)
            .map_err(|e| Error::EncodeFailed(format!("reed-solomon init: {e}")))?;
        Ok(Self { k, m, inner })
    }

    /// Cut `blob` into `k` data pieces of `ceil(len/k)` bytes (last piece
    /// zero-padded) and append `m` zeroed parity slots, ready for `encode`.
    pub fn split_blob(&self, blob: &[u8]) -> Vec<Vec<u8>> {
        let shard_len = blob.len().div_ceil(self.k).max(1);
        let mut shards = Vec::with_capacity(self.k + self.m);
        for i in 0..self.k {
            let start = (i * shard_len).min(blob.len());
            let end = ((i + 1) * shard_len).min(blob.len());
            let mut piece = blob[start..end].to_vec();
            piece.resize(shard_len, 0);
            shards.push(piece);
        }
        for _ in 0..self.m {
            shards.push(vec![0u8; shard_len]);
        }
        shards
    }

    /// Fill the `m` parity slots from the `k` data slots.
    pub fn encode(&self, shards: &mut [Vec<u8>]) -> Result<()> {
        self.inner
            .encode(shards)
            .map_err(|e| Error::EncodeFailed(format!("reed-solomon encode: {e}")))
    }

    /// Rebuild missing slots in place; requires at least `k` present.
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> std::result::Result<(), String> {
        self.inner.reconstruct(shards).map_err(|e| e.to_string())
    }

    /// Concatenate the `k` data slots and trim to `size` bytes, undoing the
    /// padding added by `split_blob`.
    pub fn join(
        &self,
        shards: &[Option<Vec<u8>>],
        size: usize,
    ) -> std::result::Result<Vec<u8>, String> {
        let mut out = Vec::with_capacity(size);
        for (i, slot) in shards.iter().take(self.k).enumerate() {
            match slot {
                Some(piece) => out.extend_from_slice(piece),
                None => return Err(format!("data shard {i} missing after reconstruction")),
            }
        }
        if out.len() < size {
            return Err(format!("joined shards hold {} bytes, need {size}", out.len()));
        }
        out.truncate(size);
        Ok(out)
    }
}
