use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::{Error, Result};

pub const BUCKET_NODES: &str = "active_nodes";
pub const BUCKET_MANIFESTS: &str = "manifests";
pub const BUCKET_CHUNKS: &str = "chunks";

/// The bucketed key-value contract the engines run against. Each call is
/// one atomic transaction; `update` is the read-modify-write every merge
/// and last-writer-wins decision must go through so concurrent sync rounds
/// cannot lose updates.
pub trait KvStore: Send + Sync {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()>;
    fn delete(&self, bucket: &str, key: &str) -> Result<()>;
    fn list_keys(&self, bucket: &str) -> Result<Vec<String>>;
    fn list_all(&self, bucket: &str) -> Result<BTreeMap<String, Vec<u8>>>;
    fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Atomically replace the value at `key` with `f(current)`. Returning
    /// `None` leaves the key absent, deleting it if present.
    fn update(
        &self,
        bucket: &str,
        key: &str,
        f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
    ) -> Result<()>;
}

/// In-memory store used by the engines' tests and by single-process nodes.
#[derive(Default)]
pub struct MemStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::StoreUnavailable("store lock poisoned".into())
}

impl KvStore for MemStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let buckets = self.buckets.read().map_err(poisoned)?;
        Ok(buckets.get(bucket).and_then(|b| b.get(key)).cloned())
    }

    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut buckets = self.buckets.write().map_err(poisoned)?;
        buckets.entry(bucket.to_string()).or_default().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let mut buckets = self.buckets.write().map_err(poisoned)?;
        if let Some(b) = buckets.get_mut(bucket) {
            b.remove(key);
        }
        Ok(())
    }

    fn list_keys(&self, bucket: &str) -> Result<Vec<String>> {
        let buckets = self.buckets.read().map_err(poisoned)?;
        Ok(buckets.get(bucket).map(|b| b.keys().cloned().collect()).unwrap_or_default())
    }

    fn list_all(&self, bucket: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let buckets = self.buckets.read().map_err(poisoned)?;
        Ok(buckets.get(bucket).cloned().unwrap_or_default())
    }

    fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let buckets = self.buckets.read().map_err(poisoned)?;
        Ok(buckets.get(bucket).map(|b| b.contains_key(key)).unwrap_or(false))
    }

    fn update(
        &self,
        bucket: &str,
        key: &str,
        f: &mut dyn FnMut(Option<&[u8]>) -> Option<Vec<u8>>,
    ) -> Result<()> {
        let mut buckets = self.buckets.write().map_err(poisoned)?;
        let b = buckets.entry(bucket.to_string()).or_default();
        match f(b.get(key).map(|v| v.as_slice())) {
            Some(next) => {
                b.insert(key.to_string(), next);
            }
            None => {
                b.remove(key);
            }
        }
        Ok(())
    }
}
