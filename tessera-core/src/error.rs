use thiserror::Error;

/// Every failure kind the pipelines, directory, and background tasks can
/// surface. Pipeline errors abort the whole encode/decode call; sync and
/// retention errors are logged by their loops and never fatal.
#[derive(Debug, Error)]
pub enum Error {
    #[error("encode failed: {0}")]
    EncodeFailed(String),

    #[error("block {block}: insufficient shards ({have} of {need})")]
    InsufficientShards { block: u32, have: usize, need: usize },

    #[error("block {0}: shard reconstruction failed: {1}")]
    ReconstructionFailed(u32, String),

    #[error("block {block}: insufficient key shares ({have} of {need})")]
    InsufficientKeyShares { block: u32, have: usize, need: usize },

    #[error("release not yet available (round {0})")]
    ReleaseNotYetAvailable(u64),

    #[error("block {0}: authenticated decryption failed")]
    IntegrityFailure(u32),

    #[error("content hash mismatch: manifest {expected}, output {actual}")]
    FileCorrupted { expected: String, actual: String },

    #[error("signature verification failed")]
    Unauthenticated,

    #[error("invalid release time {0:?}")]
    InvalidReleaseTime(String),

    #[error("time-lock beacon unavailable: {0}")]
    TimeLockUnavailable(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
