//! Time-lock seam. The core only depends on three operations: resolve a
//! round for a timestamp, lock bytes for a round, unlock bytes once the
//! round's randomness is public. `LocalBeacon` is the shipped stand-in for
//! the external randomness network; a production tlock client implements
//! the same trait.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::OsRng;

use crate::cipher;
use crate::error::{Error, Result};

/// Wall clock, injectable so tests can move time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock tests set by hand.
pub struct ManualClock(std::sync::Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(std::sync::Mutex::new(start))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.0.lock() {
            *guard = now;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.0.lock().map(|g| *g).unwrap_or_else(|_| Utc::now())
    }
}

pub trait TimeLock: Send + Sync {
    /// Monotone round identifier for a target timestamp.
    fn round_for(&self, at: &DateTime<Utc>) -> Result<u64>;

    /// Encrypt `plaintext` so it only opens once `round` is public.
    fn lock(&self, plaintext: &[u8], round: u64) -> Result<Vec<u8>>;

    /// Inverse of `lock`; `ReleaseNotYetAvailable` before the round.
    fn unlock(&self, locked: &[u8]) -> Result<Vec<u8>>;
}

/// Drand-shaped local beacon: rounds tick every `period` seconds from
/// `genesis`, and the per-round key is a keyed BLAKE3 of the round under a
/// chain secret. Enforcement is by the injected clock, not real randomness
/// publication; the trait is the seam a real network client plugs into.
pub struct LocalBeacon {
    chain_key: [u8; 32],
    genesis: DateTime<Utc>,
    period_secs: u64,
    clock: Arc<dyn Clock>,
}

impl LocalBeacon {
    pub fn new(chain_info: &[u8], genesis: DateTime<Utc>, period_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            chain_key: *blake3::hash(chain_info).as_bytes(),
            genesis,
            period_secs: period_secs.max(1),
            clock,
        }
    }

    /// Beacon with the fixed public chain parameters the CLI uses: Unix
    /// epoch genesis, 30-second rounds.
    pub fn default_chain(clock: Arc<dyn Clock>) -> Self {
        let genesis = Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now);
        Self::new(b"tessera-local-beacon-v1", genesis, 30, clock)
    }

    fn round_key(&self, round: u64) -> [u8; 32] {
        *blake3::keyed_hash(&self.chain_key, &round.to_le_bytes()).as_bytes()
    }

    fn current_round(&self) -> u64 {
        let elapsed = (self.clock.now() - self.genesis).num_seconds();
        if elapsed < 0 {
            0
        } else {
            elapsed as u64 / self.period_secs + 1
        }
    }
}

impl TimeLock for LocalBeacon {
    fn round_for(&self, at: &DateTime<Utc>) -> Result<u64> {
        let offset = (*at - self.genesis).num_seconds();
        if offset < 0 {
            // Before genesis: the first round already covers it.
            return Ok(1);
        }
        Ok(offset as u64 / self.period_secs + 1)
    }

    fn lock(&self, plaintext: &[u8], round: u64) -> Result<Vec<u8>> {
        let key = self.round_key(round);
        let sealed = cipher::seal(&key, plaintext, &mut OsRng)
            .ok_or_else(|| Error::TimeLockUnavailable("lock payload too large".into()))?;
        let mut out = Vec::with_capacity(8 + sealed.len());
        out.extend_from_slice(&round.to_le_bytes());
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn unlock(&self, locked: &[u8]) -> Result<Vec<u8>> {
        if locked.len() < 8 {
            return Err(Error::TimeLockUnavailable("locked blob truncated".into()));
        }
        let round = u64::from_le_bytes(
            locked[..8].try_into().map_err(|_| Error::TimeLockUnavailable("bad round header".into()))?,
        );
        if round > self.current_round() {
            return Err(Error::ReleaseNotYetAvailable(round));
        }
        let key = self.round_key(round);
        cipher::open(&key, &locked[8..])
            .ok_or_else(|| Error::TimeLockUnavailable("locked blob failed to open".into()))
    }
}
