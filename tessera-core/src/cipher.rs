use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

pub fn generate_key(rng: &mut impl RngCore) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    rng.fill_bytes(&mut key);
    key
}

/// AES-256-GCM seal: fresh random nonce prepended to ciphertext+tag.
/// `None` only when the plaintext exceeds the AES-GCM length bound.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8], rng: &mut impl RngCore) -> Option<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce);
    let ciphertext = cipher.encrypt(Nonce::from_slice(&nonce), plaintext).ok()?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Some(out)
}

/// Inverse of `seal`. `None` on truncation or authentication failure; the
/// caller decides which error kind that is. No key fallback, ever.
pub fn open(key: &[u8; KEY_LEN], sealed: &[u8]) -> Option<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return None;
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher.decrypt(Nonce::from_slice(nonce), ciphertext).ok()
}

/// AEAD tag plus prepended nonce; `encrypted_size` exceeds the plaintext by
/// exactly this much.
pub const fn overhead() -> usize {
    NONCE_LEN + 16
}
