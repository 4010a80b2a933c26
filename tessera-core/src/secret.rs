//! Shamir secret sharing over GF(2^8), byte by byte: each secret byte is
//! the constant term of a random degree `threshold - 1` polynomial, and
//! share `x` holds the polynomial's value at that point. Labels are the
//! nonzero x-coordinates 1..=share_count.

use std::collections::BTreeMap;

use gf256::gf256;
use rand::RngCore;

/// Split `secret` into `share_count` labeled shares, any `threshold` of
/// which reconstruct it. Labels are 1..=share_count; zero is reserved for
/// the secret itself.
pub fn split(
    secret: &[u8],
    share_count: u8,
    threshold: u8,
    rng: &mut impl RngCore,
) -> BTreeMap<u8, Vec<u8>> {
    debug_assert!(threshold >= 1 && threshold <= share_count);
    let mut shares: BTreeMap<u8, Vec<u8>> =
        (1..=share_count).map(|x| (x, Vec::with_capacity(secret.len()))).collect();
    let mut coeffs = vec![0u8; threshold as usize];
    for &byte in secret {
        coeffs[0] = byte;
        rng.fill_bytes(&mut coeffs[1..]);
        for (&x, share) in shares.iter_mut() {
            share.push(eval(&coeffs, x));
        }
    }
    shares
}

/// Lagrange interpolation at x = 0 from a label→share map. Errors on
/// duplicate-length mismatches or an empty map; supplying fewer than the
/// original threshold yields garbage, not an error — threshold checks
/// belong to the caller.
pub fn combine(shares: &BTreeMap<u8, Vec<u8>>) -> Result<Vec<u8>, String> {
    let mut iter = shares.iter();
    let (_, first) = iter.next().ok_or("no shares supplied")?;
    let len = first.len();
    if shares.values().any(|s| s.len() != len) {
        return Err("shares have differing lengths".into());
    }
    if shares.keys().any(|&x| x == 0) {
        return Err("share label 0 is invalid".into());
    }
    let labels: Vec<u8> = shares.keys().copied().collect();
    let mut secret = Vec::with_capacity(len);
    for i in 0..len {
        let mut acc = gf256::new(0);
        for &xi in &labels {
            let yi = gf256::new(shares[&xi][i]);
            let mut basis = gf256::new(1);
            for &xj in &labels {
                if xj != xi {
                    // In GF(2^8) subtraction is addition (xor).
                    basis *= gf256::new(xj) / (gf256::new(xj) + gf256::new(xi));
                }
            }
            acc += yi * basis;
        }
        secret.push(u8::from(acc));
    }
    Ok(secret)
}

fn eval(coeffs: &[u8], x: u8) -> u8 {
    // Horner's rule, highest coefficient first.
    let x = gf256::new(x);
    let mut acc = gf256::new(0);
    for &c in coeffs.iter().rev() {
        acc = acc * x + gf256::new(c);
    }
    u8::from(acc)
}
