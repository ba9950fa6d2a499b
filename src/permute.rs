//! Permuter — deterministic byte permutation keyed by content seed.
//!
//! Obfuscation only; it adds no cryptographic strength beyond the AEAD
//! seal that follows it. Purely a reversible in-place shuffle so that
//! identical plaintexts don't produce identical compressed-then-permuted
//! bytes before encryption.
//!
//! PRNG choice: `rand::rngs::SmallRng` seeded via `seed_from_u64`. It is a
//! non-cryptographic, reproducible generator (currently Xoshiro256++),
//! named here since the choice of PRNG is itself a property implementations
//! must agree on. Both pack and unpack recompute the same permutation from
//! `(data_key, index)`; nothing about it is persisted to disk.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sha2::{Digest, Sha256};

/// Derives the 64-bit per-block seed `s = first_8_bytes(SHA256(data_key || "PERM" || BE(i)))`.
pub fn derive_seed(data_key: &[u8; 32], index: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(data_key);
    hasher.update(b"PERM");
    hasher.update(index.to_be_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[0..8].try_into().unwrap())
}

fn permutation_indices(len: usize, seed: u64) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    let mut rng = SmallRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    indices
}

/// `permute(b)` places `b[k]` at position `π(k)`.
pub fn permute(data: &[u8], data_key: &[u8; 32], index: u64) -> Vec<u8> {
    let seed = derive_seed(data_key, index);
    let perm = permutation_indices(data.len(), seed);
    let mut out = vec![0u8; data.len()];
    for (k, &p) in perm.iter().enumerate() {
        out[p] = data[k];
    }
    out
}

/// Inverse of [`permute`].
pub fn unpermute(data: &[u8], data_key: &[u8; 32], index: u64) -> Vec<u8> {
    let seed = derive_seed(data_key, index);
    let perm = permutation_indices(data.len(), seed);
    let mut out = vec![0u8; data.len()];
    for (k, &p) in perm.iter().enumerate() {
        out[k] = data[p];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permute_unpermute_inverse() {
        let key = [9u8; 32];
        let data: Vec<u8> = (0u8..=255).collect();
        for index in [0u64, 1, 42, u64::MAX] {
            let permuted = permute(&data, &key, index);
            let restored = unpermute(&permuted, &key, index);
            assert_eq!(restored, data);
        }
    }

    #[test]
    fn different_index_different_permutation() {
        let key = [1u8; 32];
        let data: Vec<u8> = (0u8..=200).collect();
        let a = permute(&data, &key, 0);
        let b = permute(&data, &key, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_block_is_noop() {
        let key = [0u8; 32];
        assert_eq!(permute(&[], &key, 0), Vec::<u8>::new());
        assert_eq!(unpermute(&[], &key, 0), Vec::<u8>::new());
    }
}
