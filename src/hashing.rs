// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use std::io::Cursor;

/// Hash seed shared by every family unless a theta builder overrides it.
pub const DEFAULT_SEED: u64 = 9001;

/// MurmurHash3 x64-128 of `bytes`, returned as the `(h1, h2)` halves.
pub fn hash128(bytes: &[u8], seed: u64) -> (u64, u64) {
    let hash = murmur3::murmur3_x64_128(&mut Cursor::new(bytes), seed as u32)
        .expect("reading from an in-memory cursor should not fail");
    (hash as u64, (hash >> 64) as u64)
}

/// 16-bit fingerprint of a seed, stored with compact theta sketches so that
/// operands hashed under different seeds are never combined.
pub fn compute_seed_hash(seed: u64) -> u16 {
    let (h1, _) = hash128(&seed.to_le_bytes(), 0);
    (h1 & 0xFFFF) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash128(b"abc", DEFAULT_SEED), hash128(b"abc", DEFAULT_SEED));
        assert_ne!(hash128(b"abc", DEFAULT_SEED), hash128(b"abd", DEFAULT_SEED));
        assert_ne!(hash128(b"abc", DEFAULT_SEED), hash128(b"abc", 1));
    }

    #[test]
    fn test_seed_hash_differs_by_seed() {
        assert_eq!(compute_seed_hash(DEFAULT_SEED), compute_seed_hash(DEFAULT_SEED));
        assert_ne!(compute_seed_hash(DEFAULT_SEED), compute_seed_hash(42));
    }
}
