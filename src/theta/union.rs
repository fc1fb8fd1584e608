// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use crate::hashing::{self, DEFAULT_SEED};
use crate::theta::sketch::{check_lg_k, CompactThetaSketch, HashTable, MAX_THETA};
use crate::traits::SketchError;

/// Union of compact theta sketches.
///
/// Theta of the union is the minimum theta seen; the retained set is every absorbed
/// hash below it, trimmed back to `2^lg_k` entries when materialized.
#[derive(Debug, Clone)]
pub struct ThetaUnion {
    lg_k: u8,
    seed_hash: u16,
    union_theta: u64,
    is_empty: bool,
    gadget: HashTable,
}

impl ThetaUnion {
    pub fn new(lg_k: u8) -> Result<Self, SketchError> {
        Self::with_seed(lg_k, DEFAULT_SEED)
    }

    pub fn with_seed(lg_k: u8, seed: u64) -> Result<Self, SketchError> {
        Self::with_seed_hash(lg_k, hashing::compute_seed_hash(seed))
    }

    pub(crate) fn with_seed_hash(lg_k: u8, seed_hash: u16) -> Result<Self, SketchError> {
        check_lg_k(lg_k)?;
        Ok(Self {
            lg_k,
            seed_hash,
            union_theta: MAX_THETA,
            is_empty: true,
            gadget: HashTable::new(lg_k, MAX_THETA),
        })
    }

    /// Absorbs a compact sketch. Fails without side effects on a seed mismatch.
    pub fn update(&mut self, sketch: &CompactThetaSketch) -> Result<(), SketchError> {
        sketch.check_seed(self.seed_hash)?;
        if sketch.is_empty() {
            return Ok(());
        }
        self.is_empty = false;
        self.union_theta = self.union_theta.min(sketch.theta64());
        for &hash in sketch.entries() {
            if hash >= self.union_theta {
                break;
            }
            self.gadget.insert(hash);
        }
        Ok(())
    }

    fn current_theta(&self) -> u64 {
        self.union_theta.min(self.gadget.theta())
    }

    /// Materializes the union.
    pub fn sketch(&self) -> CompactThetaSketch {
        if self.is_empty {
            return CompactThetaSketch::from_parts(MAX_THETA, self.seed_hash, Vec::new(), true);
        }
        let mut theta = self.current_theta();
        let mut entries: Vec<u64> = self
            .gadget
            .entries()
            .into_iter()
            .filter(|&h| h < theta)
            .collect();
        let k = 1usize << self.lg_k;
        if entries.len() > k {
            entries.sort_unstable();
            theta = entries[k];
            entries.truncate(k);
        }
        CompactThetaSketch::from_parts(theta, self.seed_hash, entries, false)
    }
}
