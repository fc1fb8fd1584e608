// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use crate::theta::sketch::CompactThetaSketch;
use crate::traits::SketchError;

/// Set difference of two compact theta sketches.
pub struct ThetaANotB;

impl ThetaANotB {
    /// Hashes retained by `a` that `b` does not retain. The result keeps `a`'s theta.
    pub fn compute(
        a: &CompactThetaSketch,
        b: &CompactThetaSketch,
    ) -> Result<CompactThetaSketch, SketchError> {
        b.check_seed(a.seed_hash())?;
        if a.is_empty() || b.is_empty() || b.num_retained() == 0 {
            return Ok(a.clone());
        }
        let theta = a.theta64();
        let exclude = b.entries();
        let entries = a
            .entries()
            .iter()
            .copied()
            .filter(|h| exclude.binary_search(h).is_err())
            .collect();
        Ok(CompactThetaSketch::from_parts(
            theta,
            a.seed_hash(),
            entries,
            false,
        ))
    }
}
