// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use crate::hashing::{self, DEFAULT_SEED};
use crate::theta::sketch::{CompactThetaSketch, MAX_THETA};
use crate::traits::SketchError;
use std::cmp::Ordering;

#[derive(Debug, Clone)]
struct IntersectionState {
    theta: u64,
    /// Sorted ascending.
    entries: Vec<u64>,
    is_empty: bool,
}

/// Intersection of compact theta sketches.
///
/// Until the first sketch arrives the intersection stands for the whole universe,
/// so [`ThetaIntersection::sketch`] returns `None` rather than an empty sketch.
#[derive(Debug, Clone)]
pub struct ThetaIntersection {
    seed_hash: u16,
    state: Option<IntersectionState>,
}

impl Default for ThetaIntersection {
    fn default() -> Self {
        Self::new()
    }
}

impl ThetaIntersection {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed_hash: hashing::compute_seed_hash(seed),
            state: None,
        }
    }

    pub fn has_result(&self) -> bool {
        self.state.is_some()
    }

    /// Intersects the running result with `sketch`.
    pub fn update(&mut self, sketch: &CompactThetaSketch) -> Result<(), SketchError> {
        sketch.check_seed(self.seed_hash)?;
        let next = match self.state.take() {
            None => IntersectionState {
                theta: sketch.theta64(),
                entries: sketch.entries().to_vec(),
                is_empty: sketch.is_empty(),
            },
            Some(current) => {
                if current.is_empty || sketch.is_empty() {
                    IntersectionState {
                        theta: MAX_THETA,
                        entries: Vec::new(),
                        is_empty: true,
                    }
                } else {
                    let theta = current.theta.min(sketch.theta64());
                    IntersectionState {
                        theta,
                        entries: intersect_sorted(&current.entries, sketch.entries(), theta),
                        is_empty: false,
                    }
                }
            }
        };
        self.state = Some(next);
        Ok(())
    }

    /// The intersection so far, or `None` if nothing has been absorbed.
    pub fn sketch(&self) -> Option<CompactThetaSketch> {
        self.state.as_ref().map(|state| {
            CompactThetaSketch::from_parts(
                state.theta,
                self.seed_hash,
                state.entries.clone(),
                state.is_empty,
            )
        })
    }
}

fn intersect_sorted(a: &[u64], b: &[u64], theta: u64) -> Vec<u64> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() && a[i] < theta && b[j] < theta {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theta::UpdateThetaSketch;

    fn compact(range: std::ops::Range<u64>) -> CompactThetaSketch {
        let mut sketch = UpdateThetaSketch::new();
        for i in range {
            sketch.update_u64(i);
        }
        sketch.compact()
    }

    #[test]
    fn test_no_input_means_no_result() {
        let intersection = ThetaIntersection::new();
        assert!(!intersection.has_result());
        assert!(intersection.sketch().is_none());
    }

    #[test]
    fn test_disjoint_inputs_give_empty_estimate() {
        let mut intersection = ThetaIntersection::new();
        intersection.update(&compact(0..100)).unwrap();
        intersection.update(&compact(100..200)).unwrap();
        let result = intersection.sketch().unwrap();
        assert_eq!(result.estimate(), 0.0);
        assert!(!result.is_empty());
    }

    #[test]
    fn test_overlap() {
        let mut intersection = ThetaIntersection::new();
        intersection.update(&compact(0..1_000)).unwrap();
        intersection.update(&compact(500..1_500)).unwrap();
        assert_eq!(intersection.sketch().unwrap().estimate(), 500.0);
    }

    #[test]
    fn test_estimation_mode_overlap() {
        let mut a = UpdateThetaSketch::builder().lg_k(10).build().unwrap();
        let mut b = UpdateThetaSketch::builder().lg_k(10).build().unwrap();
        for i in 0..40_000u64 {
            a.update_u64(i);
            b.update_u64(i + 20_000);
        }
        let mut intersection = ThetaIntersection::new();
        intersection.update(&a.compact()).unwrap();
        intersection.update(&b.compact()).unwrap();
        let result = intersection.sketch().unwrap();
        assert!(result.entries().iter().all(|&h| h < result.theta64()));
        let rel = (result.estimate() - 20_000.0).abs() / 20_000.0;
        assert!(rel < 0.25, "estimate = {}", result.estimate());
    }

    #[test]
    fn test_empty_operand_empties_result() {
        let mut intersection = ThetaIntersection::new();
        intersection.update(&compact(0..10)).unwrap();
        intersection.update(&UpdateThetaSketch::new().compact()).unwrap();
        assert!(intersection.sketch().unwrap().is_empty());
    }
}
