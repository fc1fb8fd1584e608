// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use crate::codec::{self, Family, Preamble};
use crate::cpc_capnp;
use crate::hashing::{self, DEFAULT_SEED};
use crate::traits::{Sketch, SketchError, SketchReader};
use capnp::message::Builder;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::{debug, trace};

pub const MIN_LG_K: u8 = 4;
pub const MAX_LG_K: u8 = 26;
pub const DEFAULT_LG_K: u8 = 11;

const NUM_COLUMNS: u32 = 64;
const COLUMN_BITS: u32 = 6;

const KIND_SPARSE: u8 = 0;
const KIND_DENSE: u8 = 1;

mod roaring_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(bitmap: &RoaringBitmap, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut bytes = Vec::new();
        bitmap
            .serialize_into(&mut bytes)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_bytes(&bytes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<RoaringBitmap, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        RoaringBitmap::deserialize_from(&mut Cursor::new(&bytes)).map_err(serde::de::Error::custom)
    }
}

/// Coupon storage. Promotion from sparse to dense is one-way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum CpcState {
    /// Coupons encoded as `(row << 6) | col`.
    Sparse(#[serde(with = "roaring_serde")] RoaringBitmap),
    /// One 64-bit column mask per row.
    Dense(Vec<u64>),
}

impl CpcState {
    /// Sets the bit; returns true if it was not already set.
    fn insert(&mut self, row: u32, col: u32) -> bool {
        match self {
            CpcState::Sparse(bitmap) => bitmap.insert((row << COLUMN_BITS) | col),
            CpcState::Dense(rows) => {
                let mask = 1u64 << col;
                let word = &mut rows[row as usize];
                let fresh = *word & mask == 0;
                *word |= mask;
                fresh
            }
        }
    }

    fn for_each(&self, mut f: impl FnMut(u32, u32)) {
        match self {
            CpcState::Sparse(bitmap) => {
                for coupon in bitmap.iter() {
                    f(coupon >> COLUMN_BITS, coupon & (NUM_COLUMNS - 1));
                }
            }
            CpcState::Dense(rows) => {
                for (row, &word) in rows.iter().enumerate() {
                    let mut bits = word;
                    while bits != 0 {
                        let col = bits.trailing_zeros();
                        f(row as u32, col);
                        bits &= bits - 1;
                    }
                }
            }
        }
    }

    fn count(&self) -> u64 {
        match self {
            CpcState::Sparse(bitmap) => bitmap.len(),
            CpcState::Dense(rows) => rows.iter().map(|w| w.count_ones() as u64).sum(),
        }
    }

    fn to_dense(&self, lg_k: u8) -> Vec<u64> {
        let mut rows = vec![0u64; 1 << lg_k];
        self.for_each(|row, col| rows[row as usize] |= 1u64 << col);
        rows
    }
}

fn dense_threshold(lg_k: u8) -> u64 {
    (3u64 << lg_k) / 32
}

fn check_lg_k(lg_k: u8) -> Result<(), SketchError> {
    if !(MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
        return Err(SketchError::Configuration(format!(
            "CPC lg_k must be in [{}, {}], got {}",
            MIN_LG_K, MAX_LG_K, lg_k
        )));
    }
    Ok(())
}

/// Sum of 2^-(col+1) over the columns not yet set, across all rows.
fn compute_kxp(state: &CpcState, lg_k: u8) -> f64 {
    let mut kxp = (1u64 << lg_k) as f64;
    state.for_each(|_, col| kxp -= (-((col + 1) as f64)).exp2());
    kxp
}

/// Expected number of set bits after `n` distinct items.
fn expected_coupons(n: f64, k: f64) -> f64 {
    (0..NUM_COLUMNS)
        .map(|j| {
            let p = (-((j + 1) as f64)).exp2();
            k * -(-n * p / k).exp_m1()
        })
        .sum()
}

/// Inverts the coupon-count expectation by bisection.
fn icon_estimate(lg_k: u8, num_coupons: u64) -> f64 {
    if num_coupons == 0 {
        return 0.0;
    }
    let k = (1u64 << lg_k) as f64;
    let target = num_coupons as f64;
    let mut lo = target;
    let mut hi = target * 2.0;
    while expected_coupons(hi, k) < target && hi < f64::MAX / 4.0 {
        lo = hi;
        hi *= 2.0;
    }
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if expected_coupons(mid, k) < target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Compressed probabilistic counting sketch.
///
/// Each item sets one bit in a `2^lg_k x 64` matrix. The matrix is kept sparse until it
/// fills past `3k/32` coupons, after which it is held as one word per row.
///
/// # Example
///
/// ```
/// use stream_sketches::CpcSketch;
///
/// let mut cpc = CpcSketch::new(11).unwrap();
/// for i in 0..10_000u64 {
///     cpc.update_u64(i);
/// }
/// assert!((cpc.estimate() - 10_000.0).abs() < 500.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpcSketch {
    lg_k: u8,
    num_coupons: u64,
    state: CpcState,
    kxp: f64,
    hip_est_accum: f64,
    /// Set on sketches produced by a union; HIP is then meaningless.
    merge_flag: bool,
}

impl Default for CpcSketch {
    fn default() -> Self {
        Self::with_lg_k(DEFAULT_LG_K)
    }
}

impl CpcSketch {
    pub fn new(lg_k: u8) -> Result<Self, SketchError> {
        check_lg_k(lg_k)?;
        Ok(Self::with_lg_k(lg_k))
    }

    fn with_lg_k(lg_k: u8) -> Self {
        Self {
            lg_k,
            num_coupons: 0,
            state: CpcState::Sparse(RoaringBitmap::new()),
            kxp: (1u64 << lg_k) as f64,
            hip_est_accum: 0.0,
            merge_flag: false,
        }
    }

    pub fn lg_k(&self) -> u8 {
        self.lg_k
    }

    pub fn num_coupons(&self) -> u64 {
        self.num_coupons
    }

    pub fn is_dense(&self) -> bool {
        matches!(self.state, CpcState::Dense(_))
    }

    pub fn update(&mut self, data: &[u8]) {
        let (h0, h1) = hashing::hash128(data, DEFAULT_SEED);
        let row = (h0 & ((1u64 << self.lg_k) - 1)) as u32;
        let col = h1.leading_zeros().min(NUM_COLUMNS - 1);
        if self.state.insert(row, col) {
            let k = (1u64 << self.lg_k) as f64;
            self.hip_est_accum += k / self.kxp;
            self.kxp -= (-((col + 1) as f64)).exp2();
            self.num_coupons += 1;
            self.maybe_promote();
        }
    }

    pub fn update_u64(&mut self, value: u64) {
        self.update(&value.to_ne_bytes());
    }

    fn maybe_promote(&mut self) {
        if let CpcState::Sparse(_) = self.state {
            if self.num_coupons >= dense_threshold(self.lg_k) {
                debug!(
                    lg_k = self.lg_k,
                    coupons = self.num_coupons,
                    "CPC sparse table promoted to dense"
                );
                self.state = CpcState::Dense(self.state.to_dense(self.lg_k));
            }
        }
    }

    /// Current cardinality estimate.
    pub fn estimate(&self) -> f64 {
        if self.merge_flag {
            icon_estimate(self.lg_k, self.num_coupons)
        } else {
            self.hip_est_accum
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.to_capnp_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, SketchError> {
        Self::from_capnp_bytes(bytes)
    }

    pub fn from_capnp_bytes(bytes: &[u8]) -> Result<Self, SketchError> {
        let (preamble, message) = codec::decode(bytes, Family::Cpc)?;
        let lg_k = preamble.lg_k;
        check_lg_k(lg_k).map_err(|e| SketchError::Deserialization(e.to_string()))?;
        let root = message.get_root::<cpc_capnp::cpc_sketch::Reader>()?;
        let k = 1usize << lg_k;

        let state = match preamble.kind {
            KIND_SPARSE => {
                let mut bitmap = RoaringBitmap::new();
                for coupon in root.get_coupons()?.iter() {
                    if (coupon >> COLUMN_BITS) as usize >= k {
                        return Err(SketchError::Deserialization(format!(
                            "Coupon row out of range: {}",
                            coupon >> COLUMN_BITS
                        )));
                    }
                    if !bitmap.insert(coupon) {
                        return Err(SketchError::Deserialization(format!(
                            "Duplicate coupon: {}",
                            coupon
                        )));
                    }
                }
                if bitmap.len() >= dense_threshold(lg_k) {
                    return Err(SketchError::Deserialization(format!(
                        "Sparse table holds {} coupons, dense from {}",
                        bitmap.len(),
                        dense_threshold(lg_k)
                    )));
                }
                CpcState::Sparse(bitmap)
            }
            KIND_DENSE => {
                let rows: Vec<u64> = root.get_rows()?.iter().collect();
                if rows.len() != k {
                    return Err(SketchError::Deserialization(format!(
                        "Invalid row count: expected {}, got {}",
                        k,
                        rows.len()
                    )));
                }
                CpcState::Dense(rows)
            }
            other => {
                return Err(SketchError::Deserialization(format!(
                    "Unknown CPC kind: {}",
                    other
                )))
            }
        };

        let num_coupons = root.get_num_coupons();
        if state.count() != num_coupons {
            return Err(SketchError::Deserialization(format!(
                "Coupon count mismatch: header says {}, table holds {}",
                num_coupons,
                state.count()
            )));
        }

        let (kxp, hip_est_accum) = (root.get_kxp(), root.get_hip_est_accum());
        if !(kxp.is_finite() && kxp >= 0.0 && hip_est_accum.is_finite() && hip_est_accum >= 0.0) {
            return Err(SketchError::Deserialization(format!(
                "Invalid CPC estimator state: kxp {}, hip {}",
                kxp, hip_est_accum
            )));
        }

        Ok(Self {
            lg_k,
            num_coupons,
            state,
            kxp,
            hip_est_accum,
            merge_flag: root.get_merge_flag(),
        })
    }
}

/// Union accumulator for CPC sketches.
///
/// The union only offers [`CpcUnion::update`] and [`CpcUnion::sketch`]; estimates come
/// from the materialized sketch. Inputs with a smaller `lg_k` shrink the union to
/// their resolution by folding rows.
#[derive(Debug, Clone)]
pub struct CpcUnion {
    lg_k: u8,
    state: CpcState,
}

impl Default for CpcUnion {
    fn default() -> Self {
        Self {
            lg_k: DEFAULT_LG_K,
            state: CpcState::Sparse(RoaringBitmap::new()),
        }
    }
}

impl CpcUnion {
    pub fn new(lg_k: u8) -> Result<Self, SketchError> {
        check_lg_k(lg_k)?;
        Ok(Self {
            lg_k,
            state: CpcState::Sparse(RoaringBitmap::new()),
        })
    }

    pub fn lg_k(&self) -> u8 {
        self.lg_k
    }

    /// Absorbs a sketch. The input is only read.
    pub fn update(&mut self, sketch: &CpcSketch) {
        if sketch.lg_k < self.lg_k {
            debug!(
                from = self.lg_k,
                to = sketch.lg_k,
                "CPC union rescaled to smaller lg_k"
            );
            self.reduce(sketch.lg_k);
        }
        let mask = (1u32 << self.lg_k) - 1;
        let state = &mut self.state;
        sketch.state.for_each(|row, col| {
            state.insert(row & mask, col);
        });
        if let CpcState::Sparse(_) = self.state {
            let count = self.state.count();
            if count >= dense_threshold(self.lg_k) {
                trace!(coupons = count, "CPC union accumulator promoted to dense");
                self.state = CpcState::Dense(self.state.to_dense(self.lg_k));
            }
        }
    }

    fn reduce(&mut self, lg_k: u8) {
        let mask = (1u32 << lg_k) - 1;
        let mut reduced = CpcState::Sparse(RoaringBitmap::new());
        self.state.for_each(|row, col| {
            reduced.insert(row & mask, col);
        });
        self.lg_k = lg_k;
        self.state = reduced;
        if self.state.count() >= dense_threshold(lg_k) {
            self.state = CpcState::Dense(self.state.to_dense(lg_k));
        }
    }

    /// Materializes the union as a sketch flagged as merged.
    pub fn sketch(&self) -> CpcSketch {
        let num_coupons = self.state.count();
        CpcSketch {
            lg_k: self.lg_k,
            num_coupons,
            state: self.state.clone(),
            kxp: compute_kxp(&self.state, self.lg_k),
            hip_est_accum: icon_estimate(self.lg_k, num_coupons),
            merge_flag: true,
        }
    }
}

pub struct CpcReader<'a> {
    bytes: &'a [u8],
}

impl<'a> CpcReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl<'a> SketchReader<'a> for CpcReader<'a> {
    fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    fn is_empty(&self) -> Result<bool, SketchError> {
        Ok(Preamble::parse_expecting(self.bytes, Family::Cpc)?.is_empty())
    }
}

impl Sketch for CpcSketch {
    type Reader<'a> = CpcReader<'a>;

    fn merge_from_readers(readers: &[Self::Reader<'_>]) -> Result<Self, SketchError> {
        let sketches = readers
            .iter()
            .map(|r| CpcSketch::from_capnp_bytes(r.bytes))
            .collect::<Result<Vec<_>, _>>()?;
        let lg_k = sketches
            .iter()
            .map(|s| s.lg_k)
            .min()
            .unwrap_or(DEFAULT_LG_K);
        let mut union = CpcUnion::new(lg_k)?;
        for sketch in &sketches {
            union.update(sketch);
        }
        Ok(union.sketch())
    }

    fn validate(&self) -> Result<(), SketchError> {
        check_lg_k(self.lg_k)?;
        if let CpcState::Dense(rows) = &self.state {
            if rows.len() != 1 << self.lg_k {
                return Err(SketchError::Configuration(format!(
                    "Invalid row count: expected {}, got {}",
                    1usize << self.lg_k,
                    rows.len()
                )));
            }
        }
        let mut row_ok = true;
        let k = 1u32 << self.lg_k;
        self.state.for_each(|row, _| row_ok &= row < k);
        if !row_ok {
            return Err(SketchError::Configuration(
                "Coupon row out of range".to_string(),
            ));
        }
        if self.state.count() != self.num_coupons {
            return Err(SketchError::Configuration(format!(
                "Coupon count mismatch: {} recorded, {} stored",
                self.num_coupons,
                self.state.count()
            )));
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.num_coupons == 0
    }

    fn to_capnp_bytes(&self) -> Vec<u8> {
        let mut message = Builder::new_default();
        let mut root = message.init_root::<cpc_capnp::cpc_sketch::Builder>();
        root.set_num_coupons(self.num_coupons);

        let kind = match &self.state {
            CpcState::Sparse(bitmap) => {
                let mut list = root.reborrow().init_coupons(bitmap.len() as u32);
                for (i, coupon) in bitmap.iter().enumerate() {
                    list.set(i as u32, coupon);
                }
                KIND_SPARSE
            }
            CpcState::Dense(rows) => {
                let mut list = root.reborrow().init_rows(rows.len() as u32);
                for (i, word) in rows.iter().enumerate() {
                    list.set(i as u32, *word);
                }
                KIND_DENSE
            }
        };
        root.set_kxp(self.kxp);
        root.set_hip_est_accum(self.hip_est_accum);
        root.set_merge_flag(self.merge_flag);

        let preamble = Preamble::new(Family::Cpc)
            .with_lg_k(self.lg_k)
            .with_kind(kind)
            .empty(self.num_coupons == 0);
        codec::encode(preamble, &message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(lg_k: u8, range: std::ops::Range<u64>) -> CpcSketch {
        let mut cpc = CpcSketch::new(lg_k).unwrap();
        for i in range {
            cpc.update_u64(i);
        }
        cpc
    }

    #[test]
    fn test_rejects_bad_lg_k() {
        assert!(matches!(CpcSketch::new(3), Err(SketchError::Configuration(_))));
        assert!(CpcSketch::new(27).is_err());
        assert!(CpcUnion::new(30).is_err());
    }

    #[test]
    fn test_sparse_to_dense_keeps_estimate() {
        let mut cpc = CpcSketch::new(10).unwrap();
        let threshold = dense_threshold(10);
        let mut i = 0u64;
        while cpc.num_coupons() + 1 < threshold {
            cpc.update_u64(i);
            i += 1;
        }
        assert!(!cpc.is_dense());
        let before = cpc.state.to_dense(10);
        while !cpc.is_dense() {
            cpc.update_u64(i);
            i += 1;
        }
        match &cpc.state {
            CpcState::Dense(rows) => {
                for (old, new) in before.iter().zip(rows) {
                    assert_eq!(old & new, *old);
                }
            }
            CpcState::Sparse(_) => unreachable!(),
        }
        assert_eq!(cpc.state.count(), cpc.num_coupons());
    }

    #[test]
    fn test_estimate_accuracy() {
        for n in [10u64, 1_000, 100_000] {
            let cpc = filled(11, 0..n);
            let rel = (cpc.estimate() - n as f64).abs() / n as f64;
            assert!(rel < 0.05, "n = {}, estimate = {}", n, cpc.estimate());
        }
    }

    #[test]
    fn test_round_trip_sparse_and_dense() {
        for n in [0u64, 20, 50_000] {
            let cpc = filled(11, 0..n);
            let restored = CpcSketch::deserialize(&cpc.serialize()).unwrap();
            assert_eq!(restored, cpc);
            assert_eq!(restored.estimate(), cpc.estimate());
        }
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(CpcSketch::deserialize(&[8, 1, 16, 11]).is_err());
        let mut bytes = filled(11, 0..10).serialize();
        bytes[1] = 9;
        assert!(matches!(
            CpcSketch::deserialize(&bytes),
            Err(SketchError::Deserialization(_))
        ));
    }

    #[test]
    fn test_union_of_overlapping_sketches() {
        let a = filled(11, 0..60_000);
        let b = filled(11, 30_000..90_000);
        let mut union = CpcUnion::new(11).unwrap();
        union.update(&a);
        union.update(&b);
        let result = union.sketch();
        let rel = (result.estimate() - 90_000.0).abs() / 90_000.0;
        assert!(rel < 0.06, "estimate = {}", result.estimate());
    }

    #[test]
    fn test_union_rescales_to_smaller_lg_k() {
        let a = filled(12, 0..20_000);
        let b = filled(10, 20_000..40_000);
        let mut union = CpcUnion::new(12).unwrap();
        union.update(&a);
        union.update(&b);
        let result = union.sketch();
        assert_eq!(result.lg_k(), 10);
        let rel = (result.estimate() - 40_000.0).abs() / 40_000.0;
        assert!(rel < 0.1, "estimate = {}", result.estimate());
    }

    #[test]
    fn test_union_result_is_flagged_merged() {
        let a = filled(11, 0..100);
        let mut union = CpcUnion::default();
        union.update(&a);
        let result = union.sketch();
        assert!(result.merge_flag);
        assert!((result.estimate() - 100.0).abs() < 5.0);
    }

    fn sparse_buffer(num_coupons: u64, coupons: &[u32]) -> Vec<u8> {
        let mut message = Builder::new_default();
        let mut root = message.init_root::<cpc_capnp::cpc_sketch::Builder>();
        root.set_num_coupons(num_coupons);
        root.set_kxp(1024.0);
        {
            let mut list = root.reborrow().init_coupons(coupons.len() as u32);
            for (i, &c) in coupons.iter().enumerate() {
                list.set(i as u32, c);
            }
        }
        let preamble = Preamble::new(Family::Cpc)
            .with_lg_k(10)
            .with_kind(KIND_SPARSE)
            .empty(coupons.is_empty());
        codec::encode(preamble, &message)
    }

    #[test]
    fn test_deserialize_rejects_inconsistent_body() {
        let coupon = (5 << COLUMN_BITS) | 3;
        assert!(CpcSketch::deserialize(&sparse_buffer(1, &[coupon])).is_ok());
        // Duplicates.
        assert!(matches!(
            CpcSketch::deserialize(&sparse_buffer(2, &[coupon, coupon])),
            Err(SketchError::Deserialization(_))
        ));
        // Header count disagrees with the table.
        assert!(CpcSketch::deserialize(&sparse_buffer(4, &[coupon])).is_err());
        // Row beyond 2^lg_k.
        assert!(CpcSketch::deserialize(&sparse_buffer(1, &[1024 << COLUMN_BITS])).is_err());
        // Sparse table past the dense threshold.
        let many: Vec<u32> = (0..dense_threshold(10) as u32).collect();
        assert!(CpcSketch::deserialize(&sparse_buffer(many.len() as u64, &many)).is_err());
    }
}
