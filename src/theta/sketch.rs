// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use crate::codec::{self, Family, Preamble};
use crate::hashing::{self, DEFAULT_SEED};
use crate::theta::union::ThetaUnion;
use crate::theta_capnp;
use crate::traits::{Sketch, SketchError, SketchReader};
use capnp::message::Builder;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

pub const MIN_LG_K: u8 = 5;
pub const MAX_LG_K: u8 = 26;
pub const DEFAULT_LG_K: u8 = 12;

/// Theta of an untouched sketch; retained hashes are always below it.
pub const MAX_THETA: u64 = i64::MAX as u64;

const MIN_LG_TABLE: u8 = 5;
const RESIZE_LOAD: f64 = 0.5;
const REBUILD_LOAD: f64 = 15.0 / 16.0;

pub(crate) fn check_lg_k(lg_k: u8) -> Result<(), SketchError> {
    if !(MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
        return Err(SketchError::Configuration(format!(
            "Theta lg_k must be in [{}, {}], got {}",
            MIN_LG_K, MAX_LG_K, lg_k
        )));
    }
    Ok(())
}

pub(crate) fn estimate_of(num_retained: usize, theta: u64) -> f64 {
    num_retained as f64 / (theta as f64 / MAX_THETA as f64)
}

/// Open-addressing table of 63-bit hashes. Zero marks an empty slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct HashTable {
    lg_nom_size: u8,
    lg_cur_size: u8,
    theta: u64,
    slots: Vec<u64>,
    num_entries: usize,
}

impl HashTable {
    pub(crate) fn new(lg_nom_size: u8, theta: u64) -> Self {
        let lg_cur_size = MIN_LG_TABLE.min(lg_nom_size + 1);
        Self {
            lg_nom_size,
            lg_cur_size,
            theta,
            slots: vec![0; 1 << lg_cur_size],
            num_entries: 0,
        }
    }

    pub(crate) fn theta(&self) -> u64 {
        self.theta
    }

    pub(crate) fn num_entries(&self) -> usize {
        self.num_entries
    }

    fn capacity(&self) -> usize {
        let load = if self.lg_cur_size <= self.lg_nom_size {
            RESIZE_LOAD
        } else {
            REBUILD_LOAD
        };
        ((1usize << self.lg_cur_size) as f64 * load) as usize
    }

    fn find(&self, hash: u64) -> (usize, bool) {
        let mask = self.slots.len() - 1;
        let mut idx = hash as usize & mask;
        loop {
            match self.slots[idx] {
                0 => return (idx, false),
                h if h == hash => return (idx, true),
                _ => idx = (idx + 1) & mask,
            }
        }
    }

    /// Inserts a hash below theta. Returns true if it was new.
    pub(crate) fn insert(&mut self, hash: u64) -> bool {
        if hash == 0 || hash >= self.theta {
            return false;
        }
        let (idx, found) = self.find(hash);
        if found {
            return false;
        }
        self.slots[idx] = hash;
        self.num_entries += 1;
        if self.num_entries > self.capacity() {
            if self.lg_cur_size <= self.lg_nom_size {
                self.resize(self.lg_cur_size + 1);
            } else {
                self.rebuild();
            }
        }
        true
    }

    fn reinsert_all(&mut self, entries: Vec<u64>, lg_size: u8) {
        self.lg_cur_size = lg_size;
        self.slots = vec![0; 1 << lg_size];
        self.num_entries = 0;
        for hash in entries {
            let (idx, _) = self.find(hash);
            self.slots[idx] = hash;
            self.num_entries += 1;
        }
    }

    fn resize(&mut self, lg_size: u8) {
        trace!(from = self.lg_cur_size, to = lg_size, "Theta table resized");
        let entries = self.entries();
        self.reinsert_all(entries, lg_size);
    }

    /// Keeps the `k` smallest hashes; theta drops to the next one.
    fn rebuild(&mut self) {
        let k = 1usize << self.lg_nom_size;
        let mut entries = self.entries();
        let (_, &mut kth, _) = entries.select_nth_unstable(k);
        self.theta = kth;
        entries.truncate(k);
        debug!(
            theta = self.theta,
            retained = entries.len(),
            "Theta table rebuilt"
        );
        self.reinsert_all(entries, self.lg_cur_size);
    }

    /// Retained hashes in table order.
    pub(crate) fn entries(&self) -> Vec<u64> {
        self.slots.iter().copied().filter(|&h| h != 0).collect()
    }
}

/// Builder for [`UpdateThetaSketch`].
#[derive(Debug, Clone)]
pub struct UpdateThetaSketchBuilder {
    lg_k: u8,
    p: f32,
    seed: u64,
}

impl Default for UpdateThetaSketchBuilder {
    fn default() -> Self {
        Self {
            lg_k: DEFAULT_LG_K,
            p: 1.0,
            seed: DEFAULT_SEED,
        }
    }
}

impl UpdateThetaSketchBuilder {
    pub fn lg_k(mut self, lg_k: u8) -> Self {
        self.lg_k = lg_k;
        self
    }

    /// Up-front sampling probability; theta starts at `p * MAX_THETA`.
    pub fn sampling_probability(mut self, p: f32) -> Self {
        self.p = p;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> Result<UpdateThetaSketch, SketchError> {
        check_lg_k(self.lg_k)?;
        if !(self.p > 0.0 && self.p <= 1.0) {
            return Err(SketchError::Configuration(format!(
                "Sampling probability must be in (0, 1], got {}",
                self.p
            )));
        }
        let theta = if self.p < 1.0 {
            (MAX_THETA as f64 * self.p as f64) as u64
        } else {
            MAX_THETA
        };
        Ok(UpdateThetaSketch {
            seed: self.seed,
            p: self.p,
            is_empty: true,
            table: HashTable::new(self.lg_k, theta),
        })
    }
}

/// Mutable theta sketch.
///
/// Freeze it with [`UpdateThetaSketch::compact`] before handing it to a set operation.
///
/// # Example
///
/// ```
/// use stream_sketches::UpdateThetaSketch;
///
/// let mut theta = UpdateThetaSketch::builder().lg_k(10).build().unwrap();
/// for i in 0..100u64 {
///     theta.update_u64(i);
/// }
/// assert_eq!(theta.estimate(), 100.0);
/// let compact = theta.compact();
/// assert_eq!(compact.num_retained(), 100);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateThetaSketch {
    seed: u64,
    p: f32,
    is_empty: bool,
    table: HashTable,
}

impl Default for UpdateThetaSketch {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            p: 1.0,
            is_empty: true,
            table: HashTable::new(DEFAULT_LG_K, MAX_THETA),
        }
    }
}

impl UpdateThetaSketch {
    pub fn builder() -> UpdateThetaSketchBuilder {
        UpdateThetaSketchBuilder::default()
    }

    /// A sketch with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lg_k(&self) -> u8 {
        self.table.lg_nom_size
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn update(&mut self, data: &[u8]) {
        self.is_empty = false;
        let (h0, _) = hashing::hash128(data, self.seed);
        self.table.insert(h0 >> 1);
    }

    pub fn update_u64(&mut self, value: u64) {
        self.update(&value.to_ne_bytes());
    }

    pub fn is_empty(&self) -> bool {
        self.is_empty
    }

    pub fn theta64(&self) -> u64 {
        self.table.theta()
    }

    /// Theta as a fraction of the hash space.
    pub fn theta(&self) -> f64 {
        self.table.theta() as f64 / MAX_THETA as f64
    }

    pub fn is_estimation_mode(&self) -> bool {
        self.table.theta() < MAX_THETA
    }

    pub fn num_retained(&self) -> usize {
        self.table.num_entries()
    }

    pub fn estimate(&self) -> f64 {
        estimate_of(self.table.num_entries(), self.table.theta())
    }

    /// Freezes the current state into a sorted, immutable sketch.
    pub fn compact(&self) -> CompactThetaSketch {
        let theta = if self.is_empty {
            MAX_THETA
        } else {
            self.table.theta()
        };
        let mut entries = self.table.entries();
        entries.sort_unstable();
        CompactThetaSketch {
            theta,
            seed_hash: hashing::compute_seed_hash(self.seed),
            entries,
            is_empty: self.is_empty,
        }
    }

    /// Alias of [`UpdateThetaSketch::compact`].
    pub fn as_static(&self) -> CompactThetaSketch {
        self.compact()
    }
}

/// Immutable theta sketch: sorted retained hashes plus theta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactThetaSketch {
    pub(crate) theta: u64,
    pub(crate) seed_hash: u16,
    pub(crate) entries: Vec<u64>,
    pub(crate) is_empty: bool,
}

impl CompactThetaSketch {
    /// Builds a compact sketch from hashes below `theta`, sorting them.
    pub(crate) fn from_parts(
        theta: u64,
        seed_hash: u16,
        mut entries: Vec<u64>,
        is_empty: bool,
    ) -> Self {
        entries.sort_unstable();
        Self {
            theta,
            seed_hash,
            entries,
            is_empty,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.is_empty
    }

    pub fn theta64(&self) -> u64 {
        self.theta
    }

    pub fn theta(&self) -> f64 {
        self.theta as f64 / MAX_THETA as f64
    }

    pub fn seed_hash(&self) -> u16 {
        self.seed_hash
    }

    pub fn num_retained(&self) -> usize {
        self.entries.len()
    }

    pub fn is_estimation_mode(&self) -> bool {
        self.theta < MAX_THETA
    }

    /// Retained hashes in ascending order.
    pub fn entries(&self) -> &[u64] {
        &self.entries
    }

    pub fn estimate(&self) -> f64 {
        estimate_of(self.entries.len(), self.theta)
    }

    pub(crate) fn check_seed(&self, seed_hash: u16) -> Result<(), SketchError> {
        if self.seed_hash != seed_hash {
            return Err(SketchError::IncompatibleOperand(format!(
                "Seed hash mismatch: {} vs {}",
                self.seed_hash, seed_hash
            )));
        }
        Ok(())
    }

    /// Items in this sketch that are not in `other`.
    pub fn set_difference(&self, other: &CompactThetaSketch) -> Result<Self, SketchError> {
        crate::theta::ThetaANotB::compute(self, other)
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.to_capnp_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, SketchError> {
        Self::from_capnp_bytes(bytes)
    }

    pub fn from_capnp_bytes(bytes: &[u8]) -> Result<Self, SketchError> {
        let (preamble, message) = codec::decode(bytes, Family::CompactTheta)?;
        let root = message.get_root::<theta_capnp::compact_theta::Reader>()?;
        let sketch = Self {
            theta: root.get_theta(),
            seed_hash: root.get_seed_hash(),
            entries: root.get_entries()?.iter().collect(),
            is_empty: preamble.is_empty(),
        };
        sketch
            .validate()
            .map_err(|e| SketchError::Deserialization(e.to_string()))?;
        Ok(sketch)
    }
}

pub struct CompactThetaReader<'a> {
    bytes: &'a [u8],
}

impl<'a> CompactThetaReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl<'a> SketchReader<'a> for CompactThetaReader<'a> {
    fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    fn is_empty(&self) -> Result<bool, SketchError> {
        Ok(Preamble::parse_expecting(self.bytes, Family::CompactTheta)?.is_empty())
    }
}

impl Sketch for CompactThetaSketch {
    type Reader<'a> = CompactThetaReader<'a>;

    fn merge_from_readers(readers: &[Self::Reader<'_>]) -> Result<Self, SketchError> {
        let sketches = readers
            .iter()
            .map(|r| CompactThetaSketch::from_capnp_bytes(r.bytes))
            .collect::<Result<Vec<_>, _>>()?;
        let mut union = match sketches.first() {
            Some(first) => ThetaUnion::with_seed_hash(MAX_LG_K, first.seed_hash)?,
            None => ThetaUnion::new(DEFAULT_LG_K)?,
        };
        for sketch in &sketches {
            union.update(sketch)?;
        }
        Ok(union.sketch())
    }

    fn validate(&self) -> Result<(), SketchError> {
        if self.theta == 0 || self.theta > MAX_THETA {
            return Err(SketchError::Configuration(format!(
                "Theta out of range: {}",
                self.theta
            )));
        }
        if self.entries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SketchError::Configuration(
                "Compact entries must be strictly ascending".to_string(),
            ));
        }
        if self.entries.first() == Some(&0) || self.entries.last().is_some_and(|&h| h >= self.theta)
        {
            return Err(SketchError::Configuration(
                "Compact entries must lie in (0, theta)".to_string(),
            ));
        }
        if self.is_empty && (!self.entries.is_empty() || self.theta != MAX_THETA) {
            return Err(SketchError::Configuration(
                "Empty sketch carries entries or a reduced theta".to_string(),
            ));
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.is_empty
    }

    fn to_capnp_bytes(&self) -> Vec<u8> {
        let mut message = Builder::new_default();
        let mut root = message.init_root::<theta_capnp::compact_theta::Builder>();
        root.set_theta(self.theta);
        root.set_seed_hash(self.seed_hash);
        let mut list = root.reborrow().init_entries(self.entries.len() as u32);
        for (i, &hash) in self.entries.iter().enumerate() {
            list.set(i as u32, hash);
        }
        let preamble = Preamble::new(Family::CompactTheta).empty(self.is_empty);
        codec::encode(preamble, &message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(lg_k: u8, range: std::ops::Range<u64>) -> UpdateThetaSketch {
        let mut sketch = UpdateThetaSketch::builder().lg_k(lg_k).build().unwrap();
        for i in range {
            sketch.update_u64(i);
        }
        sketch
    }

    #[test]
    fn test_builder_validates() {
        assert!(UpdateThetaSketch::builder().lg_k(4).build().is_err());
        assert!(UpdateThetaSketch::builder().lg_k(27).build().is_err());
        assert!(UpdateThetaSketch::builder()
            .sampling_probability(0.0)
            .build()
            .is_err());
        assert!(UpdateThetaSketch::builder()
            .sampling_probability(1.5)
            .build()
            .is_err());
    }

    #[test]
    fn test_exact_mode() {
        let sketch = filled(10, 0..500);
        assert!(!sketch.is_estimation_mode());
        assert_eq!(sketch.estimate(), 500.0);
        assert_eq!(sketch.num_retained(), 500);
    }

    #[test]
    fn test_estimation_mode_keeps_entries_below_theta() {
        let sketch = filled(9, 0..50_000);
        assert!(sketch.is_estimation_mode());
        let theta = sketch.theta64();
        assert!(sketch.table.entries().iter().all(|&h| h < theta));
        assert!(sketch.num_retained() <= 2 << 9);
        let rel = (sketch.estimate() - 50_000.0).abs() / 50_000.0;
        assert!(rel < 0.15, "estimate = {}", sketch.estimate());
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let mut sketch = filled(10, 0..100);
        for i in 0..100 {
            sketch.update_u64(i);
        }
        assert_eq!(sketch.num_retained(), 100);
    }

    #[test]
    fn test_sampling_probability_starts_theta_low() {
        let sketch = UpdateThetaSketch::builder()
            .sampling_probability(0.5)
            .build()
            .unwrap();
        assert!(sketch.is_empty());
        assert!((sketch.theta() - 0.5).abs() < 1e-6);
        let compact = sketch.compact();
        assert_eq!(compact.theta64(), MAX_THETA);
        assert_eq!(compact.estimate(), 0.0);
    }

    #[test]
    fn test_compact_is_sorted_and_round_trips() {
        let compact = filled(8, 0..10_000).compact();
        assert!(compact.entries().windows(2).all(|w| w[0] < w[1]));
        let restored = CompactThetaSketch::deserialize(&compact.serialize()).unwrap();
        assert_eq!(restored, compact);
        assert_eq!(restored.estimate(), compact.estimate());
    }

    #[test]
    fn test_deserialize_rejects_entries_above_theta() {
        let mut compact = filled(8, 0..10_000).compact();
        compact.theta = compact.entries[0];
        assert!(matches!(
            CompactThetaSketch::deserialize(&compact.serialize()),
            Err(SketchError::Deserialization(_))
        ));
    }

    #[test]
    fn test_update_bytes_matches_update_u64() {
        let mut a = UpdateThetaSketch::new();
        let mut b = UpdateThetaSketch::new();
        a.update_u64(7);
        b.update(&7u64.to_ne_bytes());
        assert_eq!(a, b);
    }

    #[test]
    fn test_deserialize_rejects_inconsistent_entries() {
        let compact = filled(8, 0..100).compact();
        let encode = |entries: Vec<u64>, is_empty: bool| {
            CompactThetaSketch {
                entries,
                is_empty,
                ..compact.clone()
            }
            .to_capnp_bytes()
        };
        let mut unsorted = compact.entries.clone();
        unsorted.swap(0, 1);
        assert!(CompactThetaSketch::deserialize(&encode(unsorted, false)).is_err());

        let mut doubled = compact.entries.clone();
        doubled[1] = doubled[0];
        assert!(CompactThetaSketch::deserialize(&encode(doubled, false)).is_err());

        let mut with_zero = compact.entries.clone();
        with_zero[0] = 0;
        assert!(CompactThetaSketch::deserialize(&encode(with_zero, false)).is_err());

        assert!(matches!(
            CompactThetaSketch::deserialize(&encode(compact.entries.clone(), true)),
            Err(SketchError::Deserialization(_))
        ));
    }
}
