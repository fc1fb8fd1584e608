// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use crate::codec::{self, Family, Preamble};
use crate::frequent_items_capnp;
use crate::traits::{Sketch, SketchError, SketchReader};
use capnp::message::Builder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;
use std::borrow::Borrow;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use tracing::{debug, trace};

pub const LG_MIN_MAP_SIZE: u8 = 3;
pub const LG_MAX_MAP_SIZE: u8 = 26;

/// Number of counts sampled to pick the purge median.
const PURGE_SAMPLE_SIZE: usize = 1024;

/// Items the sketch can track.
pub trait FrequentItem:
    Hash + Eq + Clone + Debug + Serialize + DeserializeOwned + Send + Sync
{
}

impl<T> FrequentItem for T where
    T: Hash + Eq + Clone + Debug + Serialize + DeserializeOwned + Send + Sync
{
}

/// One answer row of a frequent-items query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequentItemsRow<T> {
    pub item: T,
    pub estimate: u64,
    pub lower_bound: u64,
    pub upper_bound: u64,
}

fn map_capacity(lg_size: u8) -> usize {
    (1usize << lg_size) * 3 / 4
}

/// Frequent items (heavy hitters) sketch with weighted updates.
///
/// Counts live in an open-addressing table that doubles up to `2^lg_max_map_size`
/// slots. Once full, the median of a sample of counts is subtracted from every count,
/// entries that drop to zero are evicted, and the median is added to `offset`, which
/// bounds the error of every estimate.
///
/// # Example
///
/// ```
/// use stream_sketches::FrequentItemsSketch;
///
/// let mut sketch = FrequentItemsSketch::<String>::new(6).unwrap();
/// for i in 0..1000 {
///     sketch.update("hot", 1);
///     sketch.update(&format!("cold-{}", i), 1);
/// }
/// let rows = sketch.estimate_no_fp();
/// assert_eq!(rows[0].item, "hot");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequentItemsSketch<T> {
    lg_max_map_size: u8,
    lg_cur_map_size: u8,
    total_weight: u64,
    offset: u64,
    hash_seed: u64,
    num_active: usize,
    keys: Vec<Option<T>>,
    counts: Vec<u64>,
}

impl<T: FrequentItem> PartialEq for FrequentItemsSketch<T> {
    fn eq(&self, other: &Self) -> bool {
        self.lg_max_map_size == other.lg_max_map_size
            && self.total_weight == other.total_weight
            && self.offset == other.offset
            && self.hash_seed == other.hash_seed
            && self.keys == other.keys
            && self.counts == other.counts
    }
}

impl<T: FrequentItem> FrequentItemsSketch<T> {
    /// Creates a sketch tracking at most `0.75 * 2^lg_max_map_size` items.
    pub fn new(lg_max_map_size: u8) -> Result<Self, SketchError> {
        Self::with_hash_seed(lg_max_map_size, 0)
    }

    pub fn with_hash_seed(lg_max_map_size: u8, hash_seed: u64) -> Result<Self, SketchError> {
        if !(LG_MIN_MAP_SIZE..=LG_MAX_MAP_SIZE).contains(&lg_max_map_size) {
            return Err(SketchError::Configuration(format!(
                "lg_max_map_size must be in [{}, {}], got {}",
                LG_MIN_MAP_SIZE, LG_MAX_MAP_SIZE, lg_max_map_size
            )));
        }
        let lg_cur_map_size = LG_MIN_MAP_SIZE;
        Ok(Self {
            lg_max_map_size,
            lg_cur_map_size,
            total_weight: 0,
            offset: 0,
            hash_seed,
            num_active: 0,
            keys: vec![None; 1 << lg_cur_map_size],
            counts: vec![0; 1 << lg_cur_map_size],
        })
    }

    pub fn lg_max_map_size(&self) -> u8 {
        self.lg_max_map_size
    }

    pub fn is_empty(&self) -> bool {
        self.num_active == 0
    }

    pub fn num_active_items(&self) -> usize {
        self.num_active
    }

    pub fn get_total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Weight subtracted from every count by purges so far.
    pub fn get_offset(&self) -> u64 {
        self.offset
    }

    /// Upper bound on the error of any estimate.
    pub fn get_maximum_error(&self) -> u64 {
        self.offset
    }

    /// Restores externally checkpointed bookkeeping.
    pub fn set_weights(&mut self, total_weight: u64, offset: u64) {
        self.total_weight = total_weight;
        self.offset = offset;
    }

    fn hash_of<Q: Hash + ?Sized>(&self, item: &Q) -> u64 {
        let mut hasher = SipHasher13::new_with_keys(self.hash_seed, 0);
        item.hash(&mut hasher);
        hasher.finish()
    }

    /// Slot holding `item`, or the empty slot where it would go.
    fn probe<Q>(&self, item: &Q) -> usize
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mask = self.keys.len() - 1;
        let mut idx = self.hash_of(item) as usize & mask;
        while let Some(key) = &self.keys[idx] {
            let key: &Q = key.borrow();
            if key == item {
                break;
            }
            idx = (idx + 1) & mask;
        }
        idx
    }

    fn count_of<Q>(&self, item: &Q) -> Option<u64>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.probe(item);
        self.keys[idx].as_ref().map(|_| self.counts[idx])
    }

    /// Adds `weight` to `item`. A zero weight is ignored.
    pub fn update<Q>(&mut self, item: &Q, weight: u64)
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = T> + ?Sized,
    {
        if weight == 0 {
            return;
        }
        self.total_weight = self.total_weight.saturating_add(weight);
        self.add_count(item, weight);
    }

    fn add_count<Q>(&mut self, item: &Q, weight: u64)
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = T> + ?Sized,
    {
        let idx = self.probe(item);
        if self.keys[idx].is_some() {
            self.counts[idx] = self.counts[idx].saturating_add(weight);
            return;
        }
        self.keys[idx] = Some(Q::to_owned(item));
        self.counts[idx] = weight;
        self.num_active += 1;

        if self.num_active > map_capacity(self.lg_cur_map_size) {
            if self.lg_cur_map_size < self.lg_max_map_size {
                self.resize(self.lg_cur_map_size + 1);
            } else {
                self.offset = self.offset.saturating_add(self.purge());
            }
        }
    }

    fn active(&self) -> impl Iterator<Item = (&T, u64)> {
        self.keys
            .iter()
            .zip(&self.counts)
            .filter_map(|(key, &count)| key.as_ref().map(|k| (k, count)))
    }

    /// Rebuilds the table at `lg_size`, keeping entries with a positive count.
    fn rebuild(&mut self, lg_size: u8) {
        let keys = std::mem::replace(&mut self.keys, vec![None; 1 << lg_size]);
        let counts = std::mem::replace(&mut self.counts, vec![0; 1 << lg_size]);
        self.lg_cur_map_size = lg_size;
        self.num_active = 0;
        for (key, count) in keys.into_iter().zip(counts) {
            if let Some(key) = key {
                if count > 0 {
                    let idx = self.probe(&key);
                    self.keys[idx] = Some(key);
                    self.counts[idx] = count;
                    self.num_active += 1;
                }
            }
        }
    }

    fn resize(&mut self, lg_size: u8) {
        debug!(
            from = self.lg_cur_map_size,
            to = lg_size,
            "Frequent items map grew"
        );
        self.rebuild(lg_size);
    }

    /// Subtracts the sampled median from every count; returns the median.
    fn purge(&mut self) -> u64 {
        let mut samples: Vec<u64> = self
            .active()
            .map(|(_, count)| count)
            .take(PURGE_SAMPLE_SIZE)
            .collect();
        let mid = samples.len() / 2;
        let (_, &mut median, _) = samples.select_nth_unstable(mid);
        for count in self.counts.iter_mut() {
            *count = count.saturating_sub(median);
        }
        self.rebuild(self.lg_cur_map_size);
        trace!(
            median,
            remaining = self.num_active,
            "Frequent items map purged"
        );
        median
    }

    /// Best estimate: the tracked count plus the offset, or 0 if untracked.
    pub fn estimate<Q>(&self, item: &Q) -> u64
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.count_of(item).map_or(0, |c| c.saturating_add(self.offset))
    }

    pub fn lower_bound<Q>(&self, item: &Q) -> u64
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.count_of(item).unwrap_or(0)
    }

    pub fn upper_bound<Q>(&self, item: &Q) -> u64
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.count_of(item).unwrap_or(0).saturating_add(self.offset)
    }

    fn rows(&self, keep: impl Fn(u64, u64) -> bool) -> Vec<FrequentItemsRow<T>> {
        let mut rows: Vec<FrequentItemsRow<T>> = self
            .active()
            .filter(|&(_, count)| keep(count, count.saturating_add(self.offset)))
            .map(|(item, count)| FrequentItemsRow {
                item: item.clone(),
                estimate: count.saturating_add(self.offset),
                lower_bound: count,
                upper_bound: count.saturating_add(self.offset),
            })
            .collect();
        rows.sort_by(|a, b| b.estimate.cmp(&a.estimate));
        rows
    }

    /// Items whose lower bound exceeds the maximum error: no false positives.
    pub fn estimate_no_fp(&self) -> Vec<FrequentItemsRow<T>> {
        let threshold = self.get_maximum_error();
        self.rows(|lower, _| lower > threshold)
    }

    /// Items whose upper bound exceeds the maximum error: no false negatives.
    pub fn estimate_no_fn(&self) -> Vec<FrequentItemsRow<T>> {
        let threshold = self.get_maximum_error();
        self.rows(|_, upper| upper > threshold)
    }

    /// Every tracked item.
    pub fn state(&self) -> Vec<FrequentItemsRow<T>> {
        self.rows(|_, _| true)
    }

    /// Folds `other` into this sketch.
    pub fn merge(&mut self, other: &FrequentItemsSketch<T>) {
        if other.is_empty() && other.offset == 0 {
            self.total_weight = self.total_weight.saturating_add(other.total_weight);
            return;
        }
        let merged_total = self.total_weight.saturating_add(other.total_weight);
        for (item, count) in other.active() {
            self.add_count(item, count);
        }
        self.offset = self.offset.saturating_add(other.offset);
        self.total_weight = merged_total;
    }

    pub fn serialize(&self) -> Result<Vec<u8>, SketchError> {
        let mut message = Builder::new_default();
        let mut root = message.init_root::<frequent_items_capnp::frequent_items::Builder>();
        root.set_lg_cur_map_size(self.lg_cur_map_size);
        root.set_total_weight(self.total_weight);
        root.set_offset(self.offset);
        root.set_hash_seed(self.hash_seed);

        let encoded = self
            .keys
            .iter()
            .enumerate()
            .filter_map(|(slot, key)| key.as_ref().map(|k| (slot, k)))
            .map(|(slot, key)| {
                bincode::serialize(key)
                    .map(|bytes| (slot, bytes))
                    .map_err(|e| SketchError::Serialization(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        {
            let mut slots = root.reborrow().init_slots(encoded.len() as u32);
            for (i, (slot, _)) in encoded.iter().enumerate() {
                slots.set(i as u32, *slot as u32);
            }
        }
        {
            let mut items = root.reborrow().init_items(encoded.len() as u32);
            for (i, (_, bytes)) in encoded.iter().enumerate() {
                items.set(i as u32, bytes);
            }
        }
        {
            let mut counts = root.reborrow().init_counts(encoded.len() as u32);
            for (i, (slot, _)) in encoded.iter().enumerate() {
                counts.set(i as u32, self.counts[*slot]);
            }
        }

        let preamble = Preamble::new(Family::FrequentItems)
            .with_lg_k(self.lg_max_map_size)
            .empty(self.is_empty());
        Ok(codec::encode(preamble, &message))
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, SketchError> {
        Self::from_capnp_bytes(bytes)
    }

    pub fn from_capnp_bytes(bytes: &[u8]) -> Result<Self, SketchError> {
        let (preamble, message) = codec::decode(bytes, Family::FrequentItems)?;
        let root = message.get_root::<frequent_items_capnp::frequent_items::Reader>()?;
        let mut sketch = Self::with_hash_seed(preamble.lg_k, root.get_hash_seed())
            .map_err(|e| SketchError::Deserialization(e.to_string()))?;

        let lg_cur = root.get_lg_cur_map_size();
        if !(LG_MIN_MAP_SIZE..=sketch.lg_max_map_size).contains(&lg_cur) {
            return Err(SketchError::Deserialization(format!(
                "Invalid current map size: {}",
                lg_cur
            )));
        }
        sketch.lg_cur_map_size = lg_cur;
        sketch.keys = vec![None; 1 << lg_cur];
        sketch.counts = vec![0; 1 << lg_cur];

        let slots = root.get_slots()?;
        let items = root.get_items()?;
        let counts = root.get_counts()?;
        if slots.len() != items.len() || slots.len() != counts.len() {
            return Err(SketchError::Deserialization(
                "Slot, item and count lists differ in length".to_string(),
            ));
        }
        if slots.len() as usize > map_capacity(lg_cur) {
            return Err(SketchError::Deserialization(format!(
                "Too many items for map size: {}",
                slots.len()
            )));
        }
        for i in 0..slots.len() {
            let slot = slots.get(i) as usize;
            let count = counts.get(i);
            if slot >= sketch.keys.len() || sketch.keys[slot].is_some() || count == 0 {
                return Err(SketchError::Deserialization(format!(
                    "Invalid slot entry: {}",
                    slot
                )));
            }
            let item: T = bincode::deserialize(items.get(i)?)?;
            sketch.keys[slot] = Some(item);
            sketch.counts[slot] = count;
            sketch.num_active += 1;
        }
        let misplaced = sketch
            .keys
            .iter()
            .enumerate()
            .filter_map(|(slot, key)| key.as_ref().map(|k| (slot, k)))
            .any(|(slot, key)| sketch.probe(key) != slot);
        if misplaced {
            return Err(SketchError::Deserialization(
                "Items are not reachable from their hash slots".to_string(),
            ));
        }
        let total_weight = root.get_total_weight();
        let offset = root.get_offset();
        let retained = sketch
            .counts
            .iter()
            .fold(0u64, |acc, &c| acc.saturating_add(c));
        if offset > total_weight || retained > total_weight {
            return Err(SketchError::Deserialization(format!(
                "Counts and offset {} exceed total weight {}",
                offset, total_weight
            )));
        }
        sketch.total_weight = total_weight;
        sketch.offset = offset;
        Ok(sketch)
    }
}

pub struct FrequentItemsReader<'a> {
    bytes: &'a [u8],
}

impl<'a> FrequentItemsReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn lg_max_map_size(&self) -> Result<u8, SketchError> {
        Ok(Preamble::parse_expecting(self.bytes, Family::FrequentItems)?.lg_k)
    }
}

impl<'a> SketchReader<'a> for FrequentItemsReader<'a> {
    fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    fn is_empty(&self) -> Result<bool, SketchError> {
        Ok(Preamble::parse_expecting(self.bytes, Family::FrequentItems)?.is_empty())
    }
}

impl<T: FrequentItem> Sketch for FrequentItemsSketch<T> {
    type Reader<'a> = FrequentItemsReader<'a>;

    fn merge_from_readers(readers: &[Self::Reader<'_>]) -> Result<Self, SketchError> {
        let lg_max = readers
            .iter()
            .map(|r| r.lg_max_map_size())
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .max()
            .unwrap_or(LG_MIN_MAP_SIZE);
        let mut merged = Self::new(lg_max)?;
        for reader in readers {
            let sketch = Self::from_capnp_bytes(reader.bytes)?;
            merged.merge(&sketch);
        }
        Ok(merged)
    }

    fn validate(&self) -> Result<(), SketchError> {
        if !(LG_MIN_MAP_SIZE..=LG_MAX_MAP_SIZE).contains(&self.lg_max_map_size)
            || !(LG_MIN_MAP_SIZE..=self.lg_max_map_size).contains(&self.lg_cur_map_size)
        {
            return Err(SketchError::Configuration(format!(
                "Invalid map sizes: current {}, max {}",
                self.lg_cur_map_size, self.lg_max_map_size
            )));
        }
        let size = 1usize << self.lg_cur_map_size;
        if self.keys.len() != size || self.counts.len() != size {
            return Err(SketchError::Configuration(format!(
                "Table arrays must hold {} slots",
                size
            )));
        }
        let active = self.keys.iter().filter(|k| k.is_some()).count();
        if active != self.num_active || active > map_capacity(self.lg_cur_map_size) {
            return Err(SketchError::Configuration(format!(
                "Active item count {} is inconsistent",
                active
            )));
        }
        let retained = self
            .counts
            .iter()
            .fold(0u64, |acc, &c| acc.saturating_add(c));
        if self.offset > self.total_weight || retained > self.total_weight {
            return Err(SketchError::Configuration(format!(
                "Counts and offset {} exceed total weight {}",
                self.offset, self.total_weight
            )));
        }
        for (slot, key) in self.keys.iter().enumerate() {
            if let Some(key) = key {
                if self.counts[slot] == 0 || self.probe(key) != slot {
                    return Err(SketchError::Configuration(format!(
                        "Invalid entry at slot {}",
                        slot
                    )));
                }
            }
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.num_active == 0
    }

    fn to_capnp_bytes(&self) -> Vec<u8> {
        self.serialize()
            .expect("frequent items serialization should not fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_lg_size() {
        assert!(matches!(
            FrequentItemsSketch::<u64>::new(2),
            Err(SketchError::Configuration(_))
        ));
        assert!(FrequentItemsSketch::<u64>::new(27).is_err());
    }

    #[test]
    fn test_exact_below_capacity() {
        let mut sketch = FrequentItemsSketch::<u64>::new(8).unwrap();
        for i in 0..50u64 {
            sketch.update(&i, i + 1);
        }
        assert_eq!(sketch.get_offset(), 0);
        assert_eq!(sketch.estimate(&9u64), 10);
        assert_eq!(sketch.lower_bound(&9u64), 10);
        assert_eq!(sketch.upper_bound(&9u64), 10);
        assert_eq!(sketch.estimate(&1000u64), 0);
        assert_eq!(sketch.get_total_weight(), (1..=50).sum::<u64>());
        let rows = sketch.estimate_no_fp();
        assert_eq!(rows.len(), 50);
        assert_eq!(rows[0].item, 49);
    }

    #[test]
    fn test_zero_weight_ignored() {
        let mut sketch = FrequentItemsSketch::<u64>::new(4).unwrap();
        sketch.update(&1u64, 0);
        assert!(sketch.is_empty());
        assert_eq!(sketch.get_total_weight(), 0);
    }

    #[test]
    fn test_map_grows_then_purges() {
        let mut sketch = FrequentItemsSketch::<u64>::new(5).unwrap();
        for i in 0..10_000u64 {
            sketch.update(&(i % 500), 1);
        }
        assert_eq!(sketch.lg_cur_map_size, 5);
        assert!(sketch.get_offset() > 0);
        assert!(sketch.num_active_items() <= map_capacity(5));
        assert!(sketch.validate().is_ok());
    }

    #[test]
    fn test_bounds_hold_for_true_weights() {
        let mut sketch = FrequentItemsSketch::<u64>::new(6).unwrap();
        let mut truth = std::collections::HashMap::new();
        for i in 0..20_000u64 {
            let item = if i % 3 == 0 { i % 7 } else { i % 997 };
            sketch.update(&item, 1);
            *truth.entry(item).or_insert(0u64) += 1;
        }
        for row in sketch.state() {
            let actual = truth[&row.item];
            assert!(row.lower_bound <= actual && actual <= row.upper_bound);
            assert!(row.lower_bound <= row.estimate && row.estimate <= row.upper_bound);
        }
        for (item, &actual) in &truth {
            assert!(actual <= sketch.upper_bound(item));
        }
    }

    #[test]
    fn test_no_fn_is_superset_of_no_fp() {
        let mut sketch = FrequentItemsSketch::<u64>::new(4).unwrap();
        for i in 0..5_000u64 {
            sketch.update(&(i % 40), 1 + i % 5);
            sketch.update(&7u64, 3);
        }
        let no_fp = sketch.estimate_no_fp();
        let no_fn = sketch.estimate_no_fn();
        assert!(no_fp.len() <= no_fn.len());
        for row in &no_fp {
            assert!(no_fn.contains(row));
        }
        assert_eq!(no_fp[0].item, 7);
        assert!(no_fn.windows(2).all(|w| w[0].estimate >= w[1].estimate));
    }

    #[test]
    fn test_set_weights() {
        let mut sketch = FrequentItemsSketch::<String>::new(4).unwrap();
        sketch.update("a", 3);
        sketch.set_weights(100, 7);
        assert_eq!(sketch.get_total_weight(), 100);
        assert_eq!(sketch.get_offset(), 7);
        assert_eq!(sketch.estimate("a"), 10);
    }

    #[test]
    fn test_merge_sums_weights() {
        let mut a = FrequentItemsSketch::<String>::new(6).unwrap();
        let mut b = FrequentItemsSketch::<String>::new(6).unwrap();
        a.update("x", 5);
        a.update("y", 1);
        b.update("x", 2);
        b.update("z", 4);
        a.merge(&b);
        assert_eq!(a.estimate("x"), 7);
        assert_eq!(a.estimate("z"), 4);
        assert_eq!(a.get_total_weight(), 12);
    }

    #[test]
    fn test_round_trip() {
        let mut sketch = FrequentItemsSketch::<Vec<u8>>::with_hash_seed(5, 99).unwrap();
        for i in 0..3_000u32 {
            let line = format!("line-{}", i % 211).into_bytes();
            sketch.update(line.as_slice(), 1);
        }
        let restored = FrequentItemsSketch::<Vec<u8>>::deserialize(&sketch.serialize().unwrap()).unwrap();
        assert_eq!(restored, sketch);
        assert_eq!(restored.state(), sketch.state());
    }

    #[test]
    fn test_deserialize_rejects_other_family() {
        let sketch = FrequentItemsSketch::<u64>::new(5).unwrap();
        let mut bytes = sketch.serialize().unwrap();
        bytes[2] = 3;
        assert!(FrequentItemsSketch::<u64>::deserialize(&bytes).is_err());
    }

    fn crafted(lg_cur: u8, total_weight: u64, entries: &[(u32, u64, u64)]) -> Vec<u8> {
        let mut message = Builder::new_default();
        let mut root = message.init_root::<frequent_items_capnp::frequent_items::Builder>();
        root.set_lg_cur_map_size(lg_cur);
        root.set_total_weight(total_weight);
        {
            let mut slots = root.reborrow().init_slots(entries.len() as u32);
            for (i, &(slot, _, _)) in entries.iter().enumerate() {
                slots.set(i as u32, slot);
            }
        }
        {
            let mut items = root.reborrow().init_items(entries.len() as u32);
            for (i, &(_, item, _)) in entries.iter().enumerate() {
                items.set(i as u32, &bincode::serialize(&item).unwrap());
            }
        }
        {
            let mut counts = root.reborrow().init_counts(entries.len() as u32);
            for (i, &(_, _, count)) in entries.iter().enumerate() {
                counts.set(i as u32, count);
            }
        }
        let preamble = Preamble::new(Family::FrequentItems)
            .with_lg_k(4)
            .empty(entries.is_empty());
        codec::encode(preamble, &message)
    }

    /// Places `items` the way the sketch would, as (slot, item, count) triples.
    fn placed(items: &[u64], count: u64) -> Vec<(u32, u64, u64)> {
        let mut sketch = FrequentItemsSketch::<u64>::new(4).unwrap();
        for item in items {
            sketch.update(item, count);
        }
        sketch
            .keys
            .iter()
            .enumerate()
            .filter_map(|(slot, key)| key.map(|k| (slot as u32, k, count)))
            .collect()
    }

    #[test]
    fn test_deserialize_accepts_crafted_map() {
        let entries = placed(&[3, 5, 8], 2);
        let sketch = FrequentItemsSketch::<u64>::deserialize(&crafted(3, 6, &entries)).unwrap();
        assert_eq!(sketch.estimate(&5u64), 2);
        assert_eq!(sketch.num_active_items(), 3);
    }

    #[test]
    fn test_deserialize_rejects_overfull_map() {
        let entries: Vec<(u32, u64, u64)> = (0..7u32).map(|i| (i, i as u64, 1)).collect();
        let result = FrequentItemsSketch::<u64>::deserialize(&crafted(3, 7, &entries));
        assert!(matches!(result, Err(SketchError::Deserialization(_))));
    }

    #[test]
    fn test_deserialize_rejects_inconsistent_entries() {
        let entries = placed(&[3, 5], 2);
        // Same slot twice.
        let doubled = vec![entries[0], entries[0]];
        assert!(FrequentItemsSketch::<u64>::deserialize(&crafted(3, 4, &doubled)).is_err());
        // Counts larger than the total weight.
        assert!(FrequentItemsSketch::<u64>::deserialize(&crafted(3, 3, &entries)).is_err());
        // Slot outside the table.
        let outside = vec![(8, 3, 1)];
        assert!(FrequentItemsSketch::<u64>::deserialize(&crafted(3, 1, &outside)).is_err());
        // Map larger than the configured maximum.
        assert!(FrequentItemsSketch::<u64>::deserialize(&crafted(5, 4, &entries)).is_err());
    }

    #[test]
    fn test_huge_weights_saturate() {
        let mut sketch = FrequentItemsSketch::<u64>::new(4).unwrap();
        sketch.update(&1u64, u64::MAX - 1);
        sketch.update(&1u64, 10);
        sketch.update(&2u64, 10);
        assert_eq!(sketch.get_total_weight(), u64::MAX);
        assert_eq!(sketch.estimate(&1u64), u64::MAX);

        let mut merged = sketch.clone();
        merged.merge(&sketch);
        assert_eq!(merged.get_total_weight(), u64::MAX);
        assert!(merged.validate().is_ok());
    }
}
