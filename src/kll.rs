// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use crate::codec::{self, Family, Preamble};
use crate::kll_capnp;
use crate::traits::{Sketch, SketchError, SketchReader};
use capnp::message::Builder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Debug;
use tracing::debug;

pub const MIN_K: u16 = 8;
pub const MAX_K: u16 = u16::MAX;
pub const DEFAULT_K: u16 = 200;

/// Minimum level width.
const DEFAULT_M: u8 = 8;

/// Level `h` items weigh `2^h`; past this depth the weights no longer fit a `u64` count.
const MAX_LEVELS: usize = 61;

pub const KIND_F32: u8 = 1;
pub const KIND_F64: u8 = 2;

/// Numeric item types a KLL sketch can hold.
pub trait KllItem:
    Copy + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Preamble kind byte identifying the item width.
    const KIND: u8;

    fn compare(&self, other: &Self) -> Ordering;
    fn is_nan(&self) -> bool;
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

impl KllItem for f32 {
    const KIND: u8 = KIND_F32;

    fn compare(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }

    fn is_nan(&self) -> bool {
        f32::is_nan(*self)
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl KllItem for f64 {
    const KIND: u8 = KIND_F64;

    fn compare(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }

    fn is_nan(&self) -> bool {
        f64::is_nan(*self)
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(value: f64) -> Self {
        value
    }
}

fn fresh_rng() -> StdRng {
    StdRng::seed_from_u64(rand::random())
}

fn int_cap_aux_aux(k: u64, depth: u32) -> u64 {
    let twok = k << 1;
    let tmp = (twok << depth) / 3u64.pow(depth);
    (tmp + 1) >> 1
}

fn int_cap_aux(k: u16, depth: u32) -> u64 {
    if depth <= 30 {
        return int_cap_aux_aux(k as u64, depth);
    }
    let half = depth / 2;
    let rest = depth - half;
    let tmp = int_cap_aux_aux(k as u64, half);
    int_cap_aux_aux(tmp, rest)
}

/// Capacity of `level` in a sketch with `num_levels` levels.
fn level_capacity(k: u16, m: u8, num_levels: usize, level: usize) -> usize {
    let depth = (num_levels - level - 1) as u32;
    int_cap_aux(k, depth).max(m as u64) as usize
}

fn merge_sorted<T: KllItem>(a: &[T], b: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if b[j].compare(&a[i]) == Ordering::Less {
            out.push(b[j]);
            j += 1;
        } else {
            out.push(a[i]);
            i += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

fn check_k(k: u16) -> Result<(), SketchError> {
    if k < MIN_K {
        return Err(SketchError::Configuration(format!(
            "KLL k must be in [{}, {}], got {}",
            MIN_K, MAX_K, k
        )));
    }
    Ok(())
}

fn check_fraction(fraction: f64) -> Result<(), SketchError> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(SketchError::InvalidArgument(format!(
            "Fraction must be in [0, 1], got {}",
            fraction
        )));
    }
    Ok(())
}

/// Weighted, sorted snapshot of the retained items.
struct SortedView<T> {
    items: Vec<T>,
    cumulative: Vec<u64>,
    total: u64,
}

impl<T: KllItem> SortedView<T> {
    fn quantile(&self, fraction: f64) -> T {
        let target = (fraction * self.total as f64).floor() as u64;
        let idx = self.cumulative.partition_point(|&w| w <= target);
        self.items[idx.min(self.items.len() - 1)]
    }
}

/// KLL quantile sketch.
///
/// Items land in level 0; when the sketch is full the lowest over-capacity level is
/// sorted and halved, each survivor standing in for twice the weight one level up.
/// Level `h` therefore carries weight `2^h` per item.
///
/// # Example
///
/// ```
/// use stream_sketches::KllDoubleSketch;
///
/// let mut kll = KllDoubleSketch::with_seed(200, 1).unwrap();
/// for i in 1..=10_000 {
///     kll.update(i as f64);
/// }
/// assert_eq!(kll.get_min_value().unwrap(), 1.0);
/// assert_eq!(kll.get_max_value().unwrap(), 10_000.0);
/// let median = kll.get_quantile(0.5).unwrap();
/// assert!((median - 5_000.0).abs() < 300.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KllSketch<T: KllItem> {
    k: u16,
    m: u8,
    min_k: u16,
    n: u64,
    /// `levels[h]` holds the items of weight `2^h`; levels above 0 are sorted.
    levels: Vec<Vec<T>>,
    min_item: Option<T>,
    max_item: Option<T>,
    level_zero_sorted: bool,
    #[serde(skip, default = "fresh_rng")]
    rng: StdRng,
}

pub type KllFloatSketch = KllSketch<f32>;
pub type KllDoubleSketch = KllSketch<f64>;

impl<T: KllItem> PartialEq for KllSketch<T> {
    fn eq(&self, other: &Self) -> bool {
        self.k == other.k
            && self.m == other.m
            && self.min_k == other.min_k
            && self.n == other.n
            && self.levels == other.levels
            && self.min_item == other.min_item
            && self.max_item == other.max_item
    }
}

impl<T: KllItem> Default for KllSketch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: KllItem> KllSketch<T> {
    /// Creates a sketch with the default `k` of 200.
    pub fn new() -> Self {
        Self::build(DEFAULT_K, fresh_rng())
    }

    pub fn with_k(k: u16) -> Result<Self, SketchError> {
        check_k(k)?;
        Ok(Self::build(k, fresh_rng()))
    }

    /// Creates a sketch whose compaction coin flips are reproducible.
    pub fn with_seed(k: u16, seed: u64) -> Result<Self, SketchError> {
        check_k(k)?;
        Ok(Self::build(k, StdRng::seed_from_u64(seed)))
    }

    fn build(k: u16, rng: StdRng) -> Self {
        Self {
            k,
            m: DEFAULT_M,
            min_k: k,
            n: 0,
            levels: vec![Vec::with_capacity(k as usize)],
            min_item: None,
            max_item: None,
            level_zero_sorted: false,
            rng,
        }
    }

    /// Replaces the compaction random source.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn get_k(&self) -> u16 {
        self.k
    }

    pub fn get_n(&self) -> u64 {
        self.n
    }

    pub fn get_num_retained(&self) -> u32 {
        self.levels.iter().map(|l| l.len() as u32).sum()
    }

    /// True once any compaction has happened.
    pub fn is_estimation_mode(&self) -> bool {
        self.levels.len() > 1
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    fn total_capacity(&self) -> usize {
        let num_levels = self.levels.len();
        (0..num_levels)
            .map(|h| level_capacity(self.k, self.m, num_levels, h))
            .sum()
    }

    /// Adds a value. NaN is ignored.
    pub fn update(&mut self, value: T) {
        if value.is_nan() {
            return;
        }
        if self
            .min_item
            .map_or(true, |min| value.compare(&min) == Ordering::Less)
        {
            self.min_item = Some(value);
        }
        if self
            .max_item
            .map_or(true, |max| value.compare(&max) == Ordering::Greater)
        {
            self.max_item = Some(value);
        }
        self.insert_level_zero(value);
        self.n += 1;
    }

    fn insert_level_zero(&mut self, value: T) {
        if self.get_num_retained() as usize >= self.total_capacity() {
            self.compress_once();
        }
        self.levels[0].push(value);
        self.level_zero_sorted = false;
    }

    /// Compacts the lowest level that has reached its capacity.
    fn compress_once(&mut self) {
        let num_levels = self.levels.len();
        let level = (0..num_levels)
            .find(|&h| self.levels[h].len() >= level_capacity(self.k, self.m, num_levels, h))
            .unwrap_or(0);
        if level + 1 == num_levels {
            self.levels.push(Vec::new());
            debug!(levels = self.levels.len(), n = self.n, "KLL sketch grew a level");
        }

        let mut items = std::mem::take(&mut self.levels[level]);
        if level > 0 || !self.level_zero_sorted {
            items.sort_unstable_by(|a, b| a.compare(b));
        }
        // An odd population leaves its smallest item behind.
        let start = items.len() % 2;
        let offset = self.rng.random_bool(0.5) as usize;
        let survivors: Vec<T> = items[start..].iter().skip(offset).step_by(2).copied().collect();
        items.truncate(start);

        let merged = merge_sorted(&self.levels[level + 1], &survivors);
        self.levels[level + 1] = merged;
        self.levels[level] = items;
        if level == 0 {
            self.level_zero_sorted = true;
        }
    }

    /// Merges `other` into this sketch. The result keeps the smaller `k`.
    pub fn merge(&mut self, other: &KllSketch<T>) {
        if other.is_empty() {
            return;
        }
        let final_n = self.n + other.n;
        if let Some(min) = other.min_item {
            if self.min_item.map_or(true, |m| min.compare(&m) == Ordering::Less) {
                self.min_item = Some(min);
            }
        }
        if let Some(max) = other.max_item {
            if self.max_item.map_or(true, |m| max.compare(&m) == Ordering::Greater) {
                self.max_item = Some(max);
            }
        }
        self.k = self.k.min(other.k);
        self.min_k = self.min_k.min(other.min_k);

        for &item in &other.levels[0] {
            self.insert_level_zero(item);
        }
        if other.levels.len() > 1 {
            while self.levels.len() < other.levels.len() {
                self.levels.push(Vec::new());
            }
            for (h, level) in other.levels.iter().enumerate().skip(1) {
                self.levels[h] = merge_sorted(&self.levels[h], level);
            }
        }
        while self.get_num_retained() as usize > self.total_capacity() {
            self.compress_once();
        }
        self.n = final_n;
    }

    pub fn get_min_value(&self) -> Result<T, SketchError> {
        self.min_item
            .ok_or_else(|| SketchError::EmptySketch("KLL sketch has no items".to_string()))
    }

    pub fn get_max_value(&self) -> Result<T, SketchError> {
        self.max_item
            .ok_or_else(|| SketchError::EmptySketch("KLL sketch has no items".to_string()))
    }

    fn require_items(&self) -> Result<(), SketchError> {
        if self.is_empty() {
            return Err(SketchError::EmptySketch(
                "KLL sketch has no items".to_string(),
            ));
        }
        Ok(())
    }

    fn sorted_view(&self) -> SortedView<T> {
        let mut weighted: Vec<(T, u64)> = self
            .levels
            .iter()
            .enumerate()
            .flat_map(|(h, level)| level.iter().map(move |&item| (item, 1u64 << h)))
            .collect();
        weighted.sort_by(|a, b| a.0.compare(&b.0));
        let mut total = 0;
        let mut items = Vec::with_capacity(weighted.len());
        let mut cumulative = Vec::with_capacity(weighted.len());
        for (item, weight) in weighted {
            total += weight;
            items.push(item);
            cumulative.push(total);
        }
        SortedView {
            items,
            cumulative,
            total,
        }
    }

    fn quantile_from(&self, view: &SortedView<T>, fraction: f64) -> Result<T, SketchError> {
        if fraction == 0.0 {
            self.get_min_value()
        } else if fraction == 1.0 {
            self.get_max_value()
        } else {
            Ok(view.quantile(fraction))
        }
    }

    /// Approximate item at normalized rank `fraction`.
    pub fn get_quantile(&self, fraction: f64) -> Result<T, SketchError> {
        check_fraction(fraction)?;
        self.require_items()?;
        self.quantile_from(&self.sorted_view(), fraction)
    }

    pub fn get_quantiles(&self, fractions: &[f64]) -> Result<Vec<T>, SketchError> {
        for &f in fractions {
            check_fraction(f)?;
        }
        self.require_items()?;
        let view = self.sorted_view();
        fractions
            .iter()
            .map(|&f| self.quantile_from(&view, f))
            .collect()
    }

    /// Quantiles at `num` evenly spaced fractions from 0 to 1 inclusive.
    pub fn get_quantiles_evenly_spaced(&self, num: u32) -> Result<Vec<T>, SketchError> {
        if num == 0 {
            return Err(SketchError::InvalidArgument(
                "num must be at least 1".to_string(),
            ));
        }
        let fractions: Vec<f64> = if num == 1 {
            vec![0.0]
        } else {
            (0..num).map(|i| i as f64 / (num - 1) as f64).collect()
        };
        self.get_quantiles(&fractions)
    }

    /// Normalized rank of `value`: the weight of retained items strictly below it.
    pub fn get_rank(&self, value: T) -> Result<f64, SketchError> {
        if value.is_nan() {
            return Err(SketchError::InvalidArgument(
                "Cannot rank NaN".to_string(),
            ));
        }
        self.require_items()?;
        let mut below = 0u64;
        let mut total = 0u64;
        for (h, level) in self.levels.iter().enumerate() {
            let weight = 1u64 << h;
            total += weight * level.len() as u64;
            below += weight
                * level
                    .iter()
                    .filter(|item| item.compare(&value) == Ordering::Less)
                    .count() as u64;
        }
        Ok(below as f64 / total as f64)
    }

    /// Approximate normalized rank error for the smallest `k` merged into this sketch.
    pub fn normalized_rank_error(&self, pmf: bool) -> f64 {
        let k = self.min_k as f64;
        if pmf {
            2.446 / k.powf(0.9433)
        } else {
            2.296 / k.powf(0.9723)
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.to_capnp_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, SketchError> {
        Self::from_capnp_bytes(bytes)
    }

    pub fn from_capnp_bytes(bytes: &[u8]) -> Result<Self, SketchError> {
        let (preamble, message) = codec::decode(bytes, Family::Kll)?;
        if preamble.kind != T::KIND {
            return Err(SketchError::Deserialization(format!(
                "KLL item kind mismatch: expected {}, found {}",
                T::KIND,
                preamble.kind
            )));
        }
        check_k(preamble.k).map_err(|e| SketchError::Deserialization(e.to_string()))?;
        let root = message.get_root::<kll_capnp::kll_sketch::Reader>()?;

        let sizes: Vec<u32> = root.get_level_sizes()?.iter().collect();
        let flat = root.get_items()?;
        let expected: usize = sizes.iter().map(|&s| s as usize).sum();
        if sizes.is_empty() || sizes.len() > MAX_LEVELS {
            return Err(SketchError::Deserialization(format!(
                "KLL sketch holds {} levels, expected 1 to {}",
                sizes.len(),
                MAX_LEVELS
            )));
        }
        if flat.len() as usize != expected {
            return Err(SketchError::Deserialization(format!(
                "Level sizes describe {} items, found {}",
                expected,
                flat.len()
            )));
        }
        let mut levels = Vec::with_capacity(sizes.len());
        let mut cursor = 0u32;
        for &size in &sizes {
            let level: Vec<T> = (cursor..cursor + size)
                .map(|i| T::from_f64(flat.get(i)))
                .collect();
            cursor += size;
            levels.push(level);
        }

        let n = root.get_n();
        let empty = preamble.is_empty();
        let sketch = Self {
            k: preamble.k,
            m: DEFAULT_M,
            min_k: root.get_min_k(),
            n,
            levels,
            min_item: (!empty).then(|| T::from_f64(root.get_min_item())),
            max_item: (!empty).then(|| T::from_f64(root.get_max_item())),
            level_zero_sorted: root.get_level_zero_sorted(),
            rng: fresh_rng(),
        };
        sketch
            .validate()
            .map_err(|e| SketchError::Deserialization(e.to_string()))?;
        Ok(sketch)
    }
}

pub struct KllReader<'a> {
    bytes: &'a [u8],
}

impl<'a> KllReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl<'a> SketchReader<'a> for KllReader<'a> {
    fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    fn is_empty(&self) -> Result<bool, SketchError> {
        Ok(Preamble::parse_expecting(self.bytes, Family::Kll)?.is_empty())
    }
}

impl<T: KllItem> Sketch for KllSketch<T> {
    type Reader<'a> = KllReader<'a>;

    fn merge_from_readers(readers: &[Self::Reader<'_>]) -> Result<Self, SketchError> {
        let mut merged = Self::new();
        let mut first = true;
        for reader in readers {
            let sketch = Self::from_capnp_bytes(reader.bytes)?;
            if first {
                merged = sketch;
                first = false;
            } else {
                merged.merge(&sketch);
            }
        }
        Ok(merged)
    }

    fn validate(&self) -> Result<(), SketchError> {
        check_k(self.k)?;
        if self.levels.is_empty() {
            return Err(SketchError::Configuration("KLL sketch has no levels".to_string()));
        }
        if self.levels.len() > MAX_LEVELS {
            return Err(SketchError::Configuration(format!(
                "KLL sketch holds {} levels, at most {} allowed",
                self.levels.len(),
                MAX_LEVELS
            )));
        }
        let weight = self
            .levels
            .iter()
            .enumerate()
            .try_fold(0u64, |acc, (h, level)| {
                (level.len() as u64)
                    .checked_mul(1u64 << h)
                    .and_then(|w| acc.checked_add(w))
            })
            .ok_or_else(|| {
                SketchError::Configuration("Retained weight overflows u64".to_string())
            })?;
        if weight != self.n {
            return Err(SketchError::Configuration(format!(
                "Retained weight {} does not match n = {}",
                weight, self.n
            )));
        }
        for level in self.levels.iter().skip(1) {
            if level.windows(2).any(|w| w[1].compare(&w[0]) == Ordering::Less) {
                return Err(SketchError::Configuration(
                    "KLL level is not sorted".to_string(),
                ));
            }
        }
        if self.levels.iter().flatten().any(|v| v.is_nan()) {
            return Err(SketchError::Configuration("KLL sketch holds NaN".to_string()));
        }
        if self.min_k < MIN_K || self.min_k > self.k {
            return Err(SketchError::Configuration(format!(
                "KLL min_k {} must lie in [{}, {}]",
                self.min_k, MIN_K, self.k
            )));
        }
        if self.min_item.iter().chain(self.max_item.iter()).any(|v| v.is_nan()) {
            return Err(SketchError::Configuration("KLL extrema are NaN".to_string()));
        }
        if (self.n == 0) != self.min_item.is_none() {
            return Err(SketchError::Configuration(
                "KLL extrema do not match item count".to_string(),
            ));
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.n == 0
    }

    fn to_capnp_bytes(&self) -> Vec<u8> {
        let mut message = Builder::new_default();
        let mut root = message.init_root::<kll_capnp::kll_sketch::Builder>();
        root.set_n(self.n);
        root.set_min_k(self.min_k);
        {
            let mut sizes = root.reborrow().init_level_sizes(self.levels.len() as u32);
            for (i, level) in self.levels.iter().enumerate() {
                sizes.set(i as u32, level.len() as u32);
            }
        }
        {
            let mut items = root.reborrow().init_items(self.get_num_retained());
            for (i, &item) in self.levels.iter().flatten().enumerate() {
                items.set(i as u32, item.to_f64());
            }
        }
        root.set_min_item(self.min_item.map_or(f64::NAN, KllItem::to_f64));
        root.set_max_item(self.max_item.map_or(f64::NAN, KllItem::to_f64));
        root.set_level_zero_sorted(self.level_zero_sorted);

        let preamble = Preamble::new(Family::Kll)
            .with_k(self.k)
            .with_kind(T::KIND)
            .empty(self.n == 0);
        codec::encode(preamble, &message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(k: u16, values: impl IntoIterator<Item = f64>) -> KllDoubleSketch {
        let mut kll = KllDoubleSketch::with_seed(k, 17).unwrap();
        for v in values {
            kll.update(v);
        }
        kll
    }

    #[test]
    fn test_capacity_matches_reference_values() {
        assert_eq!(int_cap_aux(200, 0), 200);
        assert_eq!(int_cap_aux(200, 1), 133);
        assert_eq!(int_cap_aux(200, 2), 89);
        assert_eq!(level_capacity(200, 8, 20, 0), 8);
    }

    #[test]
    fn test_rejects_small_k() {
        assert!(matches!(
            KllFloatSketch::with_k(7),
            Err(SketchError::Configuration(_))
        ));
        assert_eq!(KllFloatSketch::with_k(8).unwrap().get_k(), 8);
    }

    #[test]
    fn test_exact_mode_below_k() {
        let kll = seeded(200, (1..=100).map(|i| i as f64));
        assert!(!kll.is_estimation_mode());
        assert_eq!(kll.get_num_retained(), 100);
        assert_eq!(kll.get_quantile(0.5).unwrap(), 51.0);
        assert_eq!(kll.get_rank(51.0).unwrap(), 0.5);
    }

    #[test]
    fn test_compaction_preserves_weight() {
        let kll = seeded(50, (0..100_000).map(|i| i as f64));
        assert!(kll.is_estimation_mode());
        assert!(kll.get_num_retained() < 400);
        assert!(kll.validate().is_ok());
    }

    #[test]
    fn test_nan_is_ignored() {
        let mut kll = KllFloatSketch::new();
        kll.update(f32::NAN);
        assert!(kll.is_empty());
        kll.update(1.5);
        assert_eq!(kll.get_n(), 1);
        assert!(kll.get_rank(f32::NAN).is_err());
    }

    #[test]
    fn test_same_seed_same_sketch() {
        let a = seeded(64, (0..5_000).map(|i| ((i * 7919) % 5_000) as f64));
        let b = seeded(64, (0..5_000).map(|i| ((i * 7919) % 5_000) as f64));
        assert_eq!(a, b);
        assert_eq!(a.get_quantile(0.3).unwrap(), b.get_quantile(0.3).unwrap());
    }

    #[test]
    fn test_merge_takes_smaller_k() {
        let mut a = seeded(200, (0..10_000).map(|i| i as f64));
        let b = seeded(100, (10_000..20_000).map(|i| i as f64));
        a.merge(&b);
        assert_eq!(a.get_k(), 100);
        assert_eq!(a.get_n(), 20_000);
        assert_eq!(a.get_min_value().unwrap(), 0.0);
        assert_eq!(a.get_max_value().unwrap(), 19_999.0);
        let median = a.get_quantile(0.5).unwrap();
        assert!((median - 10_000.0).abs() < 800.0, "median = {}", median);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_merge_empty_is_noop() {
        let mut a = seeded(200, (0..1_000).map(|i| i as f64));
        let before = a.clone();
        a.merge(&KllDoubleSketch::new());
        assert_eq!(a, before);
    }

    #[test]
    fn test_round_trip_f32() {
        let mut kll = KllFloatSketch::with_seed(100, 3).unwrap();
        for i in 0..3_000 {
            kll.update(i as f32 * 0.25);
        }
        let restored = KllFloatSketch::deserialize(&kll.serialize()).unwrap();
        assert_eq!(restored, kll);
        assert!(KllDoubleSketch::deserialize(&kll.serialize()).is_err());
    }

    #[test]
    fn test_round_trip_empty() {
        let kll = KllDoubleSketch::new();
        let restored = KllDoubleSketch::deserialize(&kll.serialize()).unwrap();
        assert!(restored.is_empty());
        assert!(matches!(
            restored.get_min_value(),
            Err(SketchError::EmptySketch(_))
        ));
    }

    #[test]
    fn test_rank_error_shrinks_with_k() {
        let small = KllDoubleSketch::with_k(50).unwrap();
        let large = KllDoubleSketch::with_k(400).unwrap();
        assert!(small.normalized_rank_error(false) > large.normalized_rank_error(false));
        assert!((KllDoubleSketch::new().normalized_rank_error(false) - 0.0133).abs() < 0.001);
    }

    fn crafted(n: u64, sizes: &[u32], items: &[f64]) -> Vec<u8> {
        let mut message = Builder::new_default();
        let mut root = message.init_root::<kll_capnp::kll_sketch::Builder>();
        root.set_n(n);
        root.set_min_k(DEFAULT_K);
        {
            let mut list = root.reborrow().init_level_sizes(sizes.len() as u32);
            for (i, &size) in sizes.iter().enumerate() {
                list.set(i as u32, size);
            }
        }
        {
            let mut list = root.reborrow().init_items(items.len() as u32);
            for (i, &item) in items.iter().enumerate() {
                list.set(i as u32, item);
            }
        }
        let min = items.iter().cloned().fold(f64::NAN, f64::min);
        let max = items.iter().cloned().fold(f64::NAN, f64::max);
        root.set_min_item(min);
        root.set_max_item(max);
        let preamble = Preamble::new(Family::Kll)
            .with_k(DEFAULT_K)
            .with_kind(KIND_F64)
            .empty(n == 0);
        codec::encode(preamble, &message)
    }

    #[test]
    fn test_deserialize_accepts_crafted_sketch() {
        let restored = KllDoubleSketch::deserialize(&crafted(5, &[1, 2], &[9.0, 1.0, 3.0])).unwrap();
        assert_eq!(restored.get_n(), 5);
        assert_eq!(restored.get_max_value().unwrap(), 9.0);
    }

    #[test]
    fn test_deserialize_rejects_too_many_levels() {
        let result = KllDoubleSketch::deserialize(&crafted(0, &[0; 70], &[]));
        assert!(matches!(result, Err(SketchError::Deserialization(_))));
        assert!(KllDoubleSketch::deserialize(&crafted(0, &[], &[])).is_err());
    }

    #[test]
    fn test_deserialize_rejects_overflowing_weight() {
        let mut sizes = vec![0u32; MAX_LEVELS];
        sizes[MAX_LEVELS - 1] = 16;
        let items: Vec<f64> = (0..16).map(|i| i as f64).collect();
        let result = KllDoubleSketch::deserialize(&crafted(u64::MAX, &sizes, &items));
        assert!(matches!(result, Err(SketchError::Deserialization(_))));
    }

    #[test]
    fn test_deserialize_rejects_inconsistent_levels() {
        // Sizes describe more items than the body carries.
        assert!(KllDoubleSketch::deserialize(&crafted(3, &[3], &[1.0, 2.0])).is_err());
        // Weight 1 + 2 * 2 does not match n.
        assert!(KllDoubleSketch::deserialize(&crafted(4, &[1, 2], &[0.0, 1.0, 2.0])).is_err());
        // Level 1 is not sorted.
        assert!(KllDoubleSketch::deserialize(&crafted(5, &[1, 2], &[0.0, 2.0, 1.0])).is_err());
        // Non-empty sketch with NaN items.
        assert!(KllDoubleSketch::deserialize(&crafted(1, &[1], &[f64::NAN])).is_err());
    }
}
