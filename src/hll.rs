// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use crate::codec::{self, Family, Preamble};
use crate::hashing::{self, DEFAULT_SEED};
use crate::hll_capnp;
use crate::traits::{Sketch, SketchError, SketchReader};
use capnp::message::Builder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const MIN_LG_K: u8 = 4;
pub const MAX_LG_K: u8 = 21;
pub const DEFAULT_LG_K: u8 = 12;

/// Coupons address a virtual table of 2^26 slots.
const KEY_BITS: u32 = 26;
const KEY_MASK: u32 = (1 << KEY_BITS) - 1;
const MAX_REGISTER_VALUE: u8 = 63;

/// Distinct coupons kept in list mode before promotion.
const LIST_CAPACITY: usize = 8;

/// Nibbles at or above this value spill into the HLL_4 exception list.
const HLL4_EXCEPTION: u8 = 15;

const COUPON_RSE: f64 = 0.409 / (1u64 << 13) as f64;
const HIP_RSE_FACTOR: f64 = 0.836;
const STANDARD_RSE_FACTOR: f64 = 1.04;

/// Storage density of the dense register array when serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetHllType {
    Hll4,
    Hll6,
    Hll8,
}

impl TargetHllType {
    fn code(&self) -> u8 {
        match self {
            TargetHllType::Hll4 => 0,
            TargetHllType::Hll6 => 1,
            TargetHllType::Hll8 => 2,
        }
    }

    fn from_code(code: u8) -> Result<Self, SketchError> {
        match code {
            0 => Ok(TargetHllType::Hll4),
            1 => Ok(TargetHllType::Hll6),
            2 => Ok(TargetHllType::Hll8),
            other => Err(SketchError::Deserialization(format!(
                "Unknown HLL target type: {}",
                other
            ))),
        }
    }
}

impl Default for TargetHllType {
    fn default() -> Self {
        TargetHllType::Hll4
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct HllArray {
    registers: Vec<u8>,
    /// Historical inverse probability accumulator.
    hip_accum: f64,
    /// Sum of 2^-register over all registers.
    kxq: f64,
}

impl HllArray {
    fn new(lg_k: u8) -> Self {
        let k = 1usize << lg_k;
        Self {
            registers: vec![0; k],
            hip_accum: 0.0,
            kxq: k as f64,
        }
    }

    fn from_registers(registers: Vec<u8>) -> Self {
        let kxq = registers.iter().map(|&r| inv_pow2(r)).sum();
        Self {
            registers,
            hip_accum: 0.0,
            kxq,
        }
    }

    fn update(&mut self, coupon: u32) {
        let k = self.registers.len();
        let slot = (coupon & KEY_MASK) as usize & (k - 1);
        let value = (coupon >> KEY_BITS) as u8;
        let old = self.registers[slot];
        if value > old {
            self.hip_accum += k as f64 / self.kxq;
            self.kxq -= inv_pow2(old);
            self.kxq += inv_pow2(value);
            self.registers[slot] = value;
        }
    }

    fn num_zeros(&self) -> usize {
        self.registers.iter().filter(|&&r| r == 0).count()
    }

    /// Estimate for arrays whose HIP accumulator no longer applies, such as union results.
    ///
    /// The raw harmonic-mean estimate uses a correction factor tuned per `lg_k`. At or
    /// below `2.5 k` it gives way to linear counting over the empty registers. Saturated
    /// registers are charged with the large-range term of Ertl's improved raw estimator
    /// instead of `2^-63`.
    fn composite_estimate(&self) -> f64 {
        let k = self.registers.len();
        let lg_k = k.trailing_zeros() as u8;
        let m = k as f64;
        let mut zeros = 0usize;
        let mut saturated = 0usize;
        let mut denominator = 0.0;
        for &r in &self.registers {
            match r {
                0 => zeros += 1,
                MAX_REGISTER_VALUE => saturated += 1,
                v => denominator += inv_pow2(v),
            }
        }
        denominator += zeros as f64;
        denominator += m * tau(1.0 - saturated as f64 / m) * inv_pow2(MAX_REGISTER_VALUE - 1);

        let raw = raw_correction(lg_k) * m * m / denominator.max(f64::MIN_POSITIVE);
        if raw <= 2.5 * m && zeros > 0 {
            bitmap_estimate(k, zeros)
        } else {
            raw
        }
    }
}

fn inv_pow2(v: u8) -> f64 {
    (-(v as f64)).exp2()
}

/// Empirical correction of the raw estimate; small tables use fixed constants.
fn raw_correction(lg_k: u8) -> f64 {
    match lg_k {
        4 => 0.673,
        5 => 0.697,
        6 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / (1u64 << lg_k) as f64),
    }
}

/// Linear counting with harmonic numbers: `k * (H(k) - H(zeros))`.
fn bitmap_estimate(k: usize, zeros: usize) -> f64 {
    let m = k as f64;
    if zeros == 0 {
        return m * (m / 0.5).ln();
    }
    m * (harmonic(k) - harmonic(zeros))
}

fn harmonic(n: usize) -> f64 {
    const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;
    if n < 25 {
        return (1..=n).map(|i| 1.0 / i as f64).sum();
    }
    let x = n as f64;
    x.ln() + EULER_MASCHERONI + 1.0 / (2.0 * x) - 1.0 / (12.0 * x * x)
}

/// Ertl's tau for the fraction `x` of registers below saturation.
fn tau(x: f64) -> f64 {
    if x == 0.0 || x == 1.0 {
        return 0.0;
    }
    let mut x = x;
    let mut y = 1.0;
    let mut z = 1.0 - x;
    loop {
        x = x.sqrt();
        let previous = z;
        y *= 0.5;
        z -= (1.0 - x).powi(2) * y;
        if z == previous {
            return z / 3.0;
        }
    }
}

/// Folds `src` registers onto a table of `2^lg_dst` registers by slot-wise max.
fn fold_registers(src: &[u8], lg_dst: u8) -> Vec<u8> {
    let mask = (1usize << lg_dst) - 1;
    let mut dst = vec![0u8; 1 << lg_dst];
    for (i, &v) in src.iter().enumerate() {
        let slot = &mut dst[i & mask];
        if v > *slot {
            *slot = v;
        }
    }
    dst
}

fn coupon_estimate(count: usize) -> f64 {
    let table = (1u64 << KEY_BITS) as f64;
    -table * (1.0 - count as f64 / table).ln()
}

/// Most coupons set mode holds before promoting to dense registers.
fn set_threshold(lg_k: u8) -> usize {
    ((1usize << (lg_k - 3)) * 3) / 4
}

fn make_coupon(key: u32, value: u8) -> u32 {
    (key & KEY_MASK) | ((value as u32) << KEY_BITS)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum HllMode {
    /// Small unordered list of coupons.
    List(Vec<u32>),
    /// Coupon key -> register value.
    Set(BTreeMap<u32, u8>),
    Hll(HllArray),
}

impl HllMode {
    fn code(&self) -> u8 {
        match self {
            HllMode::List(_) => 0,
            HllMode::Set(_) => 1,
            HllMode::Hll(_) => 2,
        }
    }
}

/// HyperLogLog cardinality sketch.
///
/// The sketch starts in coupon mode (a short list, then an ordered set of coupons) and
/// promotes to a dense array of `2^lg_k` registers once the coupons would take more room
/// than the array. Estimates use the HIP accumulator while the sketch is fed directly;
/// sketches produced by [`HllUnion`] fall back to the standard estimator.
///
/// # Example
///
/// ```
/// use stream_sketches::{HllSketch, TargetHllType};
///
/// let mut hll = HllSketch::new(12, TargetHllType::Hll4).unwrap();
/// for i in 0..1000u64 {
///     hll.update_u64(i);
/// }
/// let estimate = hll.estimate();
/// assert!((estimate - 1000.0).abs() < 50.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HllSketch {
    lg_k: u8,
    target_type: TargetHllType,
    mode: HllMode,
    out_of_order: bool,
}

impl Default for HllSketch {
    fn default() -> Self {
        Self::with_lg_k(DEFAULT_LG_K, TargetHllType::default())
    }
}

impl HllSketch {
    /// Creates an empty sketch with `2^lg_k` registers.
    pub fn new(lg_k: u8, target_type: TargetHllType) -> Result<Self, SketchError> {
        check_lg_k(lg_k)?;
        Ok(Self::with_lg_k(lg_k, target_type))
    }

    fn with_lg_k(lg_k: u8, target_type: TargetHllType) -> Self {
        Self {
            lg_k,
            target_type,
            mode: HllMode::List(Vec::with_capacity(LIST_CAPACITY)),
            out_of_order: false,
        }
    }

    pub fn lg_k(&self) -> u8 {
        self.lg_k
    }

    pub fn target_type(&self) -> TargetHllType {
        self.target_type
    }

    /// True once the sketch holds a dense register array.
    pub fn is_dense(&self) -> bool {
        matches!(self.mode, HllMode::Hll(_))
    }

    pub fn update(&mut self, data: &[u8]) {
        let (h0, h1) = hashing::hash128(data, DEFAULT_SEED);
        let value = (h1.leading_zeros() + 1).min(MAX_REGISTER_VALUE as u32) as u8;
        self.insert_coupon(make_coupon(h0 as u32, value));
    }

    pub fn update_u64(&mut self, value: u64) {
        self.update(&value.to_ne_bytes());
    }

    fn insert_coupon(&mut self, coupon: u32) {
        let key = coupon & KEY_MASK;
        let value = (coupon >> KEY_BITS) as u8;
        let len = match &mut self.mode {
            HllMode::List(list) => {
                match list.iter_mut().find(|c| **c & KEY_MASK == key) {
                    Some(existing) => {
                        if coupon > *existing {
                            *existing = coupon;
                        }
                    }
                    None => list.push(coupon),
                }
                list.len()
            }
            HllMode::Set(set) => {
                let entry = set.entry(key).or_insert(0);
                if value > *entry {
                    *entry = value;
                }
                set.len()
            }
            HllMode::Hll(array) => {
                array.update(coupon);
                return;
            }
        };
        self.maybe_promote(len);
    }

    fn maybe_promote(&mut self, len: usize) {
        let threshold = set_threshold(self.lg_k);
        let list_full = matches!(self.mode, HllMode::List(_)) && len > LIST_CAPACITY;
        let set_full = matches!(self.mode, HllMode::Set(_)) && len > threshold;
        if set_full || (list_full && threshold <= LIST_CAPACITY) {
            self.promote_to_hll();
        } else if list_full {
            debug!(lg_k = self.lg_k, "HLL list mode promoted to set mode");
            let set = self
                .coupons()
                .into_iter()
                .map(|c| (c & KEY_MASK, (c >> KEY_BITS) as u8))
                .collect();
            self.mode = HllMode::Set(set);
        }
    }

    fn promote_to_hll(&mut self) {
        let coupons = self.coupons();
        debug!(
            lg_k = self.lg_k,
            coupons = coupons.len(),
            "HLL coupon mode promoted to dense registers"
        );
        let mut array = HllArray::new(self.lg_k);
        for &coupon in &coupons {
            array.update(coupon);
        }
        array.hip_accum = coupon_estimate(coupons.len());
        self.mode = HllMode::Hll(array);
    }

    /// Coupons held in list or set mode; empty in dense mode.
    fn coupons(&self) -> Vec<u32> {
        match &self.mode {
            HllMode::List(list) => list.clone(),
            HllMode::Set(set) => set.iter().map(|(&k, &v)| make_coupon(k, v)).collect(),
            HllMode::Hll(_) => Vec::new(),
        }
    }

    /// Current cardinality estimate.
    pub fn estimate(&self) -> f64 {
        match &self.mode {
            HllMode::List(list) => coupon_estimate(list.len()),
            HllMode::Set(set) => coupon_estimate(set.len()),
            HllMode::Hll(array) if self.out_of_order => array.composite_estimate(),
            HllMode::Hll(array) => array.hip_accum,
        }
    }

    fn relative_error(&self) -> f64 {
        let k = (1u64 << self.lg_k) as f64;
        match &self.mode {
            HllMode::Hll(_) if self.out_of_order => STANDARD_RSE_FACTOR / k.sqrt(),
            HllMode::Hll(_) => HIP_RSE_FACTOR / k.sqrt(),
            _ => COUPON_RSE,
        }
    }

    /// Approximate lower bound at `num_std_dev` standard deviations (1, 2 or 3).
    pub fn lower_bound(&self, num_std_dev: u8) -> Result<f64, SketchError> {
        check_std_dev(num_std_dev)?;
        let estimate = self.estimate();
        let bound = estimate / (1.0 + num_std_dev as f64 * self.relative_error());
        Ok(bound.max(self.num_coupons_lower_limit()))
    }

    /// Approximate upper bound at `num_std_dev` standard deviations (1, 2 or 3).
    pub fn upper_bound(&self, num_std_dev: u8) -> Result<f64, SketchError> {
        check_std_dev(num_std_dev)?;
        let estimate = self.estimate();
        let rel = (num_std_dev as f64 * self.relative_error()).min(0.99);
        Ok(estimate / (1.0 - rel))
    }

    fn num_coupons_lower_limit(&self) -> f64 {
        match &self.mode {
            HllMode::List(list) => list.len() as f64,
            HllMode::Set(set) => set.len() as f64,
            HllMode::Hll(array) => (array.registers.len() - array.num_zeros()) as f64,
        }
    }

    /// Serializes into the preamble + Cap'n Proto layout.
    pub fn serialize(&self) -> Vec<u8> {
        self.to_capnp_bytes()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, SketchError> {
        Self::from_capnp_bytes(bytes)
    }

    pub fn from_capnp_bytes(bytes: &[u8]) -> Result<Self, SketchError> {
        let (preamble, message) = codec::decode(bytes, Family::Hll)?;
        let lg_k = preamble.lg_k;
        check_lg_k(lg_k).map_err(|e| SketchError::Deserialization(e.to_string()))?;
        let target_type = TargetHllType::from_code(preamble.kind & 0x0F)?;
        let root = message.get_root::<hll_capnp::hll_sketch::Reader>()?;
        let k = 1usize << lg_k;

        let mode = match preamble.kind >> 4 {
            0 | 1 => {
                let coupons: Vec<u32> = root.get_coupons()?.iter().collect();
                let mut set = BTreeMap::new();
                for &coupon in &coupons {
                    let value = (coupon >> KEY_BITS) as u8;
                    if value == 0 || value > MAX_REGISTER_VALUE {
                        return Err(SketchError::Deserialization(format!(
                            "Invalid coupon value: {}",
                            value
                        )));
                    }
                    set.insert(coupon & KEY_MASK, value);
                }
                if set.len() != coupons.len() {
                    return Err(SketchError::Deserialization(format!(
                        "{} coupons share {} distinct keys",
                        coupons.len(),
                        set.len()
                    )));
                }
                let capacity = if preamble.kind >> 4 == 0 {
                    LIST_CAPACITY
                } else {
                    set_threshold(lg_k)
                };
                if coupons.len() > capacity {
                    return Err(SketchError::Deserialization(format!(
                        "{} coupons exceed capacity {}",
                        coupons.len(),
                        capacity
                    )));
                }
                if preamble.kind >> 4 == 0 {
                    HllMode::List(coupons)
                } else {
                    HllMode::Set(set)
                }
            }
            2 => {
                let packed = root.get_registers()?;
                let exceptions: Vec<u32> = root.get_exceptions()?.iter().collect();
                let registers = unpack_registers(target_type, packed, &exceptions, k)?;
                let mut array = HllArray::from_registers(registers);
                let (hip_accum, kxq) = (root.get_hip_accum(), root.get_kxq());
                if !(hip_accum.is_finite() && hip_accum >= 0.0 && kxq.is_finite() && kxq > 0.0) {
                    return Err(SketchError::Deserialization(format!(
                        "Invalid HLL estimator state: hip_accum {}, kxq {}",
                        hip_accum, kxq
                    )));
                }
                array.hip_accum = hip_accum;
                array.kxq = kxq;
                HllMode::Hll(array)
            }
            other => {
                return Err(SketchError::Deserialization(format!(
                    "Unknown HLL mode: {}",
                    other
                )))
            }
        };

        Ok(Self {
            lg_k,
            target_type,
            mode,
            out_of_order: root.get_out_of_order(),
        })
    }
}

fn check_lg_k(lg_k: u8) -> Result<(), SketchError> {
    if !(MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
        return Err(SketchError::Configuration(format!(
            "HLL lg_k must be in [{}, {}], got {}",
            MIN_LG_K, MAX_LG_K, lg_k
        )));
    }
    Ok(())
}

fn check_std_dev(num_std_dev: u8) -> Result<(), SketchError> {
    if !(1..=3).contains(&num_std_dev) {
        return Err(SketchError::InvalidArgument(format!(
            "num_std_dev must be 1, 2 or 3, got {}",
            num_std_dev
        )));
    }
    Ok(())
}

/// Packs registers per target type. Returns the packed bytes and the HLL_4 exceptions.
fn pack_registers(target: TargetHllType, registers: &[u8]) -> (Vec<u8>, Vec<u32>) {
    match target {
        TargetHllType::Hll8 => (registers.to_vec(), Vec::new()),
        TargetHllType::Hll6 => {
            let mut packed = vec![0u8; registers.len() * 3 / 4 + 1];
            for (i, &v) in registers.iter().enumerate() {
                let bit = i * 6;
                let (byte, shift) = (bit / 8, bit % 8);
                let window = u16::from_le_bytes([packed[byte], packed[byte + 1]])
                    | ((v as u16 & 0x3F) << shift);
                let [lo, hi] = window.to_le_bytes();
                packed[byte] = lo;
                packed[byte + 1] = hi;
            }
            (packed, Vec::new())
        }
        TargetHllType::Hll4 => {
            let mut packed = vec![0u8; registers.len() / 2];
            let mut exceptions = Vec::new();
            for (i, &v) in registers.iter().enumerate() {
                let nibble = if v >= HLL4_EXCEPTION {
                    exceptions.push(((i as u32) << 6) | v as u32);
                    HLL4_EXCEPTION
                } else {
                    v
                };
                packed[i / 2] |= nibble << ((i % 2) * 4);
            }
            (packed, exceptions)
        }
    }
}

fn unpack_registers(
    target: TargetHllType,
    packed: &[u8],
    exceptions: &[u32],
    k: usize,
) -> Result<Vec<u8>, SketchError> {
    let expected = match target {
        TargetHllType::Hll8 => k,
        TargetHllType::Hll6 => k * 3 / 4 + 1,
        TargetHllType::Hll4 => k / 2,
    };
    if packed.len() != expected {
        return Err(SketchError::Deserialization(format!(
            "Invalid register bytes for {:?}: expected {}, got {}",
            target,
            expected,
            packed.len()
        )));
    }
    let registers: Vec<u8> = match target {
        TargetHllType::Hll8 => packed.to_vec(),
        TargetHllType::Hll6 => (0..k)
            .map(|i| {
                let bit = i * 6;
                let (byte, shift) = (bit / 8, bit % 8);
                let window = u16::from_le_bytes([packed[byte], packed[byte + 1]]);
                ((window >> shift) & 0x3F) as u8
            })
            .collect(),
        TargetHllType::Hll4 => {
            let mut registers: Vec<u8> = (0..k)
                .map(|i| (packed[i / 2] >> ((i % 2) * 4)) & 0x0F)
                .collect();
            for &exception in exceptions {
                let slot = (exception >> 6) as usize;
                let value = (exception & 0x3F) as u8;
                if slot >= k || registers[slot] != HLL4_EXCEPTION || value < HLL4_EXCEPTION {
                    return Err(SketchError::Deserialization(format!(
                        "Invalid HLL_4 exception for slot {}",
                        slot
                    )));
                }
                registers[slot] = value;
            }
            registers
        }
    };
    if let Some(bad) = registers.iter().find(|&&r| r > MAX_REGISTER_VALUE) {
        return Err(SketchError::Deserialization(format!(
            "Register value out of range: {}",
            bad
        )));
    }
    Ok(registers)
}

/// Union accumulator for HLL sketches of any `lg_k`.
///
/// Dense inputs with more registers than the union are folded down to it; once a
/// narrower dense input arrives the union itself folds down to that width.
#[derive(Debug, Clone)]
pub struct HllUnion {
    lg_max_k: u8,
    gadget: HllSketch,
}

impl HllUnion {
    pub fn new(lg_max_k: u8) -> Result<Self, SketchError> {
        check_lg_k(lg_max_k)?;
        Ok(Self {
            lg_max_k,
            gadget: HllSketch::with_lg_k(lg_max_k, TargetHllType::Hll8),
        })
    }

    pub fn lg_max_k(&self) -> u8 {
        self.lg_max_k
    }

    /// Absorbs a sketch. The input is only read.
    pub fn update(&mut self, sketch: &HllSketch) {
        let src_array = match &sketch.mode {
            HllMode::Hll(array) => array,
            _ => {
                for coupon in sketch.coupons() {
                    self.gadget.insert_coupon(coupon);
                }
                return;
            }
        };

        let lg_src = sketch.lg_k.min(self.lg_max_k);
        if !self.gadget.is_dense() {
            // Rebuild the gadget around the dense input, then replay our coupons.
            let coupons = self.gadget.coupons();
            let registers = fold_registers(&src_array.registers, lg_src);
            let mut gadget = HllSketch::with_lg_k(lg_src, TargetHllType::Hll8);
            gadget.mode = HllMode::Hll(HllArray::from_registers(registers));
            gadget.out_of_order = true;
            for coupon in coupons {
                gadget.insert_coupon(coupon);
            }
            self.gadget = gadget;
            return;
        }

        let gadget_lg = self.gadget.lg_k;
        if lg_src < gadget_lg {
            debug!(
                from = gadget_lg,
                to = lg_src,
                "HLL union downsampled to narrower input"
            );
            self.downsample_gadget(lg_src);
        }
        let lg_dst = self.gadget.lg_k;
        let mask = (1usize << lg_dst) - 1;
        if let HllMode::Hll(dst) = &mut self.gadget.mode {
            for (i, &v) in src_array.registers.iter().enumerate() {
                let slot = &mut dst.registers[i & mask];
                if v > *slot {
                    *slot = v;
                }
            }
            *dst = HllArray::from_registers(std::mem::take(&mut dst.registers));
        }
        self.gadget.out_of_order = true;
    }

    fn downsample_gadget(&mut self, lg_dst: u8) {
        if let HllMode::Hll(array) = &self.gadget.mode {
            let registers = fold_registers(&array.registers, lg_dst);
            self.gadget.lg_k = lg_dst;
            self.gadget.mode = HllMode::Hll(HllArray::from_registers(registers));
        }
    }

    /// Materializes the union as a sketch with the requested storage density.
    pub fn sketch(&self, target_type: TargetHllType) -> HllSketch {
        let mut result = self.gadget.clone();
        result.target_type = target_type;
        if let HllMode::Hll(array) = &mut result.mode {
            array.hip_accum = array.composite_estimate();
        }
        result
    }
}

pub struct HllReader<'a> {
    bytes: &'a [u8],
}

impl<'a> HllReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn lg_k(&self) -> Result<u8, SketchError> {
        Ok(Preamble::parse_expecting(self.bytes, Family::Hll)?.lg_k)
    }
}

impl<'a> SketchReader<'a> for HllReader<'a> {
    fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    fn is_empty(&self) -> Result<bool, SketchError> {
        Ok(Preamble::parse_expecting(self.bytes, Family::Hll)?.is_empty())
    }
}

impl Sketch for HllSketch {
    type Reader<'a> = HllReader<'a>;

    fn merge_from_readers(readers: &[Self::Reader<'_>]) -> Result<Self, SketchError> {
        let lg_max_k = readers
            .iter()
            .map(|r| r.lg_k())
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .max()
            .unwrap_or(DEFAULT_LG_K);
        let mut union = HllUnion::new(lg_max_k)?;
        let mut target_type = TargetHllType::default();
        for reader in readers {
            let sketch = HllSketch::from_capnp_bytes(reader.bytes)?;
            target_type = sketch.target_type;
            union.update(&sketch);
        }
        Ok(union.sketch(target_type))
    }

    fn validate(&self) -> Result<(), SketchError> {
        check_lg_k(self.lg_k)?;
        let k = 1usize << self.lg_k;
        match &self.mode {
            HllMode::List(list) if list.len() > LIST_CAPACITY => {
                Err(SketchError::Configuration(format!(
                    "Coupon list holds {} coupons, capacity is {}",
                    list.len(),
                    LIST_CAPACITY
                )))
            }
            HllMode::Set(set) if set.values().any(|&v| v > MAX_REGISTER_VALUE) => Err(
                SketchError::Configuration("Coupon value out of range".to_string()),
            ),
            HllMode::Hll(array) if array.registers.len() != k => {
                Err(SketchError::Configuration(format!(
                    "Invalid register count: expected {}, got {}",
                    k,
                    array.registers.len()
                )))
            }
            HllMode::Hll(array) if array.registers.iter().any(|&v| v > MAX_REGISTER_VALUE) => {
                Err(SketchError::Configuration(
                    "Register value out of range".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    fn is_empty(&self) -> bool {
        match &self.mode {
            HllMode::List(list) => list.is_empty(),
            HllMode::Set(set) => set.is_empty(),
            HllMode::Hll(array) => array.num_zeros() == array.registers.len(),
        }
    }

    fn to_capnp_bytes(&self) -> Vec<u8> {
        let mut message = Builder::new_default();
        let mut root = message.init_root::<hll_capnp::hll_sketch::Builder>();

        match &self.mode {
            HllMode::Hll(array) => {
                let (packed, exceptions) = pack_registers(self.target_type, &array.registers);
                root.set_registers(&packed);
                let mut list = root.reborrow().init_exceptions(exceptions.len() as u32);
                for (i, e) in exceptions.iter().enumerate() {
                    list.set(i as u32, *e);
                }
                root.set_hip_accum(array.hip_accum);
                root.set_kxq(array.kxq);
            }
            _ => {
                let coupons = self.coupons();
                let mut list = root.reborrow().init_coupons(coupons.len() as u32);
                for (i, c) in coupons.iter().enumerate() {
                    list.set(i as u32, *c);
                }
            }
        }
        root.set_out_of_order(self.out_of_order);

        let preamble = Preamble::new(Family::Hll)
            .with_lg_k(self.lg_k)
            .with_kind((self.mode.code() << 4) | self.target_type.code())
            .empty(Sketch::is_empty(self));
        codec::encode(preamble, &message)
    }
}
