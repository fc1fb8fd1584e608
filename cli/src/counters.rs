// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

//! Line reducers backing each `dsrs` mode.

use std::collections::HashMap;
use std::str;

use anyhow::{anyhow, Context};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use stream_sketches::{CpcSketch, CpcUnion, FrequentItemsSketch};
use tracing::trace;

use crate::stream_reducer::LineReducer;

/// Splits `key rest` at the first space.
fn split_key(line: &[u8]) -> anyhow::Result<(&[u8], &[u8])> {
    let space_ix = memchr::memchr(b' ', line)
        .ok_or_else(|| anyhow!("line missing space: '{}'", String::from_utf8_lossy(line)))?;
    Ok((&line[..space_ix], &line[space_ix + 1..]))
}

/// Count-distinct over lines, backed by a CPC sketch.
#[derive(Debug, Clone)]
pub struct Counter {
    sketch: CpcSketch,
}

impl Default for Counter {
    fn default() -> Self {
        Self {
            sketch: CpcSketch::default(),
        }
    }
}

impl Counter {
    pub fn new(lg_k: u8) -> anyhow::Result<Self> {
        Ok(Self {
            sketch: CpcSketch::new(lg_k)?,
        })
    }

    /// Base64 without padding or newlines.
    pub fn serialize(&self) -> String {
        STANDARD_NO_PAD.encode(self.sketch.serialize())
    }

    pub fn deserialize(s: &str) -> anyhow::Result<Self> {
        let bytes = STANDARD_NO_PAD
            .decode(s.trim())
            .context("sketch is not valid unpadded base64")?;
        let sketch = CpcSketch::deserialize(&bytes)?;
        Ok(Self { sketch })
    }

    pub fn estimate(&self) -> f64 {
        self.sketch.estimate()
    }
}

impl LineReducer for Counter {
    fn read_line(&mut self, line: &[u8]) -> anyhow::Result<()> {
        self.sketch.update(line);
        Ok(())
    }
}

/// Count-distinct of the rest of each line, grouped by its first word.
#[derive(Debug)]
pub struct KeyedCounter {
    lg_k: u8,
    sketches: HashMap<Vec<u8>, Counter>,
}

impl KeyedCounter {
    pub fn new(lg_k: u8) -> anyhow::Result<Self> {
        // Fail on a bad lg_k before any input is read.
        Counter::new(lg_k)?;
        Ok(Self {
            lg_k,
            sketches: HashMap::new(),
        })
    }

    /// Every key with its counter.
    pub fn state(&self) -> impl Iterator<Item = (&[u8], &Counter)> {
        self.sketches.iter().map(|(key, ctr)| (key.as_slice(), ctr))
    }
}

impl LineReducer for KeyedCounter {
    fn read_line(&mut self, line: &[u8]) -> anyhow::Result<()> {
        let (key, value) = split_key(line)?;
        if !self.sketches.contains_key(key) {
            trace!(key = %String::from_utf8_lossy(key), "new key");
            self.sketches.insert(key.to_vec(), Counter::new(self.lg_k)?);
        }
        if let Some(counter) = self.sketches.get_mut(key) {
            counter.read_line(value)?;
        }
        Ok(())
    }
}

/// Unions base64 sketches, one per line.
#[derive(Debug, Clone)]
pub struct Merger {
    union: CpcUnion,
}

impl Default for Merger {
    fn default() -> Self {
        Self {
            union: CpcUnion::default(),
        }
    }
}

impl Merger {
    pub fn new(lg_k: u8) -> anyhow::Result<Self> {
        Ok(Self {
            union: CpcUnion::new(lg_k)?,
        })
    }

    pub fn counter(&self) -> Counter {
        Counter {
            sketch: self.union.sketch(),
        }
    }
}

impl LineReducer for Merger {
    fn read_line(&mut self, line: &[u8]) -> anyhow::Result<()> {
        let line = str::from_utf8(line).context("sketch line is not valid UTF-8")?;
        let counter = Counter::deserialize(line)?;
        self.union.update(&counter.sketch);
        Ok(())
    }
}

/// Unions base64 sketches grouped by the first word of each line.
#[derive(Debug)]
pub struct KeyedMerger {
    lg_k: u8,
    mergers: HashMap<Vec<u8>, Merger>,
}

impl KeyedMerger {
    pub fn new(lg_k: u8) -> anyhow::Result<Self> {
        Merger::new(lg_k)?;
        Ok(Self {
            lg_k,
            mergers: HashMap::new(),
        })
    }

    pub fn state(&self) -> impl Iterator<Item = (&[u8], Counter)> + '_ {
        self.mergers
            .iter()
            .map(|(key, merger)| (key.as_slice(), merger.counter()))
    }
}

impl LineReducer for KeyedMerger {
    fn read_line(&mut self, line: &[u8]) -> anyhow::Result<()> {
        let (key, value) = split_key(line)?;
        if !self.mergers.contains_key(key) {
            self.mergers.insert(key.to_vec(), Merger::new(self.lg_k)?);
        }
        if let Some(merger) = self.mergers.get_mut(key) {
            merger.read_line(value)?;
        }
        Ok(())
    }
}

/// Approximate top-k lines.
#[derive(Debug)]
pub struct HeavyHitter {
    sketch: FrequentItemsSketch<Vec<u8>>,
    k: u64,
}

fn log2_floor(x: u64) -> u32 {
    63 - x.leading_zeros()
}

impl HeavyHitter {
    /// Reserves `O(k)` space: a map of `2^(max(floor(log2 k), 1) + 2)` slots.
    pub fn new(k: u64) -> anyhow::Result<Self> {
        if k == 0 {
            anyhow::bail!("--hh needs k >= 1");
        }
        let lg2_k_with_room = log2_floor(k).max(1) + 2;
        let lg2_k = u8::try_from(lg2_k_with_room).context("k is too large")?;
        Ok(Self {
            sketch: FrequentItemsSketch::new(lg2_k)?,
            k,
        })
    }

    /// `(line, upper bound on its count)` for the top k by upper bound.
    pub fn estimate(&self) -> Vec<(Vec<u8>, u64)> {
        let mut rows = self.sketch.estimate_no_fn();
        rows.sort_by(|a, b| b.upper_bound.cmp(&a.upper_bound));
        rows.into_iter()
            .take(self.k as usize)
            .map(|row| (row.item, row.upper_bound))
            .collect()
    }
}

impl LineReducer for HeavyHitter {
    fn read_line(&mut self, line: &[u8]) -> anyhow::Result<()> {
        self.sketch.update(line, 1);
        Ok(())
    }
}
