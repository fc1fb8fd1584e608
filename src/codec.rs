// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

//! Binary framing shared by every sketch family.
//!
//! A serialized sketch is an 8-byte preamble followed by a Cap'n Proto message:
//!
//! ```text
//! byte 0  preamble length (always 8)
//! byte 1  serial version
//! byte 2  family id
//! byte 3  lg_k / lg2_k (0 when unused)
//! byte 4  k, low byte
//! byte 5  k, high byte
//! byte 6  flags (bit 0: empty)
//! byte 7  family specific kind
//! ```

use crate::traits::SketchError;
use capnp::message::{Builder, HeapAllocator, Reader, ReaderOptions};
use capnp::serialize::{self, OwnedSegments};

pub const PREAMBLE_BYTES: usize = 8;
pub const SERIAL_VERSION: u8 = 1;

pub const FLAG_EMPTY: u8 = 0x01;

/// Family identifiers written into byte 2 of the preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Family {
    CompactTheta = 3,
    Hll = 7,
    FrequentItems = 10,
    Kll = 15,
    Cpc = 16,
}

impl Family {
    pub fn from_id(id: u8) -> Result<Self, SketchError> {
        match id {
            3 => Ok(Family::CompactTheta),
            7 => Ok(Family::Hll),
            10 => Ok(Family::FrequentItems),
            15 => Ok(Family::Kll),
            16 => Ok(Family::Cpc),
            other => Err(SketchError::Deserialization(format!(
                "Unknown sketch family id: {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Family::CompactTheta => "CompactTheta",
            Family::Hll => "HLL",
            Family::FrequentItems => "FrequentItems",
            Family::Kll => "KLL",
            Family::Cpc => "CPC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    pub family: Family,
    pub lg_k: u8,
    pub k: u16,
    pub flags: u8,
    pub kind: u8,
}

impl Preamble {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            lg_k: 0,
            k: 0,
            flags: 0,
            kind: 0,
        }
    }

    pub fn with_lg_k(mut self, lg_k: u8) -> Self {
        self.lg_k = lg_k;
        self
    }

    pub fn with_k(mut self, k: u16) -> Self {
        self.k = k;
        self
    }

    pub fn with_kind(mut self, kind: u8) -> Self {
        self.kind = kind;
        self
    }

    pub fn empty(mut self, empty: bool) -> Self {
        if empty {
            self.flags |= FLAG_EMPTY;
        } else {
            self.flags &= !FLAG_EMPTY;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.flags & FLAG_EMPTY != 0
    }

    fn to_bytes(self) -> [u8; PREAMBLE_BYTES] {
        let [k_lo, k_hi] = self.k.to_le_bytes();
        [
            PREAMBLE_BYTES as u8,
            SERIAL_VERSION,
            self.family as u8,
            self.lg_k,
            k_lo,
            k_hi,
            self.flags,
            self.kind,
        ]
    }

    /// Parses the preamble without checking which family it names.
    pub fn parse(bytes: &[u8]) -> Result<Self, SketchError> {
        if bytes.len() < PREAMBLE_BYTES {
            return Err(SketchError::Deserialization(format!(
                "Buffer too short for preamble: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] as usize != PREAMBLE_BYTES {
            return Err(SketchError::Deserialization(format!(
                "Invalid preamble length: {}",
                bytes[0]
            )));
        }
        if bytes[1] != SERIAL_VERSION {
            return Err(SketchError::Deserialization(format!(
                "Unsupported serial version: {}",
                bytes[1]
            )));
        }
        Ok(Self {
            family: Family::from_id(bytes[2])?,
            lg_k: bytes[3],
            k: u16::from_le_bytes([bytes[4], bytes[5]]),
            flags: bytes[6],
            kind: bytes[7],
        })
    }

    /// Parses the preamble and checks that it belongs to `expected`.
    pub fn parse_expecting(bytes: &[u8], expected: Family) -> Result<Self, SketchError> {
        let preamble = Self::parse(bytes)?;
        if preamble.family != expected {
            return Err(SketchError::Deserialization(format!(
                "Expected {} sketch, found {}",
                expected.name(),
                preamble.family.name()
            )));
        }
        Ok(preamble)
    }
}

/// Writes the preamble followed by the Cap'n Proto message.
pub fn encode(preamble: Preamble, message: &Builder<HeapAllocator>) -> Vec<u8> {
    let mut data = Vec::with_capacity(PREAMBLE_BYTES + 64);
    data.extend_from_slice(&preamble.to_bytes());
    serialize::write_message(&mut data, message).expect("writing into a Vec should not fail");
    data
}

/// Words a reader may traverse per word of body, above the capnp default budget.
const TRAVERSAL_FACTOR: usize = 4;

/// Default capnp limits, widened for bodies larger than the default budget.
fn reader_options(body_bytes: usize) -> ReaderOptions {
    let mut options = ReaderOptions::new();
    let scaled = (body_bytes / 8 + 1).saturating_mul(TRAVERSAL_FACTOR);
    if let Some(default) = options.traversal_limit_in_words {
        options.traversal_limit_in_words = Some(default.max(scaled));
    }
    options
}

/// Splits a buffer into its preamble and an opened Cap'n Proto message.
pub fn decode(
    bytes: &[u8],
    expected: Family,
) -> Result<(Preamble, Reader<OwnedSegments>), SketchError> {
    let preamble = Preamble::parse_expecting(bytes, expected)?;
    let mut body = &bytes[PREAMBLE_BYTES..];
    let message = serialize::read_message(&mut body, reader_options(body.len()))?;
    Ok((preamble, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_layout() {
        let preamble = Preamble::new(Family::Kll)
            .with_k(200)
            .with_kind(1)
            .empty(true);
        let bytes = preamble.to_bytes();
        assert_eq!(bytes, [8, 1, 15, 0, 200, 0, 1, 1]);
        assert_eq!(Preamble::parse(&bytes).unwrap(), preamble);
    }

    #[test]
    fn test_rejects_bad_preambles() {
        assert!(Preamble::parse(&[8, 1, 7]).is_err());
        assert!(Preamble::parse(&[9, 1, 7, 0, 0, 0, 0, 0]).is_err());
        assert!(Preamble::parse(&[8, 2, 7, 0, 0, 0, 0, 0]).is_err());
        assert!(Preamble::parse(&[8, 1, 99, 0, 0, 0, 0, 0]).is_err());
        assert!(Preamble::parse_expecting(&[8, 1, 7, 12, 0, 0, 0, 0], Family::Cpc).is_err());
    }

    #[test]
    fn test_truncated_body() {
        let mut message = Builder::new_default();
        message.init_root::<crate::theta_capnp::compact_theta::Builder>();
        let bytes = encode(Preamble::new(Family::CompactTheta), &message);
        assert!(decode(&bytes, Family::CompactTheta).is_ok());
        assert!(decode(&bytes[..bytes.len() - 3], Family::CompactTheta).is_err());
    }

    #[test]
    fn test_traversal_limit_tracks_body_size() {
        let small = reader_options(64);
        assert_eq!(small.traversal_limit_in_words, ReaderOptions::new().traversal_limit_in_words);
        assert!(small.traversal_limit_in_words.is_some());

        let large = reader_options(1 << 30);
        assert_eq!(large.traversal_limit_in_words, Some(((1 << 27) + 1) * TRAVERSAL_FACTOR));
        assert_eq!(large.nesting_limit, small.nesting_limit);
    }
}
