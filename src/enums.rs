// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use crate::codec::{Family, Preamble};
use crate::traits::SketchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Enumeration of supported sketch types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SketchType {
    Hll,
    Cpc,
    KllFloat,
    KllDouble,
    FrequentItems,
    Theta,
}

impl SketchType {
    /// The family id this type writes into the preamble.
    pub fn family(&self) -> Family {
        match self {
            SketchType::Hll => Family::Hll,
            SketchType::Cpc => Family::Cpc,
            SketchType::KllFloat | SketchType::KllDouble => Family::Kll,
            SketchType::FrequentItems => Family::FrequentItems,
            SketchType::Theta => Family::CompactTheta,
        }
    }

    /// Reads the preamble of a serialized sketch and reports its type.
    pub fn detect(bytes: &[u8]) -> Result<Self, SketchError> {
        let preamble = Preamble::parse(bytes)?;
        match preamble.family {
            Family::Hll => Ok(SketchType::Hll),
            Family::Cpc => Ok(SketchType::Cpc),
            Family::FrequentItems => Ok(SketchType::FrequentItems),
            Family::CompactTheta => Ok(SketchType::Theta),
            Family::Kll => match preamble.kind {
                crate::kll::KIND_F32 => Ok(SketchType::KllFloat),
                crate::kll::KIND_F64 => Ok(SketchType::KllDouble),
                other => Err(SketchError::Deserialization(format!(
                    "Unknown KLL item kind: {}",
                    other
                ))),
            },
        }
    }
}

impl fmt::Display for SketchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SketchType::Hll => write!(f, "Hll"),
            SketchType::Cpc => write!(f, "Cpc"),
            SketchType::KllFloat => write!(f, "KllFloat"),
            SketchType::KllDouble => write!(f, "KllDouble"),
            SketchType::FrequentItems => write!(f, "FrequentItems"),
            SketchType::Theta => write!(f, "Theta"),
        }
    }
}

impl FromStr for SketchType {
    type Err = SketchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace(['_', '-'], "").to_lowercase().as_str() {
            "hll" | "hyperloglog" => Ok(SketchType::Hll),
            "cpc" => Ok(SketchType::Cpc),
            "kllfloat" | "kllf32" => Ok(SketchType::KllFloat),
            "klldouble" | "kllf64" => Ok(SketchType::KllDouble),
            "frequentitems" | "hh" => Ok(SketchType::FrequentItems),
            "theta" | "compacttheta" => Ok(SketchType::Theta),
            _ => Err(SketchError::InvalidArgument(format!(
                "Unknown sketch type: {}",
                s
            ))),
        }
    }
}
