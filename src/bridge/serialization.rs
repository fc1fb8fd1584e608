// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use crate::enums::SketchType;
use crate::traits::{Sketch, SketchError};
use crate::*;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub(crate) fn from_json<S: Sketch + DeserializeOwned>(json_value: Value) -> Result<S, SketchError> {
    let sketch: S = serde_json::from_value(json_value)
        .map_err(|e| SketchError::Deserialization(format!("JSON parse error: {}", e)))?;
    sketch.validate()?;
    Ok(sketch)
}

pub(crate) fn to_json<S: Sketch>(sketch: &S) -> Result<Value, SketchError> {
    serde_json::to_value(sketch).map_err(|e| SketchError::Serialization(e.to_string()))
}

/// Fails unless `bytes` carries the preamble of `sketch_type`.
pub(crate) fn expect_type(sketch_type: SketchType, bytes: &[u8]) -> Result<(), SketchError> {
    let found = SketchType::detect(bytes)?;
    if found != sketch_type {
        return Err(SketchError::IncompatibleOperand(format!(
            "Expected a {} sketch, found {}",
            sketch_type, found
        )));
    }
    Ok(())
}

/// Converts a JSON value to serialized bytes for a specific sketch type.
pub fn json_to_capnp_bytes(sketch_type: SketchType, json_value: Value) -> Result<Vec<u8>, SketchError> {
    match sketch_type {
        SketchType::Hll => Ok(from_json::<HllSketch>(json_value)?.to_capnp_bytes()),
        SketchType::Cpc => Ok(from_json::<CpcSketch>(json_value)?.to_capnp_bytes()),
        SketchType::KllFloat => Ok(from_json::<KllFloatSketch>(json_value)?.to_capnp_bytes()),
        SketchType::KllDouble => Ok(from_json::<KllDoubleSketch>(json_value)?.to_capnp_bytes()),
        SketchType::FrequentItems => {
            from_json::<FrequentItemsSketch<Vec<u8>>>(json_value)?.serialize()
        }
        SketchType::Theta => Ok(from_json::<CompactThetaSketch>(json_value)?.to_capnp_bytes()),
    }
}

/// Validates a JSON value against a specific sketch's internal rules.
pub fn validate_json(sketch_type: SketchType, json_value: Value) -> Result<(), SketchError> {
    // Reuse conversion logic for validation
    json_to_capnp_bytes(sketch_type, json_value).map(|_| ())
}

/// Converts serialized bytes back to a JSON value for a specific sketch type.
pub fn capnp_bytes_to_json(sketch_type: SketchType, bytes: &[u8]) -> Result<Value, SketchError> {
    expect_type(sketch_type, bytes)?;
    match sketch_type {
        SketchType::Hll => to_json(&HllSketch::from_capnp_bytes(bytes)?),
        SketchType::Cpc => to_json(&CpcSketch::from_capnp_bytes(bytes)?),
        SketchType::KllFloat => to_json(&KllFloatSketch::from_capnp_bytes(bytes)?),
        SketchType::KllDouble => to_json(&KllDoubleSketch::from_capnp_bytes(bytes)?),
        SketchType::FrequentItems => {
            to_json(&FrequentItemsSketch::<Vec<u8>>::from_capnp_bytes(bytes)?)
        }
        SketchType::Theta => to_json(&CompactThetaSketch::from_capnp_bytes(bytes)?),
    }
}
