// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use crate::bridge::serialization::{
    capnp_bytes_to_json, expect_type, from_json, json_to_capnp_bytes, to_json,
};
use crate::cpc::CpcReader;
use crate::enums::SketchType;
use crate::frequent_items::FrequentItemsReader;
use crate::hll::HllReader;
use crate::kll::KllReader;
use crate::theta::CompactThetaReader;
use crate::traits::{Sketch, SketchError};
use crate::*;
use serde_json::Value;

/// Merges serialized sketches of one type into a single serialized sketch.
pub fn merge_capnp_bytes(sketch_type: SketchType, buffers: &[&[u8]]) -> Result<Vec<u8>, SketchError> {
    if buffers.is_empty() {
        return Err(SketchError::InvalidArgument(
            "At least one buffer is required".to_string(),
        ));
    }
    for bytes in buffers {
        expect_type(sketch_type, bytes)?;
    }

    let merged = match sketch_type {
        SketchType::Hll => {
            let readers: Vec<_> = buffers.iter().map(|b| HllReader::new(b)).collect();
            HllSketch::merge_from_readers(&readers)?.to_capnp_bytes()
        }
        SketchType::Cpc => {
            let readers: Vec<_> = buffers.iter().map(|b| CpcReader::new(b)).collect();
            CpcSketch::merge_from_readers(&readers)?.to_capnp_bytes()
        }
        SketchType::KllFloat => {
            let readers: Vec<_> = buffers.iter().map(|b| KllReader::new(b)).collect();
            KllFloatSketch::merge_from_readers(&readers)?.to_capnp_bytes()
        }
        SketchType::KllDouble => {
            let readers: Vec<_> = buffers.iter().map(|b| KllReader::new(b)).collect();
            KllDoubleSketch::merge_from_readers(&readers)?.to_capnp_bytes()
        }
        SketchType::FrequentItems => {
            let readers: Vec<_> = buffers.iter().map(|b| FrequentItemsReader::new(b)).collect();
            FrequentItemsSketch::<Vec<u8>>::merge_from_readers(&readers)?.serialize()?
        }
        SketchType::Theta => {
            let readers: Vec<_> = buffers.iter().map(|b| CompactThetaReader::new(b)).collect();
            CompactThetaSketch::merge_from_readers(&readers)?.to_capnp_bytes()
        }
    };
    Ok(merged)
}

/// Merges multiple JSON sketch states into a single JSON value.
pub fn merge_json_values(sketch_type: SketchType, values: &[Value]) -> Result<Value, SketchError> {
    if values.is_empty() {
        return Ok(Value::Null);
    }

    match sketch_type {
        // Union sizing depends on every input, so these go through the binary path.
        SketchType::Hll | SketchType::Cpc | SketchType::Theta => {
            let buffers = values
                .iter()
                .map(|v| json_to_capnp_bytes(sketch_type, v.clone()))
                .collect::<Result<Vec<_>, _>>()?;
            let refs: Vec<&[u8]> = buffers.iter().map(Vec::as_slice).collect();
            let merged = merge_capnp_bytes(sketch_type, &refs)?;
            capnp_bytes_to_json(sketch_type, &merged)
        }
        SketchType::KllFloat => {
            let mut base: KllFloatSketch = from_json(values[0].clone())?;
            for val in &values[1..] {
                let other: KllFloatSketch = from_json(val.clone())?;
                base.merge(&other);
            }
            to_json(&base)
        }
        SketchType::KllDouble => {
            let mut base: KllDoubleSketch = from_json(values[0].clone())?;
            for val in &values[1..] {
                let other: KllDoubleSketch = from_json(val.clone())?;
                base.merge(&other);
            }
            to_json(&base)
        }
        SketchType::FrequentItems => {
            let mut base: FrequentItemsSketch<Vec<u8>> = from_json(values[0].clone())?;
            for val in &values[1..] {
                let other: FrequentItemsSketch<Vec<u8>> = from_json(val.clone())?;
                base.merge(&other);
            }
            to_json(&base)
        }
    }
}
