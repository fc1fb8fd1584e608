// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

pub mod merging;
pub mod serialization;

use crate::enums::SketchType;
use crate::traits::SketchError;
use serde_json::Value;

/// A bridge between Serde-compatible sketch states and the binary wire format.
///
/// JSON states are validated before they are encoded, so a state assembled outside
/// the crate never reaches the binary form unchecked. Frequent-items sketches cross
/// the bridge with raw byte items (`FrequentItemsSketch<Vec<u8>>`).
///
/// # Example
///
/// ```
/// use stream_sketches::{HllSketch, SerdeCapnpBridge, SketchType, TargetHllType};
///
/// let mut hll = HllSketch::new(10, TargetHllType::Hll4).unwrap();
/// hll.update(b"apple");
/// let json = serde_json::to_value(&hll).unwrap();
///
/// let bytes = SerdeCapnpBridge::json_to_capnp_bytes(SketchType::Hll, json).unwrap();
/// assert_eq!(SerdeCapnpBridge::detect_type(&bytes).unwrap(), SketchType::Hll);
/// ```
pub struct SerdeCapnpBridge;

impl SerdeCapnpBridge {
    /// Converts a JSON value to serialized bytes for a specific sketch type.
    pub fn json_to_capnp_bytes(
        sketch_type: SketchType,
        json_value: Value,
    ) -> Result<Vec<u8>, SketchError> {
        serialization::json_to_capnp_bytes(sketch_type, json_value)
    }

    /// Validates a JSON value against a specific sketch's internal rules.
    pub fn validate_json(sketch_type: SketchType, json_value: Value) -> Result<(), SketchError> {
        serialization::validate_json(sketch_type, json_value)
    }

    /// Converts serialized bytes back to a JSON value for a specific sketch type.
    pub fn capnp_bytes_to_json(sketch_type: SketchType, bytes: &[u8]) -> Result<Value, SketchError> {
        serialization::capnp_bytes_to_json(sketch_type, bytes)
    }

    /// Merges serialized sketches of one type into a single serialized sketch.
    pub fn merge_capnp_bytes(
        sketch_type: SketchType,
        buffers: &[&[u8]],
    ) -> Result<Vec<u8>, SketchError> {
        merging::merge_capnp_bytes(sketch_type, buffers)
    }

    /// Merges multiple JSON sketch states into a single JSON value.
    pub fn merge_json_values(sketch_type: SketchType, values: &[Value]) -> Result<Value, SketchError> {
        merging::merge_json_values(sketch_type, values)
    }

    /// Reports the sketch type written in a buffer's preamble.
    pub fn detect_type(bytes: &[u8]) -> Result<SketchType, SketchError> {
        SketchType::detect(bytes)
    }
}
