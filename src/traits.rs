// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Error type for sketch operations
#[derive(Debug, Error)]
pub enum SketchError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Empty sketch: {0}")]
    EmptySketch(String),
    #[error("Incompatible operand: {0}")]
    IncompatibleOperand(String),
}

impl From<capnp::Error> for SketchError {
    fn from(e: capnp::Error) -> Self {
        SketchError::Deserialization(e.to_string())
    }
}

impl From<bincode::Error> for SketchError {
    fn from(e: bincode::Error) -> Self {
        SketchError::Deserialization(e.to_string())
    }
}

/// Sketch Reader trait - provides cheap access to a serialized sketch.
///
/// Readers wrap a borrowed byte buffer and answer questions that only need the
/// preamble, so callers can inspect a buffer without rebuilding the sketch.
pub trait SketchReader<'a> {
    /// The raw serialized bytes (preamble followed by the Cap'n Proto body).
    fn bytes(&self) -> &'a [u8];

    /// Returns true if the serialized sketch has observed nothing.
    fn is_empty(&self) -> Result<bool, SketchError>;
}

/// Core sketch trait - the shape shared by every mergeable sketch family.
///
/// Each family keeps an accumulator that is updated sequentially, can be queried any
/// number of times, and serializes to a self-describing byte buffer.
///
/// # Requirements
///
/// `merge_from_readers` must not depend on reader order beyond the statistical
/// tolerance of the family:
/// - **Commutativity**: `merge([A, B])` estimates like `merge([B, A])`
/// - **Associativity**: `merge([merge([A, B]), C])` estimates like `merge([A, merge([B, C])])`
pub trait Sketch: Clone + Serialize + DeserializeOwned + Send + Sync {
    /// Reader type associated with this sketch.
    type Reader<'a>: SketchReader<'a>
    where
        Self: 'a;

    /// Merges N serialized sketches into a single new sketch instance.
    ///
    /// This is the pathway for combining per-shard sketches: build one sketch per
    /// shard, serialize, then merge the buffers here.
    ///
    /// # Arguments
    /// * `readers` - A slice of readers pointing to serialized sketch states.
    fn merge_from_readers(readers: &[Self::Reader<'_>]) -> Result<Self, SketchError>
    where
        Self: Sized;

    /// Validates the internal consistency of the sketch state.
    ///
    /// Called on states that arrive from outside the crate (for instance JSON) before
    /// they are trusted.
    fn validate(&self) -> Result<(), SketchError>;

    /// Returns true if the sketch has observed nothing.
    fn is_empty(&self) -> bool;

    /// Serializes the sketch: 8-byte preamble followed by a Cap'n Proto message.
    fn to_capnp_bytes(&self) -> Vec<u8>;
}
