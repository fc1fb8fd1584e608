// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

//! Theta sketches and their set operations.
//!
//! Only [`CompactThetaSketch`] values are accepted by [`ThetaUnion`],
//! [`ThetaIntersection`] and [`ThetaANotB`]; a live [`UpdateThetaSketch`] must be
//! frozen with `compact()` first.

pub mod a_not_b;
pub mod intersection;
pub mod sketch;
pub mod union;

pub use a_not_b::ThetaANotB;
pub use intersection::ThetaIntersection;
pub use sketch::{
    CompactThetaReader, CompactThetaSketch, UpdateThetaSketch, UpdateThetaSketchBuilder,
    MAX_THETA,
};
pub use union::ThetaUnion;
