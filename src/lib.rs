//! # stream-sketches
//!
//! Approximate, sublinear-space summaries of data streams: cardinality (HLL, CPC),
//! quantiles (KLL), heavy hitters (frequent items) and set algebra over distinct
//! values (theta). Every sketch serializes to an 8-byte preamble followed by a
//! Cap'n Proto message, and sketches of one family merge straight from those buffers.

pub mod bridge;
pub mod codec;
pub mod cpc;
pub mod enums;
pub mod frequent_items;
pub mod hashing;
pub mod hll;
pub mod kll;
pub mod theta;
pub mod traits;

// Re-export core traits
pub use traits::{Sketch, SketchError, SketchReader};

pub use bridge::SerdeCapnpBridge;
pub use cpc::{CpcReader, CpcSketch, CpcUnion};
pub use enums::SketchType;
pub use frequent_items::{FrequentItemsReader, FrequentItemsRow, FrequentItemsSketch};
pub use hll::{HllReader, HllSketch, HllUnion, TargetHllType};
pub use kll::{KllDoubleSketch, KllFloatSketch, KllReader, KllSketch};
pub use theta::{
    CompactThetaReader, CompactThetaSketch, ThetaANotB, ThetaIntersection, ThetaUnion,
    UpdateThetaSketch, UpdateThetaSketchBuilder,
};

// Include generated Cap'n Proto modules
pub mod hll_capnp {
    include!(concat!(env!("OUT_DIR"), "/proto/hll_capnp.rs"));
}
pub mod cpc_capnp {
    include!(concat!(env!("OUT_DIR"), "/proto/cpc_capnp.rs"));
}
pub mod kll_capnp {
    include!(concat!(env!("OUT_DIR"), "/proto/kll_capnp.rs"));
}
pub mod frequent_items_capnp {
    include!(concat!(env!("OUT_DIR"), "/proto/frequent_items_capnp.rs"));
}
pub mod theta_capnp {
    include!(concat!(env!("OUT_DIR"), "/proto/theta_capnp.rs"));
}
