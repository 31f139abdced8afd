//! Photomosaic synthesis from a precomputed patch library
//!
//! A source image is cropped to a multiple of the block size, split into
//! blocks, and every block is replaced by the library tile whose pixels are
//! closest under approximate nearest-neighbour search. Animated inputs are
//! processed frame by frame and reassembled with their original timing.

#![forbid(unsafe_code)]

/// Index cache, mosaic composition and the frame pipeline
pub mod algorithm;
/// Feature vectors derived from blocks and tiles
pub mod analysis;
/// Nearest-neighbour indices and their provisioning
pub mod index;
/// Input/output operations, configuration and error handling
pub mod io;
/// Distance and probability utilities
pub mod math;
/// Block decomposition and patch library storage
pub mod spatial;

pub use algorithm::executor::{FramePipeline, RequestContext};
pub use io::configuration::MosaicConfig;
pub use io::error::{MosaicError, Result};
