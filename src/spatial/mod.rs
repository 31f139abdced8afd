//! Spatial data structures for mosaic synthesis
//!
//! This module contains:
//! - Centred cropping and block decomposition of frames
//! - Patch libraries and their provisioning store

/// Crop and block grid layout
pub mod grid;
/// Patch library storage and provisioning
pub mod tiles;

pub use grid::{Block, BlockGrid, decompose};
pub use tiles::{PatchLibrary, PatchLibraryStore};
