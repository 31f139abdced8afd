//! Feature vectors for blocks and library tiles
//!
//! Both sides of a query go through [`feature_vector`], so a block and a tile
//! with identical pixels always map to identical vectors. Layout is
//! channel-major: every red value in row-major pixel order, then every
//! green, then every blue, as raw `0..=255` magnitudes.

use crate::spatial::tiles::PatchLibrary;
use rayon::prelude::*;

/// Colour channels per pixel
pub const CHANNELS: usize = 3;

/// Dimensionality of a feature vector for a block size
pub const fn feature_length(level: u32) -> usize {
    let side = level as usize;
    side * side * CHANNELS
}

/// Convert interleaved RGB pixels (`[r, g, b, r, g, b, ...]`) to a
/// channel-major feature vector
pub fn feature_vector(pixels: &[u8]) -> Vec<f32> {
    let pixel_count = pixels.len() / CHANNELS;
    let mut vector = vec![0.0; pixel_count * CHANNELS];

    for (index, pixel) in pixels.chunks_exact(CHANNELS).enumerate() {
        for (channel, &value) in pixel.iter().enumerate() {
            if let Some(slot) = vector.get_mut(channel * pixel_count + index) {
                *slot = f32::from(value);
            }
        }
    }

    vector
}

/// Feature vectors for every tile of a library, in identifier order
pub fn library_feature_vectors(library: &PatchLibrary) -> Vec<Vec<f32>> {
    (0..library.len())
        .into_par_iter()
        .map(|id| library.tile_pixels(id).map(feature_vector).unwrap_or_default())
        .collect()
}
