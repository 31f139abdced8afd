//! Block-by-block replacement of a frame with library tiles
//!
//! Each block row of the canvas is a disjoint horizontal strip, so rows are
//! composed in parallel with no locking; blocks within a row are processed
//! left to right.

use crate::analysis::features::{CHANNELS, feature_vector};
use crate::index::{LevelEntry, NearestNeighborIndex};
use crate::io::error::{MosaicError, Result, computation_error};
use crate::spatial::grid::{BlockGrid, block_pixels, decompose};
use image::RgbImage;
use rayon::prelude::*;

/// A composed frame and the tile chosen for every block
#[derive(Debug, Clone)]
pub struct ComposedFrame {
    /// Canvas covering the cropped region, tile pixels copied verbatim
    pub image: RgbImage,
    /// Chosen tile identifier per block, row-major
    pub tile_ids: Vec<usize>,
}

/// Replace every block of `grid` in `frame` with its nearest library tile
///
/// # Errors
///
/// Returns a computation error if the entry serves a different block size or
/// the index yields no match for a block.
pub fn compose<I: NearestNeighborIndex>(
    frame: &RgbImage,
    grid: &BlockGrid,
    entry: &LevelEntry<I>,
) -> Result<ComposedFrame> {
    let level = grid.level();
    if entry.level() != level {
        return Err(computation_error(
            "compose",
            &format!(
                "grid uses {level}px blocks but the entry serves {}px tiles",
                entry.level()
            ),
        ));
    }

    let crop = grid.crop();
    let side = level as usize;
    let canvas_width = crop.width as usize;
    let strip_len = canvas_width * side * CHANNELS;
    let cols = grid.cols() as usize;

    let mut canvas = vec![0_u8; strip_len * grid.rows() as usize];
    let mut tile_ids = vec![0_usize; grid.len()];

    canvas
        .par_chunks_mut(strip_len)
        .zip(tile_ids.par_chunks_mut(cols))
        .enumerate()
        .try_for_each(|(row, (strip, ids))| {
            for (block, slot) in grid.row_blocks(row as u32).zip(ids.iter_mut()) {
                let vector = feature_vector(&block_pixels(frame, &block, level));
                let id = entry.nearest(&vector).ok_or_else(|| {
                    computation_error(
                        "nearest patch",
                        &format!("no match for block ({}, {})", block.row, block.col),
                    )
                })?;
                let tile = entry.library().tile_pixels(id).ok_or_else(|| {
                    computation_error(
                        "nearest patch",
                        &format!("index returned unknown tile {id}"),
                    )
                })?;

                paste_tile(strip, tile, block.canvas_x(level) as usize, canvas_width, side);
                *slot = id;
            }
            Ok::<(), MosaicError>(())
        })?;

    let image = RgbImage::from_raw(crop.width, crop.height, canvas)
        .ok_or_else(|| computation_error("compose", &"canvas size mismatch"))?;

    Ok(ComposedFrame { image, tile_ids })
}

/// Decompose `frame` at the entry's block size and compose it
///
/// # Errors
///
/// Returns an invalid request error if the frame is smaller than one block,
/// or any error from [`compose`].
pub fn compose_frame<I: NearestNeighborIndex>(
    frame: &RgbImage,
    entry: &LevelEntry<I>,
) -> Result<ComposedFrame> {
    let grid = decompose(frame, entry.level())?;
    compose(frame, &grid, entry)
}

/// Copy one tile into a block-row strip at horizontal pixel offset `x`
fn paste_tile(strip: &mut [u8], tile: &[u8], x: usize, canvas_width: usize, side: usize) {
    let row_bytes = side * CHANNELS;
    for (dy, tile_row) in tile.chunks_exact(row_bytes).enumerate() {
        let start = (dy * canvas_width + x) * CHANNELS;
        if let Some(dest) = strip.get_mut(start..start + row_bytes) {
            dest.copy_from_slice(tile_row);
        }
    }
}
