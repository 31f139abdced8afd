//! Centred cropping and block decomposition of source frames
//!
//! Each axis is cropped independently to the largest multiple of the block
//! size, keeping the crop centred (the odd pixel, if any, is dropped from the
//! far edge). The cropped region is then covered exactly by non-overlapping
//! `level × level` blocks in row-major order.

use crate::io::error::{Result, invalid_request};
use image::RgbImage;

/// Start and end (exclusive) of the centred crop of an axis of size `axis`
/// to a multiple of `level`
///
/// A zero `level` leaves the axis untouched.
pub const fn slice_params(axis: u32, level: u32) -> (u32, u32) {
    if level == 0 {
        return (0, axis);
    }
    let new_size = (axis / level) * level;
    let start = (axis - new_size) / 2;
    (start, start + new_size)
}

/// Rectangle of the source frame retained by the crop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    /// Left edge in source pixels
    pub x: u32,
    /// Top edge in source pixels
    pub y: u32,
    /// Cropped width, a multiple of the block size
    pub width: u32,
    /// Cropped height, a multiple of the block size
    pub height: u32,
}

/// One block of the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Block row within the grid
    pub row: u32,
    /// Block column within the grid
    pub col: u32,
    /// Left edge in source pixels
    pub source_x: u32,
    /// Top edge in source pixels
    pub source_y: u32,
}

impl Block {
    /// Left edge within the cropped canvas
    pub const fn canvas_x(&self, level: u32) -> u32 {
        self.col * level
    }

    /// Top edge within the cropped canvas
    pub const fn canvas_y(&self, level: u32) -> u32 {
        self.row * level
    }
}

/// Grid of blocks covering a centred crop of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGrid {
    level: u32,
    crop: CropRegion,
}

impl BlockGrid {
    /// Lay out the grid for a frame of `width × height`
    ///
    /// # Errors
    ///
    /// Returns an invalid request error if `level` is zero or the frame is
    /// smaller than one block along either axis.
    pub fn new(width: u32, height: u32, level: u32) -> Result<Self> {
        if level == 0 {
            return Err(invalid_request(&"block size must be positive"));
        }
        if width < level || height < level {
            return Err(invalid_request(&format!(
                "image of {width}x{height} is smaller than the {level}x{level} block size"
            )));
        }

        let (x, x_end) = slice_params(width, level);
        let (y, y_end) = slice_params(height, level);

        Ok(Self {
            level,
            crop: CropRegion {
                x,
                y,
                width: x_end - x,
                height: y_end - y,
            },
        })
    }

    /// Block size
    pub const fn level(&self) -> u32 {
        self.level
    }

    /// Retained region of the source frame
    pub const fn crop(&self) -> CropRegion {
        self.crop
    }

    /// Top-left corner of the crop in source pixels
    pub const fn origin(&self) -> (u32, u32) {
        (self.crop.x, self.crop.y)
    }

    /// Number of block rows
    pub const fn rows(&self) -> u32 {
        self.crop.height / self.level
    }

    /// Number of block columns
    pub const fn cols(&self) -> u32 {
        self.crop.width / self.level
    }

    /// Total number of blocks
    pub const fn len(&self) -> usize {
        self.rows() as usize * self.cols() as usize
    }

    /// Whether the grid has no blocks (never true for a constructed grid)
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block at a grid position
    pub const fn block(&self, row: u32, col: u32) -> Block {
        Block {
            row,
            col,
            source_x: self.crop.x + col * self.level,
            source_y: self.crop.y + row * self.level,
        }
    }

    /// All blocks in row-major order
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        (0..self.rows()).flat_map(move |row| (0..self.cols()).map(move |col| self.block(row, col)))
    }

    /// Blocks of one grid row, left to right
    pub fn row_blocks(&self, row: u32) -> impl Iterator<Item = Block> + '_ {
        (0..self.cols()).map(move |col| self.block(row, col))
    }
}

/// Lay out the block grid for a frame
///
/// # Errors
///
/// Returns an invalid request error if the frame is smaller than one block.
pub fn decompose(frame: &RgbImage, level: u32) -> Result<BlockGrid> {
    BlockGrid::new(frame.width(), frame.height(), level)
}

/// Interleaved RGB bytes of one block, row-major, read from the source frame
pub fn block_pixels(frame: &RgbImage, block: &Block, level: u32) -> Vec<u8> {
    let side = level as usize;
    let frame_width = frame.width() as usize;
    let raw = frame.as_raw();
    let mut pixels = Vec::with_capacity(side * side * 3);

    for dy in 0..side {
        let start = ((block.source_y as usize + dy) * frame_width + block.source_x as usize) * 3;
        if let Some(row) = raw.get(start..start + side * 3) {
            pixels.extend_from_slice(row);
        }
    }

    pixels
}

/// Copy of the cropped region of a frame
pub fn crop_frame(frame: &RgbImage, grid: &BlockGrid) -> RgbImage {
    let crop = grid.crop();
    image::imageops::crop_imm(frame, crop.x, crop.y, crop.width, crop.height).to_image()
}
