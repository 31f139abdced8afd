//! Patch libraries and their local/remote provisioning
//!
//! A library holds every candidate tile for one block size as a
//! `(N, level, level, 3)` byte array. The store keeps a local copy of each
//! level's array (and serialized index) and downloads missing objects from
//! blob storage on first use.

use crate::io::blob::{BlobError, BlobStore, store_for_endpoint};
use crate::io::configuration::{MosaicConfig, index_object_name, patches_object_name};
use crate::io::error::{MosaicError, Result, file_system_error, provisioning_error};
use crate::io::npy::{decode_npy, encode_npy};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use ndarray::Array4;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Colour channels stored per tile pixel
const TILE_CHANNELS: usize = 3;

/// Immutable set of `level × level` RGB tiles, identified by position
#[derive(Debug, Clone, PartialEq)]
pub struct PatchLibrary {
    level: u32,
    tiles: Array4<u8>,
}

impl PatchLibrary {
    /// Wrap a `(N, level, level, 3)` array
    ///
    /// # Errors
    ///
    /// Returns a provisioning error if the array is empty or any dimension
    /// disagrees with `level`.
    pub fn new(level: u32, tiles: Array4<u8>) -> Result<Self> {
        let (count, height, width, channels) = tiles.dim();
        let side = level as usize;
        if count == 0 {
            return Err(provisioning_error(level, "validate library", &"library is empty"));
        }
        if height != side || width != side || channels != TILE_CHANNELS {
            return Err(provisioning_error(
                level,
                "validate library",
                &format!(
                    "tiles are {height}x{width}x{channels}, expected {side}x{side}x{TILE_CHANNELS}"
                ),
            ));
        }

        // Tile slices are taken from the contiguous buffer
        let tiles = if tiles.is_standard_layout() {
            tiles
        } else {
            tiles.as_standard_layout().into_owned()
        };

        Ok(Self { level, tiles })
    }

    /// Decode a library from `.npy` bytes
    ///
    /// # Errors
    ///
    /// Returns a provisioning error if the payload is not a valid `uint8`
    /// array of shape `(N, level, level, 3)`.
    pub fn from_npy(level: u32, bytes: &[u8]) -> Result<Self> {
        let array = decode_npy(bytes).map_err(|e| provisioning_error(level, "parse library", &e))?;
        let [count, height, width, channels] = <[usize; 4]>::try_from(array.shape.as_slice())
            .map_err(|e| {
                provisioning_error(
                    level,
                    "parse library",
                    &format!("shape {:?} is not 4-dimensional: {e}", array.shape),
                )
            })?;

        let tiles = Array4::from_shape_vec((count, height, width, channels), array.data)
            .map_err(|e| provisioning_error(level, "parse library", &e))?;
        Self::new(level, tiles)
    }

    /// Build a library from tile images, each exactly `level × level`
    ///
    /// # Errors
    ///
    /// Returns a provisioning error if any tile has the wrong size or no
    /// tiles are given.
    pub fn from_tiles(level: u32, tiles: &[RgbImage]) -> Result<Self> {
        let side = level as usize;
        let mut data = Vec::with_capacity(tiles.len() * side * side * TILE_CHANNELS);
        for (id, tile) in tiles.iter().enumerate() {
            if tile.dimensions() != (level, level) {
                return Err(provisioning_error(
                    level,
                    "pack library",
                    &format!(
                        "tile {id} is {}x{}, expected {level}x{level}",
                        tile.width(),
                        tile.height()
                    ),
                ));
            }
            data.extend_from_slice(tile.as_raw());
        }

        let array = Array4::from_shape_vec((tiles.len(), side, side, TILE_CHANNELS), data)
            .map_err(|e| provisioning_error(level, "pack library", &e))?;
        Self::new(level, array)
    }

    /// Encode the library as `.npy` bytes
    pub fn to_npy(&self) -> Vec<u8> {
        let (count, height, width, channels) = self.tiles.dim();
        encode_npy(
            &[count, height, width, channels],
            self.tiles.as_slice().unwrap_or(&[]),
        )
    }

    /// Block size this library serves
    pub const fn level(&self) -> u32 {
        self.level
    }

    /// Number of tiles
    pub fn len(&self) -> usize {
        self.tiles.dim().0
    }

    /// Whether the library holds no tiles (never true for a validated library)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Array shape `(N, level, level, 3)`
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        self.tiles.dim()
    }

    /// Interleaved RGB bytes of tile `id`, row-major
    pub fn tile_pixels(&self, id: usize) -> Option<&[u8]> {
        let stride = self.tile_stride();
        self.tiles
            .as_slice()
            .and_then(|data| data.get(id * stride..(id + 1) * stride))
    }

    /// Tile `id` as an image
    pub fn tile_image(&self, id: usize) -> Option<RgbImage> {
        self.tile_pixels(id)
            .and_then(|pixels| RgbImage::from_raw(self.level, self.level, pixels.to_vec()))
    }

    /// Bytes per tile
    pub const fn tile_stride(&self) -> usize {
        let side = self.level as usize;
        side * side * TILE_CHANNELS
    }
}

/// Centre square crop of `image` resized to a `level × level` RGB tile
pub fn square_tile(image: &DynamicImage, level: u32) -> RgbImage {
    let side = image.width().min(image.height());
    let x = (image.width() - side) / 2;
    let y = (image.height() - side) / 2;
    image
        .crop_imm(x, y, side, side)
        .resize_exact(level, level, FilterType::Lanczos3)
        .to_rgb8()
}

/// Local cache of patch arrays backed by remote blob storage
pub struct PatchLibraryStore {
    blob: Arc<dyn BlobStore>,
    bucket: Option<String>,
    patches_dir: PathBuf,
    index_dir: PathBuf,
    object_prefix: String,
}

impl PatchLibraryStore {
    /// Create a store with an explicit blob backend
    pub fn new(config: &MosaicConfig, blob: Arc<dyn BlobStore>) -> Self {
        Self {
            blob,
            bucket: config.bucket.clone(),
            patches_dir: config.patches_path.clone(),
            index_dir: config.index_path.clone(),
            object_prefix: config.object_prefix.clone(),
        }
    }

    /// Create a store whose backend is chosen from the configured endpoint
    pub fn from_config(config: &MosaicConfig) -> Self {
        Self::new(config, Arc::from(store_for_endpoint(&config.blob_endpoint)))
    }

    /// Local path of a level's patch array
    pub fn library_path(&self, level: u32) -> PathBuf {
        self.patches_dir
            .join(patches_object_name(&self.object_prefix, level))
    }

    /// Local path of a level's serialized index
    pub fn index_path(&self, level: u32) -> PathBuf {
        self.index_dir
            .join(index_object_name(&self.object_prefix, level))
    }

    /// Load a level's library, downloading the array (and the index, if it
    /// is also missing) on first use
    ///
    /// # Errors
    ///
    /// Returns an error if no bucket is configured for a missing array, the
    /// download fails, or the cached array is corrupted. A corrupted local
    /// copy is removed so a retry downloads it again.
    pub fn fetch(&self, level: u32) -> Result<PatchLibrary> {
        let library_path = self.library_path(level);

        if library_path.exists() {
            debug!(level, path = %library_path.display(), "patch array cached locally");
        } else {
            let bucket = self.bucket.as_deref().ok_or_else(|| {
                provisioning_error(
                    level,
                    "locate remote storage",
                    &"patch array is not cached and no bucket is configured",
                )
            })?;

            let object = patches_object_name(&self.object_prefix, level);
            self.download(bucket, &object, &library_path)?;

            let index_path = self.index_path(level);
            if !index_path.exists() {
                let index_object = index_object_name(&self.object_prefix, level);
                match self.download(bucket, &index_object, &index_path) {
                    Ok(()) => {}
                    Err(MosaicError::Storage {
                        source: BlobError::NotFound,
                        ..
                    }) => {
                        debug!(level, "no remote index; it will be built locally");
                    }
                    Err(err) => {
                        warn!(level, error = %err, "index download failed; it will be built locally");
                    }
                }
            }
        }

        let bytes = std::fs::read(&library_path)
            .map_err(file_system_error(&library_path, "read patch array"))?;
        PatchLibrary::from_npy(level, &bytes).inspect_err(|err| {
            warn!(level, error = %err, "discarding corrupted patch array");
            let _ = std::fs::remove_file(&library_path);
        })
    }

    fn download(&self, bucket: &str, object: &str, destination: &Path) -> Result<()> {
        info!(bucket, object, destination = %destination.display(), "downloading object");

        let bytes = self
            .blob
            .get(bucket, object)
            .map_err(|source| MosaicError::Storage {
                bucket: bucket.to_string(),
                object: object.to_string(),
                source,
            })?;

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(file_system_error(parent, "create directory"))?;
        }

        // Write beside the target and rename so a crash never leaves a partial object
        let partial = destination.with_extension("part");
        std::fs::write(&partial, &bytes).map_err(file_system_error(&partial, "write object"))?;
        std::fs::rename(&partial, destination)
            .map_err(file_system_error(destination, "rename object"))?;

        info!(bucket, object, bytes = bytes.len(), "download complete");
        Ok(())
    }
}
