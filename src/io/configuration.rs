//! Service constants and the typed runtime configuration
//!
//! Configuration is read once at startup (environment first, command-line
//! overrides second) and validated before any request is served.

use crate::index::{ConstructionParams, QueryParams};
use crate::io::error::{Result, configuration_error};
use std::path::PathBuf;

/// Block sizes served when none are configured
pub const DEFAULT_LEVELS: [u32; 6] = [2, 4, 8, 16, 32, 64];
/// Block size used when a request names none
pub const DEFAULT_PATCH_SIZE: u32 = 32;

/// Local cache directory for patch arrays
pub const DEFAULT_PATCHES_PATH: &str = "/tmp/patchmosaic/raw";
/// Local cache directory for serialized indices
pub const DEFAULT_INDEX_PATH: &str = "/tmp/patchmosaic/indices";
/// Public object endpoint for remote patch storage
pub const DEFAULT_BLOB_ENDPOINT: &str = "https://storage.googleapis.com";
/// Prefix of every patch and index object name
pub const DEFAULT_OBJECT_PREFIX: &str = "patches";

// Graph construction defaults favour recall over build time
/// Neighbours kept per node on upper graph layers
pub const DEFAULT_MAX_CONNECTIONS: usize = 50;
/// Candidate list size while inserting into the graph
pub const DEFAULT_EF_CONSTRUCTION: usize = 400;
/// Neighbour refinement passes after the graph is built
pub const DEFAULT_POST_PASSES: usize = 2;
/// Candidate list size while searching
pub const DEFAULT_EF_SEARCH: usize = 1000;
/// Fixed seed for reproducible graph layer assignment
pub const DEFAULT_SEED: u64 = 42;

/// Pixel budget above which an image is refused instead of decoded
pub const MAX_IMAGE_PIXELS: u64 = 89_478_485;
/// Display time for animation frames that carry none
pub const DEFAULT_FRAME_DURATION_MS: u32 = 200;
/// Loop count for animations that carry none (0 loops forever)
pub const DEFAULT_LOOP_COUNT: u16 = 0;
/// Quantizer speed for animated GIF output (1 = best, 30 = fastest)
pub const GIF_ENCODER_SPEED: i32 = 10;

// Output settings
/// Suffix added to output filenames
pub const OUTPUT_SUFFIX: &str = "_mosaic";
/// Threshold for switching to batch progress mode
pub const MAX_INDIVIDUAL_PROGRESS_BARS: usize = 5;

/// Environment variable listing supported levels, comma separated
pub const ENV_LEVELS: &str = "PATCH_LEVELS";
/// Environment variable for the patch array cache directory
pub const ENV_PATCHES_PATH: &str = "PATCH_CACHE_PATH";
/// Environment variable for the index cache directory
pub const ENV_INDEX_PATH: &str = "PATCH_INDEX_PATH";
/// Environment variable naming the remote bucket
pub const ENV_BUCKET: &str = "PATCH_BUCKET";
/// Environment variable overriding the blob endpoint
pub const ENV_BLOB_ENDPOINT: &str = "PATCH_BLOB_ENDPOINT";
/// Environment variable overriding the object name prefix
pub const ENV_OBJECT_PREFIX: &str = "PATCH_OBJECT_PREFIX";
/// Environment variable overriding the search candidate list size
pub const ENV_EF_SEARCH: &str = "PATCH_EF_SEARCH";
/// Environment variable overriding the decode pixel budget
pub const ENV_MAX_IMAGE_PIXELS: &str = "PATCH_MAX_IMAGE_PIXELS";

/// Typed service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MosaicConfig {
    /// Supported block sizes, ascending and unique
    pub levels: Vec<u32>,
    /// Local cache directory for patch arrays
    pub patches_path: PathBuf,
    /// Local cache directory for serialized indices
    pub index_path: PathBuf,
    /// Remote bucket holding patch arrays and indices
    pub bucket: Option<String>,
    /// Object endpoint (`https://...` or `file://<dir>`)
    pub blob_endpoint: String,
    /// Prefix of every object name
    pub object_prefix: String,
    /// Index construction parameters
    pub construction: ConstructionParams,
    /// Index query parameters
    pub query: QueryParams,
    /// Largest image, in pixels, accepted for decoding
    pub max_image_pixels: u64,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            levels: DEFAULT_LEVELS.to_vec(),
            patches_path: PathBuf::from(DEFAULT_PATCHES_PATH),
            index_path: PathBuf::from(DEFAULT_INDEX_PATH),
            bucket: None,
            blob_endpoint: DEFAULT_BLOB_ENDPOINT.to_string(),
            object_prefix: DEFAULT_OBJECT_PREFIX.to_string(),
            construction: ConstructionParams::default(),
            query: QueryParams::default(),
            max_image_pixels: MAX_IMAGE_PIXELS,
        }
    }
}

impl MosaicConfig {
    /// Build a configuration from process environment variables
    ///
    /// # Errors
    ///
    /// Returns a configuration error if any variable is malformed or the
    /// resulting configuration fails validation.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    ///
    /// # Errors
    ///
    /// Returns a configuration error if any value is malformed or the
    /// resulting configuration fails validation.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(levels) = lookup(ENV_LEVELS) {
            config.levels = parse_levels(&levels)?;
        }
        if let Some(path) = lookup(ENV_PATCHES_PATH) {
            config.patches_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_INDEX_PATH) {
            config.index_path = PathBuf::from(path);
        }
        config.bucket = lookup(ENV_BUCKET).filter(|bucket| !bucket.trim().is_empty());
        if let Some(endpoint) = lookup(ENV_BLOB_ENDPOINT) {
            config.blob_endpoint = endpoint;
        }
        if let Some(prefix) = lookup(ENV_OBJECT_PREFIX) {
            config.object_prefix = prefix;
        }
        if let Some(ef) = lookup(ENV_EF_SEARCH) {
            config.query.ef_search = ef
                .trim()
                .parse()
                .map_err(|e| configuration_error("ef_search", &e))?;
        }
        if let Some(pixels) = lookup(ENV_MAX_IMAGE_PIXELS) {
            config.max_image_pixels = pixels
                .trim()
                .parse()
                .map_err(|e| configuration_error("max_image_pixels", &e))?;
        }

        config.validate()
    }

    /// Check every field and normalise the level list
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid field.
    pub fn validate(mut self) -> Result<Self> {
        self.levels.sort_unstable();
        self.levels.dedup();

        if self.levels.is_empty() {
            return Err(configuration_error("levels", &"at least one level is required"));
        }
        if self.levels.contains(&0) {
            return Err(configuration_error("levels", &"levels must be positive"));
        }
        if self.object_prefix.is_empty() {
            return Err(configuration_error("object_prefix", &"must not be empty"));
        }
        if self.construction.max_connections < 2 {
            return Err(configuration_error(
                "max_connections",
                &"graph degree must be at least 2",
            ));
        }
        if self.construction.ef_construction == 0 {
            return Err(configuration_error("ef_construction", &"must be positive"));
        }
        if self.query.ef_search == 0 {
            return Err(configuration_error("ef_search", &"must be positive"));
        }
        if self.max_image_pixels == 0 {
            return Err(configuration_error("max_image_pixels", &"must be positive"));
        }

        Ok(self)
    }

    /// Whether `level` is one of the configured block sizes
    pub fn supports(&self, level: u32) -> bool {
        self.levels.binary_search(&level).is_ok()
    }

    /// Object name of the patch array for a level
    pub fn patches_object(&self, level: u32) -> String {
        patches_object_name(&self.object_prefix, level)
    }

    /// Object name of the serialized index for a level
    pub fn index_object(&self, level: u32) -> String {
        index_object_name(&self.object_prefix, level)
    }
}

/// Object name of the patch array for a level
pub fn patches_object_name(prefix: &str, level: u32) -> String {
    format!("{prefix}-{level}.npy")
}

/// Object name of the serialized index for a level
pub fn index_object_name(prefix: &str, level: u32) -> String {
    format!("{prefix}-{level}-index.bin")
}

/// Parse a comma separated level list such as `"2,4,8"`
///
/// # Errors
///
/// Returns a configuration error if any entry is not a positive integer.
pub fn parse_levels(value: &str) -> Result<Vec<u32>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<u32>()
                .map_err(|e| configuration_error("levels", &format!("'{entry}': {e}")))
        })
        .collect()
}
