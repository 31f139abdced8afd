//! Approximate nearest-neighbour search over patch feature vectors
//!
//! The [`NearestNeighborIndex`] trait is the only contract the rest of the
//! crate relies on: build once from a vector library, persist, reload, and
//! answer nearest-identifier queries concurrently.

/// Exhaustive search implementing the index contract exactly
pub mod exact;
/// Hierarchical navigable small-world graph index
pub mod hnsw;
/// Builds or loads a level's index and pairs it with its patch library
pub mod provider;

pub use exact::ExactIndex;
pub use hnsw::HnswIndex;
pub use provider::{IndexProvider, LevelEntry, LevelProvisioner};

use crate::io::configuration::{
    DEFAULT_EF_CONSTRUCTION, DEFAULT_EF_SEARCH, DEFAULT_MAX_CONNECTIONS, DEFAULT_POST_PASSES,
    DEFAULT_SEED,
};
use crate::io::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Build-time accuracy/speed trade-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionParams {
    /// Neighbours kept per node on upper layers (layer 0 keeps twice as many)
    pub max_connections: usize,
    /// Candidate list size while inserting
    pub ef_construction: usize,
    /// Neighbour refinement passes run after insertion
    pub post_passes: usize,
    /// Skip sorting and compacting neighbour lists after the build
    pub skip_optimized_index: bool,
    /// Worker threads for batched insertion and refinement (0 uses every core)
    pub threads: usize,
    /// Seed for layer assignment
    pub seed: u64,
}

impl Default for ConstructionParams {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            post_passes: DEFAULT_POST_PASSES,
            skip_optimized_index: true,
            threads: 0,
            seed: DEFAULT_SEED,
        }
    }
}

/// Search-time accuracy/speed trade-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    /// Candidate list size while searching the bottom layer
    pub ef_search: usize,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            ef_search: DEFAULT_EF_SEARCH,
        }
    }
}

/// Build/persist/load/query contract shared by every index implementation
pub trait NearestNeighborIndex: Sized + Send + Sync {
    /// Build an index over `vectors`; identifiers are positions in the slice
    ///
    /// # Errors
    ///
    /// Returns an error if the vectors are empty or of inconsistent dimension.
    fn build(vectors: &[Vec<f32>], params: &ConstructionParams) -> Result<Self>;

    /// Write the index to `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    fn persist(&self, path: &Path) -> Result<()>;

    /// Read an index previously written by [`NearestNeighborIndex::persist`]
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, corrupted or of another version.
    fn load(path: &Path) -> Result<Self>;

    /// Identifier of the vector closest to `vector`, or `None` when the
    /// index is empty or the query has the wrong dimension
    fn query(&self, vector: &[f32], params: &QueryParams) -> Option<usize>;

    /// Number of indexed vectors
    fn len(&self) -> usize;

    /// Whether the index holds no vectors
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimensionality of indexed vectors
    fn dimension(&self) -> usize;
}

/// Flatten equally sized vectors into one contiguous buffer
///
/// # Errors
///
/// Returns a computation error if the library is empty, zero-dimensional or
/// ragged.
pub(crate) fn flatten_vectors(vectors: &[Vec<f32>]) -> Result<(Vec<f32>, usize)> {
    use crate::io::error::computation_error;

    let dimension = vectors
        .first()
        .map(Vec::len)
        .ok_or_else(|| computation_error("index build", &"no vectors supplied"))?;
    if dimension == 0 {
        return Err(computation_error("index build", &"vectors have no components"));
    }

    let mut flat = Vec::with_capacity(vectors.len() * dimension);
    for (id, vector) in vectors.iter().enumerate() {
        if vector.len() != dimension {
            return Err(computation_error(
                "index build",
                &format!(
                    "vector {id} has dimension {} (expected {dimension})",
                    vector.len()
                ),
            ));
        }
        flat.extend_from_slice(vector);
    }

    Ok((flat, dimension))
}

/// Serialize an index snapshot with bincode
pub(crate) fn write_snapshot<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    use crate::io::error::{computation_error, file_system_error};
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(file_system_error(parent, "create directory"))?;
    }

    // Write beside the target and rename so readers never observe a partial file
    let partial = path.with_extension("part");
    let file = std::fs::File::create(&partial).map_err(file_system_error(&partial, "create file"))?;
    let mut writer = std::io::BufWriter::new(file);
    bincode::serialize_into(&mut writer, value)
        .map_err(|e| computation_error("index serialization", &e))?;
    writer
        .flush()
        .map_err(file_system_error(&partial, "write index"))?;
    drop(writer);

    std::fs::rename(&partial, path).map_err(file_system_error(path, "rename index"))
}

/// Deserialize an index snapshot written by [`write_snapshot`]
pub(crate) fn read_snapshot<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    use crate::io::error::{computation_error, file_system_error};

    let file = std::fs::File::open(path).map_err(file_system_error(path, "open index"))?;
    bincode::deserialize_from(std::io::BufReader::new(file))
        .map_err(|e| computation_error("index deserialization", &e))
}
