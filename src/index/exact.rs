//! Exhaustive nearest-neighbour search
//!
//! Scans every vector on each query. Exact, and fast enough for small
//! libraries and for checking graph recall.

use crate::index::{
    ConstructionParams, NearestNeighborIndex, QueryParams, flatten_vectors, read_snapshot,
    write_snapshot,
};
use crate::io::error::{Result, computation_error};
use crate::math::distance::squared_euclidean;
use serde::{Deserialize, Serialize};
use std::path::Path;

const SNAPSHOT_VERSION: u32 = 1;

/// Linear-scan index over a contiguous vector buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExactIndex {
    version: u32,
    dimension: usize,
    vectors: Vec<f32>,
}

impl NearestNeighborIndex for ExactIndex {
    fn build(vectors: &[Vec<f32>], _params: &ConstructionParams) -> Result<Self> {
        let (vectors, dimension) = flatten_vectors(vectors)?;
        Ok(Self {
            version: SNAPSHOT_VERSION,
            dimension,
            vectors,
        })
    }

    fn persist(&self, path: &Path) -> Result<()> {
        write_snapshot(self, path)
    }

    fn load(path: &Path) -> Result<Self> {
        let index: Self = read_snapshot(path)?;
        if index.version != SNAPSHOT_VERSION {
            return Err(computation_error(
                "index load",
                &format!(
                    "incompatible version {} (expected {SNAPSHOT_VERSION})",
                    index.version
                ),
            ));
        }
        if index.dimension == 0 || index.vectors.len() % index.dimension != 0 {
            return Err(computation_error("index load", &"vector buffer is corrupted"));
        }
        Ok(index)
    }

    fn query(&self, vector: &[f32], _params: &QueryParams) -> Option<usize> {
        if vector.len() != self.dimension {
            return None;
        }

        self.vectors
            .chunks_exact(self.dimension)
            .map(|candidate| squared_euclidean(vector, candidate))
            .enumerate()
            // Ties resolve to the lowest identifier
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(id, _)| id)
    }

    fn len(&self) -> usize {
        self.vectors.len().checked_div(self.dimension).unwrap_or(0)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
