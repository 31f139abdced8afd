//! Pairs a level's patch library with its search index
//!
//! A persisted index is reused when present and consistent with the library;
//! otherwise one is built from the library's feature vectors and written back
//! for the next process.

use crate::analysis::features::library_feature_vectors;
use crate::index::{ConstructionParams, HnswIndex, NearestNeighborIndex, QueryParams};
use crate::io::configuration::MosaicConfig;
use crate::io::error::{Result, provisioning_error};
use crate::spatial::tiles::{PatchLibrary, PatchLibraryStore};
use std::marker::PhantomData;
use std::time::Instant;
use tracing::{info, warn};

/// A level's search index together with the library it indexes
#[derive(Debug)]
pub struct LevelEntry<I = HnswIndex> {
    level: u32,
    index: I,
    library: PatchLibrary,
    query: QueryParams,
}

impl<I: NearestNeighborIndex> LevelEntry<I> {
    /// Pair an index with its library
    ///
    /// # Errors
    ///
    /// Returns a provisioning error if the index and library disagree on the
    /// number of tiles or the vector dimension.
    pub fn new(level: u32, index: I, library: PatchLibrary, query: QueryParams) -> Result<Self> {
        check_pairing(level, &index, &library)?;
        Ok(Self {
            level,
            index,
            library,
            query,
        })
    }

    /// Block size served by this entry
    pub const fn level(&self) -> u32 {
        self.level
    }

    /// Search index over the library's feature vectors
    pub const fn index(&self) -> &I {
        &self.index
    }

    /// Candidate tiles
    pub const fn library(&self) -> &PatchLibrary {
        &self.library
    }

    /// Query parameters applied to every search against this entry
    pub const fn query_params(&self) -> &QueryParams {
        &self.query
    }

    /// Identifier of the tile closest to `vector`
    pub fn nearest(&self, vector: &[f32]) -> Option<usize> {
        self.index.query(vector, &self.query)
    }
}

/// Check that an index was built over exactly this library's tiles
fn check_pairing<I: NearestNeighborIndex>(
    level: u32,
    index: &I,
    library: &PatchLibrary,
) -> Result<()> {
    if index.len() != library.len() {
        return Err(provisioning_error(
            level,
            "pair index",
            &format!(
                "index covers {} tiles but the library holds {}",
                index.len(),
                library.len()
            ),
        ));
    }
    if index.dimension() != library.tile_stride() {
        return Err(provisioning_error(
            level,
            "pair index",
            &format!(
                "index dimension {} does not match tile size {}",
                index.dimension(),
                library.tile_stride()
            ),
        ));
    }
    Ok(())
}

/// Anything able to produce a level's entry from scratch
pub trait LevelProvisioner<I>: Send + Sync {
    /// Load or build the entry for `level`
    ///
    /// # Errors
    ///
    /// Returns an error if the library cannot be fetched or the index cannot
    /// be loaded or built.
    fn provision(&self, level: u32) -> Result<LevelEntry<I>>;
}

/// Loads persisted indices or builds fresh ones from the patch library store
pub struct IndexProvider<I = HnswIndex> {
    store: PatchLibraryStore,
    construction: ConstructionParams,
    query: QueryParams,
    _index: PhantomData<fn() -> I>,
}

impl<I: NearestNeighborIndex> IndexProvider<I> {
    /// Create a provider over a store with explicit tuning
    pub const fn new(
        store: PatchLibraryStore,
        construction: ConstructionParams,
        query: QueryParams,
    ) -> Self {
        Self {
            store,
            construction,
            query,
            _index: PhantomData,
        }
    }

    /// Create a provider from the service configuration
    pub fn from_config(config: &MosaicConfig) -> Self {
        Self::new(
            PatchLibraryStore::from_config(config),
            config.construction,
            config.query,
        )
    }

    /// Underlying library store
    pub const fn store(&self) -> &PatchLibraryStore {
        &self.store
    }

    /// Load or build the index for `level` and pair it with its library
    ///
    /// # Errors
    ///
    /// Returns an error if the library cannot be fetched or an index can be
    /// neither loaded nor built.
    pub fn acquire(&self, level: u32) -> Result<LevelEntry<I>> {
        let library = self.store.fetch(level)?;
        let index_path = self.store.index_path(level);

        if index_path.exists() {
            let started = Instant::now();
            let loaded = I::load(&index_path)
                .and_then(|index| check_pairing(level, &index, &library).map(|()| index));
            match loaded {
                Ok(index) => {
                    info!(
                        level,
                        tiles = library.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "loaded persisted index"
                    );
                    return LevelEntry::new(level, index, library, self.query);
                }
                Err(err) => {
                    warn!(level, error = %err, "persisted index unusable; rebuilding");
                }
            }
        }

        let started = Instant::now();
        let vectors = library_feature_vectors(&library);
        let index = I::build(&vectors, &self.construction)
            .map_err(|e| provisioning_error(level, "build index", &e))?;
        info!(
            level,
            tiles = library.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built index"
        );

        // A failed write only costs a rebuild next time
        if let Err(err) = index.persist(&index_path) {
            warn!(level, error = %err, "could not persist index");
        }

        LevelEntry::new(level, index, library, self.query)
    }
}

impl<I: NearestNeighborIndex> LevelProvisioner<I> for IndexProvider<I> {
    fn provision(&self, level: u32) -> Result<LevelEntry<I>> {
        self.acquire(level)
    }
}
