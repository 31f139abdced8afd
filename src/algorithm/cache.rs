//! Process-wide registry of provisioned levels
//!
//! Every configured level owns one slot. The first caller for a level that is
//! not yet resident provisions it while holding the slot's init lock; later
//! callers for the same level block on that lock and then read the stored
//! entry. Resident entries are read under a shared lock only and are never
//! evicted or rebuilt.

use crate::index::{HnswIndex, IndexProvider, LevelEntry, LevelProvisioner, NearestNeighborIndex};
use crate::io::configuration::MosaicConfig;
use crate::io::error::{Result, configuration_error};
use parking_lot::{Mutex, RwLock};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Scoped borrow of a resident level
///
/// Dropping the handle releases the borrow; the entry itself stays owned by
/// the cache.
#[derive(Debug)]
pub struct LevelHandle<I = HnswIndex> {
    entry: Arc<LevelEntry<I>>,
}

impl<I> Clone for LevelHandle<I> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<I> Deref for LevelHandle<I> {
    type Target = LevelEntry<I>;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}

impl<I> LevelHandle<I> {
    /// Borrowed entry
    pub fn entry(&self) -> &LevelEntry<I> {
        &self.entry
    }

    /// Whether two handles borrow the same cached entry
    pub fn shares_entry(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

/// Counters for cache effectiveness
#[derive(Default, Debug)]
pub struct CacheStats {
    hits: AtomicUsize,
    provisions: AtomicUsize,
    failures: AtomicUsize,
}

impl CacheStats {
    /// Acquisitions served from a resident entry
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Successful provisioning runs
    pub fn provisions(&self) -> usize {
        self.provisions.load(Ordering::Relaxed)
    }

    /// Provisioning runs that failed
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

struct LevelSlot<I> {
    level: u32,
    entry: RwLock<Option<Arc<LevelEntry<I>>>>,
    init: Mutex<()>,
}

impl<I> LevelSlot<I> {
    fn resident(&self) -> Option<Arc<LevelEntry<I>>> {
        self.entry.read().clone()
    }
}

/// Shared map from level to its provisioned (index, library) pair
pub struct IndexCache<I = HnswIndex> {
    slots: Vec<LevelSlot<I>>,
    provisioner: Arc<dyn LevelProvisioner<I>>,
    stats: CacheStats,
}

impl<I: NearestNeighborIndex + 'static> IndexCache<I> {
    /// Create a cache serving `levels`, provisioned on demand by `provisioner`
    pub fn new(levels: &[u32], provisioner: Arc<dyn LevelProvisioner<I>>) -> Self {
        let mut levels = levels.to_vec();
        levels.sort_unstable();
        levels.dedup();

        Self {
            slots: levels
                .into_iter()
                .map(|level| LevelSlot {
                    level,
                    entry: RwLock::new(None),
                    init: Mutex::new(()),
                })
                .collect(),
            provisioner,
            stats: CacheStats::default(),
        }
    }

    /// Create a cache backed by an [`IndexProvider`] over the configured store
    pub fn from_config(config: &MosaicConfig) -> Self {
        Self::new(
            &config.levels,
            Arc::new(IndexProvider::<I>::from_config(config)),
        )
    }

    /// Configured levels, ascending
    pub fn levels(&self) -> Vec<u32> {
        self.slots.iter().map(|slot| slot.level).collect()
    }

    /// Whether `level` has a slot in this cache
    pub fn supports(&self, level: u32) -> bool {
        self.slot(level).is_some()
    }

    /// Whether `level` has already been provisioned
    pub fn is_resident(&self, level: u32) -> bool {
        self.slot(level)
            .is_some_and(|slot| slot.entry.read().is_some())
    }

    /// Levels provisioned so far, ascending
    pub fn resident_levels(&self) -> Vec<u32> {
        self.slots
            .iter()
            .filter(|slot| slot.entry.read().is_some())
            .map(|slot| slot.level)
            .collect()
    }

    /// Cache counters
    pub const fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Borrow the entry for `level`, provisioning it on first use
    ///
    /// Concurrent callers for a level that is not yet resident wait for the
    /// single in-flight provisioning run. A failed run is not remembered, so a
    /// later call tries again.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a level outside the configured set
    /// (without touching storage), or the provisioning error of the run this
    /// caller performed.
    pub fn acquire(&self, level: u32) -> Result<LevelHandle<I>> {
        let slot = self.slot(level).ok_or_else(|| {
            configuration_error("levels", &format!("level {level} is not configured"))
        })?;

        if let Some(entry) = slot.resident() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(LevelHandle { entry });
        }

        let _init = slot.init.lock();

        // Another caller may have finished provisioning while we waited
        if let Some(entry) = slot.resident() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(level, "level provisioned by a concurrent caller");
            return Ok(LevelHandle { entry });
        }

        let started = Instant::now();
        info!(level, "provisioning level");
        let entry = match self.provisioner.provision(level) {
            Ok(entry) => Arc::new(entry),
            Err(err) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(level, error = %err, "provisioning failed");
                return Err(err);
            }
        };

        *slot.entry.write() = Some(Arc::clone(&entry));
        self.stats.provisions.fetch_add(1, Ordering::Relaxed);
        info!(
            level,
            tiles = entry.library().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "level resident"
        );

        Ok(LevelHandle { entry })
    }

    /// Run `f` with a scoped borrow of the entry for `level`
    ///
    /// # Errors
    ///
    /// Returns the error from [`IndexCache::acquire`].
    pub fn with_level<T>(&self, level: u32, f: impl FnOnce(&LevelEntry<I>) -> T) -> Result<T> {
        let handle = self.acquire(level)?;
        Ok(f(&handle))
    }

    fn slot(&self, level: u32) -> Option<&LevelSlot<I>> {
        self.slots
            .binary_search_by_key(&level, |slot| slot.level)
            .ok()
            .and_then(|position| self.slots.get(position))
    }
}
