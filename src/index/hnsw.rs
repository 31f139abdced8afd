//! HNSW (Hierarchical Navigable Small World) index
//!
//! Approximate nearest-neighbour search after Malkov and Yashunin. Nodes are
//! inserted in identifier order with seeded layer assignment. Insertion runs
//! in batches whose neighbour searches are parallel but whose linking is
//! sequential, so a build is reproducible for a given library and parameter
//! set whatever the thread count. After insertion the bottom layer is refined
//! by `post_passes` re-search passes, run in parallel against the finished
//! graph.
//!
//! Once built the graph is immutable; queries take `&self` and may run from
//! any number of threads.

use crate::index::{
    ConstructionParams, NearestNeighborIndex, QueryParams, flatten_vectors, read_snapshot,
    write_snapshot,
};
use crate::io::error::{Result, computation_error};
use crate::math::distance::squared_euclidean;
use crate::math::probability::{level_multiplier, sample_layer};
use rand::{SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::path::Path;
use tracing::debug;

const SNAPSHOT_VERSION: u32 = 1;

/// A batch inserts at most one node per this many already in the graph
const INSERT_BATCH_DIVISOR: usize = 16;
const MAX_INSERT_BATCH: usize = 256;

/// A node identifier paired with its distance to the current query
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f32,
    id: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

/// Multi-layer proximity graph over a contiguous vector buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    version: u32,
    dimension: usize,
    params: ConstructionParams,
    vectors: Vec<f32>,
    /// `links[node][layer]` lists the node's neighbours on that layer
    links: Vec<Vec<Vec<u32>>>,
    entry_point: u32,
    max_layer: usize,
}

impl HnswIndex {
    /// Construction parameters the graph was built with
    pub const fn params(&self) -> &ConstructionParams {
        &self.params
    }

    /// Highest populated layer
    pub const fn max_layer(&self) -> usize {
        self.max_layer
    }

    /// Neighbours of `id` on `layer` (empty if either is out of range)
    pub fn neighbors(&self, id: usize, layer: usize) -> &[u32] {
        self.links
            .get(id)
            .and_then(|layers| layers.get(layer))
            .map_or(&[], Vec::as_slice)
    }

    fn vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        self.vectors
            .get(start..start + self.dimension)
            .unwrap_or(&[])
    }

    fn distance_to(&self, query: &[f32], id: u32) -> f32 {
        squared_euclidean(query, self.vector(id))
    }

    /// Bottom layer keeps twice the upper-layer degree
    const fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.max_connections * 2
        } else {
            self.params.max_connections
        }
    }

    /// Greedy walk towards `query` on a single layer
    fn greedy_closest(&self, query: &[f32], mut current: Candidate, layer: usize) -> Candidate {
        let mut improved = true;
        while improved {
            improved = false;
            for &neighbor in self.neighbors(current.id as usize, layer) {
                let distance = self.distance_to(query, neighbor);
                if distance < current.distance {
                    current = Candidate {
                        distance,
                        id: neighbor,
                    };
                    improved = true;
                }
            }
        }
        current
    }

    /// Beam search on one layer, returning up to `ef` candidates nearest first
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[Candidate],
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let ef = ef.max(1);
        let mut visited: HashSet<u32> = HashSet::with_capacity(ef * 4);
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &entry in entry_points {
            if visited.insert(entry.id) {
                frontier.push(Reverse(entry));
                results.push(entry);
            }
        }
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(current)) = frontier.pop() {
            let worst = results.peek().map_or(f32::INFINITY, |c| c.distance);
            if current.distance > worst && results.len() >= ef {
                break;
            }

            for &neighbor in self.neighbors(current.id as usize, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let distance = self.distance_to(query, neighbor);
                let worst = results.peek().map_or(f32::INFINITY, |c| c.distance);
                if results.len() < ef || distance < worst {
                    let candidate = Candidate {
                        distance,
                        id: neighbor,
                    };
                    frontier.push(Reverse(candidate));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Diversity heuristic: keep a candidate only if it is closer to the base
    /// than to every neighbour already kept, then top up with the rejects
    fn select_neighbors(&self, candidates: &[Candidate], m: usize) -> Vec<u32> {
        let mut selected: Vec<Candidate> = Vec::with_capacity(m);
        let mut rejected: Vec<Candidate> = Vec::new();

        for &candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let candidate_vector = self.vector(candidate.id);
            let diverse = selected.iter().all(|kept| {
                squared_euclidean(candidate_vector, self.vector(kept.id)) > candidate.distance
            });
            if diverse {
                selected.push(candidate);
            } else {
                rejected.push(candidate);
            }
        }

        let shortfall = m.saturating_sub(selected.len());
        selected.extend(rejected.into_iter().take(shortfall));
        selected.into_iter().map(|c| c.id).collect()
    }

    /// Re-rank a node's neighbour list against the node and cut it to `m`
    fn shrink_links(&self, id: u32, links: &[u32], m: usize) -> Vec<u32> {
        let base = self.vector(id);
        let mut candidates: Vec<Candidate> = links
            .iter()
            .filter(|&&neighbor| neighbor != id)
            .map(|&neighbor| Candidate {
                distance: squared_euclidean(base, self.vector(neighbor)),
                id: neighbor,
            })
            .collect();
        candidates.sort_unstable();
        candidates.dedup_by_key(|c| c.id);
        self.select_neighbors(&candidates, m)
    }

    /// Add a directed edge, pruning the source's list when it overflows
    fn link(&mut self, from: u32, to: u32, layer: usize) {
        let limit = self.max_links(layer);
        let Some(existing) = self
            .links
            .get(from as usize)
            .and_then(|layers| layers.get(layer))
        else {
            return;
        };
        if existing.contains(&to) {
            return;
        }

        let mut updated = existing.clone();
        updated.push(to);
        if updated.len() > limit {
            updated = self.shrink_links(from, &updated, limit);
        }

        if let Some(slot) = self
            .links
            .get_mut(from as usize)
            .and_then(|layers| layers.get_mut(layer))
        {
            *slot = updated;
        }
    }

    /// Neighbours `id` would take on each of its layers, searched against the
    /// graph as it currently stands
    fn plan_insertion(&self, id: u32, top_layer: usize, ef_construction: usize) -> Vec<Vec<u32>> {
        let mut planned = vec![Vec::new(); top_layer + 1];
        if self.links.is_empty() {
            return planned;
        }

        let query = self.vector(id);
        let mut entry = Candidate {
            distance: self.distance_to(query, self.entry_point),
            id: self.entry_point,
        };
        for layer in (top_layer + 1..=self.max_layer).rev() {
            entry = self.greedy_closest(query, entry, layer);
        }

        let mut entry_points = vec![entry];
        for layer in (0..=top_layer.min(self.max_layer)).rev() {
            let found = self.search_layer(query, &entry_points, ef_construction, layer);
            if let Some(slot) = planned.get_mut(layer) {
                *slot = self.select_neighbors(&found, self.params.max_connections);
            }
            entry_points = found;
        }
        planned
    }

    /// Append `id` with its planned neighbour lists and link back to it
    fn apply_insertion(&mut self, id: u32, planned: Vec<Vec<u32>>) {
        let top_layer = planned.len().saturating_sub(1);
        let first = self.links.is_empty();
        self.links.push(planned.clone());

        for (layer, neighbors) in planned.into_iter().enumerate() {
            for neighbor in neighbors {
                self.link(neighbor, id, layer);
            }
        }

        if first || top_layer > self.max_layer {
            self.max_layer = top_layer;
            self.entry_point = id;
        }
    }

    /// Insert nodes in identifier order
    ///
    /// Each batch is searched in parallel against the graph built so far and
    /// then linked in order. Batches grow with the graph, so the first nodes
    /// go in one at a time.
    fn insert_all(&mut self, layers: &[usize], ef_construction: usize) {
        let mut next = 0_usize;
        while next < layers.len() {
            let batch = (next / INSERT_BATCH_DIVISOR).clamp(1, MAX_INSERT_BATCH);
            let end = (next + batch).min(layers.len());
            let Some(pending) = layers.get(next..end) else {
                break;
            };

            let graph = &*self;
            let plans: Vec<Vec<Vec<u32>>> = pending
                .par_iter()
                .enumerate()
                .map(|(offset, &top_layer)| {
                    graph.plan_insertion((next + offset) as u32, top_layer, ef_construction)
                })
                .collect();

            for (offset, planned) in plans.into_iter().enumerate() {
                self.apply_insertion((next + offset) as u32, planned);
            }
            next = end;
        }
    }

    /// Re-search every node on the bottom layer and merge the results into
    /// its neighbour list
    fn refine_bottom_layer(&mut self, ef_construction: usize) {
        let limit = self.max_links(0);
        let node_count = self.links.len() as u32;
        let graph = &*self;

        let refined: Vec<Vec<u32>> = (0..node_count)
            .into_par_iter()
            .map(|id| {
                let query = graph.vector(id);
                let mut entry_points: Vec<Candidate> = graph
                    .neighbors(id as usize, 0)
                    .iter()
                    .map(|&neighbor| Candidate {
                        distance: graph.distance_to(query, neighbor),
                        id: neighbor,
                    })
                    .collect();
                entry_points.push(Candidate {
                    distance: 0.0,
                    id,
                });

                let found: Vec<Candidate> = graph
                    .search_layer(query, &entry_points, ef_construction, 0)
                    .into_iter()
                    .filter(|c| c.id != id)
                    .collect();
                graph.select_neighbors(&found, limit)
            })
            .collect();

        for (id, neighbors) in refined.into_iter().enumerate() {
            for neighbor in neighbors {
                self.link(id as u32, neighbor, 0);
                self.link(neighbor, id as u32, 0);
            }
        }
    }

    /// Sort every neighbour list nearest first and release spare capacity
    fn optimize(&mut self) {
        let graph = &*self;
        let sorted: Vec<Vec<Vec<u32>>> = (0..graph.links.len() as u32)
            .into_par_iter()
            .map(|id| {
                let base = graph.vector(id);
                graph
                    .links
                    .get(id as usize)
                    .map(|layers| {
                        layers
                            .iter()
                            .map(|neighbors| {
                                let mut ranked: Vec<Candidate> = neighbors
                                    .iter()
                                    .map(|&n| Candidate {
                                        distance: squared_euclidean(base, graph.vector(n)),
                                        id: n,
                                    })
                                    .collect();
                                ranked.sort_unstable();
                                let mut list: Vec<u32> = ranked.iter().map(|c| c.id).collect();
                                list.shrink_to_fit();
                                list
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();

        self.links = sorted;
        self.vectors.shrink_to_fit();
    }

    fn validate(&self) -> Result<()> {
        let nodes = self.links.len();
        if self.version != SNAPSHOT_VERSION {
            return Err(computation_error(
                "index load",
                &format!(
                    "incompatible version {} (expected {SNAPSHOT_VERSION})",
                    self.version
                ),
            ));
        }
        if self.dimension == 0 || nodes == 0 || self.vectors.len() != nodes * self.dimension {
            return Err(computation_error(
                "index load",
                &"vector buffer does not match node count",
            ));
        }
        if self.entry_point as usize >= nodes {
            return Err(computation_error("index load", &"entry point out of range"));
        }
        let dangling = self
            .links
            .iter()
            .flatten()
            .flatten()
            .any(|&neighbor| neighbor as usize >= nodes);
        if dangling {
            return Err(computation_error("index load", &"neighbour out of range"));
        }
        Ok(())
    }
}

impl NearestNeighborIndex for HnswIndex {
    fn build(vectors: &[Vec<f32>], params: &ConstructionParams) -> Result<Self> {
        let (flat, dimension) = flatten_vectors(vectors)?;
        let node_count = u32::try_from(vectors.len())
            .map_err(|e| computation_error("index build", &e))?;

        let multiplier = level_multiplier(params.max_connections);
        let mut rng = StdRng::seed_from_u64(params.seed);
        let layers: Vec<usize> = (0..node_count)
            .map(|_| sample_layer(&mut rng, multiplier))
            .collect();

        let mut index = Self {
            version: SNAPSHOT_VERSION,
            dimension,
            params: *params,
            vectors: flat,
            links: Vec::with_capacity(vectors.len()),
            entry_point: 0,
            max_layer: 0,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(params.threads)
            .build()
            .map_err(|e| computation_error("index build", &e))?;

        pool.install(|| {
            index.insert_all(&layers, params.ef_construction);
            for pass in 0..params.post_passes {
                debug!(pass, nodes = node_count, "refining bottom layer");
                index.refine_bottom_layer(params.ef_construction);
            }
            if !params.skip_optimized_index {
                index.optimize();
            }
        });

        Ok(index)
    }

    fn persist(&self, path: &Path) -> Result<()> {
        write_snapshot(self, path)
    }

    fn load(path: &Path) -> Result<Self> {
        let index: Self = read_snapshot(path)?;
        index.validate()?;
        Ok(index)
    }

    fn query(&self, vector: &[f32], params: &QueryParams) -> Option<usize> {
        if vector.len() != self.dimension || self.links.is_empty() {
            return None;
        }

        let mut entry = Candidate {
            distance: self.distance_to(vector, self.entry_point),
            id: self.entry_point,
        };
        for layer in (1..=self.max_layer).rev() {
            entry = self.greedy_closest(vector, entry, layer);
        }

        self.search_layer(vector, &[entry], params.ef_search, 0)
            .first()
            .map(|c| c.id as usize)
    }

    fn len(&self) -> usize {
        self.links.len()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
