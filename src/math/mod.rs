//! Mathematical utilities for search

/// Squared Euclidean distance between feature vectors
pub mod distance;
/// Layer sampling for hierarchical graph construction
pub mod probability;
