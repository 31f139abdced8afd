//! Feature extraction shared by library indexing and block queries

/// Channel-major feature vectors for blocks and tiles
pub mod features;
