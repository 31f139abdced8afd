//! Random layer assignment for hierarchical graph construction

use rand::Rng;

/// Layer cap so a pathological draw cannot allocate an unbounded hierarchy
pub const MAX_LAYER: usize = 16;

/// Level normalisation factor `1 / ln(M)` for a graph of degree `M`
pub fn level_multiplier(max_connections: usize) -> f64 {
    1.0 / (max_connections.max(2) as f64).ln()
}

/// Draw a node's top layer from the exponentially decaying distribution
/// `floor(-ln(U) * mL)` with `U` uniform on `(0, 1]`
pub fn sample_layer<R: Rng + ?Sized>(rng: &mut R, multiplier: f64) -> usize {
    let uniform: f64 = rng.random::<f64>();
    // Map [0, 1) onto (0, 1] so ln never sees zero
    let draw = (1.0 - uniform).max(f64::MIN_POSITIVE);
    let layer = (-draw.ln() * multiplier).floor();
    (layer as usize).min(MAX_LAYER)
}
