//! Distance functions for feature vector comparison

const LANES: usize = 8;

/// Squared Euclidean distance between two equally sized vectors
///
/// Accumulates in independent lanes so the loop vectorises. Extra components
/// of the longer input are ignored.
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    let mut lanes = [0.0_f32; LANES];
    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let a_tail = a_chunks.remainder();
    let b_tail = b_chunks.remainder();

    for (chunk_a, chunk_b) in a_chunks.zip(b_chunks) {
        for ((lane, x), y) in lanes.iter_mut().zip(chunk_a).zip(chunk_b) {
            let d = x - y;
            *lane = d.mul_add(d, *lane);
        }
    }

    let tail: f32 = a_tail
        .iter()
        .zip(b_tail)
        .map(|(x, y)| (x - y) * (x - y))
        .sum();

    lanes.iter().sum::<f32>() + tail
}
