//! Tests for graph layer sampling

#[cfg(test)]
mod tests {
    use patchmosaic::math::probability::{MAX_LAYER, level_multiplier, sample_layer};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    // Tests the 1/ln(M) normalisation and its floor at M = 2
    // Verified by using log base 10
    #[test]
    fn test_level_multiplier() {
        assert!((level_multiplier(16) - 1.0 / 16_f64.ln()).abs() < 1e-12);
        assert!((level_multiplier(0) - level_multiplier(2)).abs() < 1e-12);
    }

    // Tests that most nodes land on layer 0 and none exceed the cap
    // Verified by negating the logarithm sign
    #[test]
    fn test_sample_layer_distribution() {
        let mut rng = StdRng::seed_from_u64(7);
        let multiplier = level_multiplier(16);

        let layers: Vec<usize> = (0..10_000)
            .map(|_| sample_layer(&mut rng, multiplier))
            .collect();

        let bottom = layers.iter().filter(|&&layer| layer == 0).count();
        // P(layer 0) = 1 - 1/M = 0.9375
        assert!((9_200..=9_550).contains(&bottom), "bottom layer count {bottom}");
        assert!(layers.iter().all(|&layer| layer <= MAX_LAYER));
    }
}
