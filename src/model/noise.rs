use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::types::NoiseMat;

/// Monte-Carlo measurement noise.
///
/// Each call draws a fresh `h × max(h, 2)` standard-normal matrix and uses the
/// unbiased variance of every row as the corresponding diagonal entry of R.
/// One synthesizer belongs to exactly one estimation unit; seeding it
/// explicitly keeps runs reproducible and units independent.
pub struct NoiseSynthesizer {
    rng: ChaCha8Rng,
}

impl NoiseSynthesizer {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Diagonal R for an `dim`-channel observation.
    pub fn measurement_noise(&mut self, dim: usize) -> NoiseMat {
        let draws = dim.max(2);
        let mut r = NoiseMat::zeros(dim, dim);
        let mut row = vec![0.0; draws];
        for i in 0..dim {
            for slot in row.iter_mut() {
                *slot = StandardNormal.sample(&mut self.rng);
            }
            r[(i, i)] = sample_variance(&row);
        }
        r
    }
}

/// Unbiased (N-1) sample variance; zero for fewer than two values.
pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0)
}
