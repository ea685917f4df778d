//! Additive Gaussian sensor noise.

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::NoiseModel;

/// Seeded source of Gaussian perturbations.
pub struct NoiseGenerator {
    rng: StdRng,
}

impl NoiseGenerator {
    /// Deterministic generator when `seed` is given, entropy-seeded otherwise.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// `value + mean + stddev * N(0, 1)`.
    pub fn apply(&mut self, value: f64, model: NoiseModel) -> f64 {
        value + model.mean + self.gaussian(model.stddev)
    }

    /// Perturb each component independently.
    pub fn apply_vector(&mut self, v: &Vector3<f64>, model: NoiseModel) -> Vector3<f64> {
        Vector3::new(
            self.apply(v.x, model),
            self.apply(v.y, model),
            self.apply(v.z, model),
        )
    }

    /// Zero-mean sample with the given standard deviation (Box-Muller).
    pub fn gaussian(&mut self, stddev: f64) -> f64 {
        if stddev == 0.0 {
            return 0.0;
        }
        let u1: f64 = self.rng.gen::<f64>().max(f64::EPSILON);
        let u2: f64 = self.rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        z * stddev
    }
}

impl std::fmt::Debug for NoiseGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseGenerator").finish_non_exhaustive()
    }
}
