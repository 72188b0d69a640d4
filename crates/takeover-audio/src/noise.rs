//! Gaussian white noise.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::gain::clip_to_i16;

/// Standard deviation of generated samples before gain.
pub const NOISE_STD_DEV: f32 = i16::MAX as f32 / 3.5;

/// Produces independent normally distributed samples for every channel.
pub struct NoiseGenerator {
    rng: StdRng,
    gain: f32,
}

impl NoiseGenerator {
    pub fn new(gain: f32) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            gain,
        }
    }

    /// Deterministic generator.
    pub fn with_seed(seed: u64, gain: f32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            gain,
        }
    }

    /// Fill an interleaved buffer.
    pub fn fill(&mut self, buffer: &mut [i16]) {
        let scale = NOISE_STD_DEV * self.gain;
        for sample in buffer.iter_mut() {
            let z: f32 = self.rng.sample(StandardNormal);
            *sample = clip_to_i16(z * scale);
        }
    }
}
