use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Uniform 8-bit white noise.
///
/// Seeded sources replay the same stream on every run; unseeded ones draw
/// their seed from the OS.
pub struct NoiseSource {
    rng: StdRng,
}

impl NoiseSource {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    pub fn fill(&mut self, buffer: &mut [u8]) {
        self.rng.fill(buffer);
    }
}
