//! Injectable randomness.
//!
//! Every random choice the engine makes (seed node, reactivation, base
//! target count, fallback verdicts) goes through [`RandomSource`], so tests
//! can script outcomes exactly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Uniform draws used by the propagation engine.
pub trait RandomSource: Send {
    /// Uniform value in `[0, 1)`
    fn next_unit(&mut self) -> f64;

    /// Uniform index in `0..len`. `len` is never zero.
    fn next_index(&mut self, len: usize) -> usize;
}

/// [`RandomSource`] over any `rand` generator.
#[derive(Debug, Clone)]
pub struct RngSource<R = StdRng> {
    rng: R,
}

impl RngSource<StdRng> {
    /// Entropy-seeded source
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Reproducible source
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    /// Seeded when `seed` is set, entropy otherwise
    pub fn maybe_seeded(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }
}

impl<R: Rng + Send> RngSource<R> {
    /// Wrap an existing generator
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng + Send> RandomSource for RngSource<R> {
    fn next_unit(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    fn next_index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }
}
