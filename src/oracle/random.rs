//! Coin-flip oracle for offline runs.

use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{DecisionOracle, OracleRequest, Verdict};
use crate::error::OracleError;

/// Engages half the time with a uniform priority. Needs no network.
#[derive(Debug)]
pub struct RandomOracle {
    rng: Mutex<StdRng>,
    engage_probability: f64,
}

impl Default for RandomOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomOracle {
    /// Entropy-seeded oracle
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Reproducible oracle
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            engage_probability: 0.5,
        }
    }

    /// Set the probability of engaging
    pub fn with_engage_probability(mut self, p: f64) -> Self {
        self.engage_probability = p.clamp(0.0, 1.0);
        self
    }
}

#[async_trait]
impl DecisionOracle for RandomOracle {
    async fn decide(&self, _request: &OracleRequest) -> Result<Verdict, OracleError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| OracleError::Transport("random oracle lock poisoned".into()))?;
        let engage = rng.gen_bool(self.engage_probability);
        let priority: f64 = rng.gen();
        let reason = if engage {
            "the coin came up heads"
        } else {
            "the coin came up tails"
        };
        Ok(Verdict::new(engage, reason, priority))
    }

    fn name(&self) -> &str {
        "random"
    }
}
