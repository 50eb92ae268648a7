//! Focus-test sampling for the context document.
//!
//! Each cycle surfaces one failing test chosen uniformly at random, so a single
//! stubborn case cannot monopolize the agent while easier fixes wait.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Picks one failing test per cycle from an injectable random source.
#[derive(Debug, Clone)]
pub struct FailureSampler<R: Rng = StdRng> {
    rng: R,
}

impl FailureSampler<StdRng> {
    /// Deterministic sampler for reproducible runs and tests.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl<R: Rng> FailureSampler<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Uniformly choose one candidate, or `None` when there are none.
    pub fn sample<'a>(&mut self, candidates: &'a [String]) -> Option<&'a str> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..candidates.len());
        Some(candidates[idx].as_str())
    }
}
