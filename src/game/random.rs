//! Randomness injected into the fishing rules
//!
//! The engine only ever asks for uniform draws in `[0, 1)`. Production code
//! wraps a `rand` generator; tests feed a fixed script of draws so every
//! transition is reproducible.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform draws in `[0, 1)`
pub trait RandomSource {
    fn unit(&mut self) -> f64;

    /// Uniform integer in `[min, max]` using the same draw the rules use for
    /// bite delays: `min + unit * (max - min)`, rounded to the nearest whole.
    fn between(&mut self, min: u64, max: u64) -> u64 {
        let span = max.saturating_sub(min) as f64;
        let value = min as f64 + self.unit() * span;
        (value.round() as u64).clamp(min, max.max(min))
    }
}

/// Adapter from any `rand` generator
#[derive(Debug, Clone)]
pub struct RandSource<R: Rng>(pub R);

impl RandSource<StdRng> {
    /// Entropy-seeded generator for live sessions
    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }

    /// Deterministic generator for simulations and benchmarks
    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> RandomSource for RandSource<R> {
    fn unit(&mut self) -> f64 {
        self.0.gen::<f64>()
    }
}

/// Replays a fixed sequence of draws, then falls back to a constant.
///
/// Used to force specific delays and bite rolls when checking the rules
/// against known scenarios.
#[derive(Debug, Clone)]
pub struct ScriptedRandom {
    draws: VecDeque<f64>,
    fallback: f64,
}

impl ScriptedRandom {
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        Self {
            draws: draws.into_iter().collect(),
            fallback: 0.0,
        }
    }

    /// Value returned once the script runs out
    pub fn with_fallback(mut self, fallback: f64) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn push(&mut self, draw: f64) {
        self.draws.push_back(draw);
    }

    pub fn remaining(&self) -> usize {
        self.draws.len()
    }
}

impl RandomSource for ScriptedRandom {
    fn unit(&mut self) -> f64 {
        self.draws.pop_front().unwrap_or(self.fallback)
    }
}
