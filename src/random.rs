//! Seedable random variates shared by both models.

use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Normal, Uniform};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Source of every random draw made by a simulation.
#[derive(Clone, Serialize, Deserialize)]
pub struct Variates {
    rng: ChaCha12Rng,
}

impl Variates {
    /// Create a provider from a fixed seed, or from the OS generator when `seed` is `None`.
    pub fn new(seed: Option<u64>) -> Result<Self> {
        let rng = match seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng().context("failed to seed from OS rng")?,
        };
        Ok(Self { rng })
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha12Rng::seed_from_u64(seed),
        }
    }

    /// Uniform draw in `[0, 1)`.
    pub fn uniform01(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// `true` with probability `prob`.
    pub fn chance(&mut self, prob: f64) -> bool {
        self.uniform01() < prob
    }

    pub fn normal(&mut self, mean: f64, sd: f64) -> Result<f64> {
        let dist = Normal::new(mean, sd).context("invalid normal distribution")?;
        Ok(dist.sample(&mut self.rng))
    }

    /// Uniform heading in radians.
    pub fn heading(&mut self) -> Result<f64> {
        let dist = Uniform::new(0.0, TAU)?;
        Ok(dist.sample(&mut self.rng))
    }

    /// Uniform index in `0..len`. `len` must be positive.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.random_range(0..len)
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }

    /// Draw a key from which independent per-entity streams are derived.
    pub fn split(&mut self) -> StreamKey {
        let mut key = [0u8; 32];
        self.rng.fill_bytes(&mut key);
        StreamKey(key)
    }
}

/// Key of a family of independent generators, one per stream id.
///
/// The generator for a stream does not depend on which other streams were
/// requested or in which order.
#[derive(Clone, Copy)]
pub struct StreamKey([u8; 32]);

impl StreamKey {
    pub fn stream(&self, id: u64) -> Variates {
        let mut rng = ChaCha12Rng::from_seed(self.0);
        rng.set_stream(id);
        Variates { rng }
    }
}

/// Erlang cumulative distribution function.
///
/// Equals the regularized lower incomplete gamma function `P(shape, x / scale)`
/// for integer `shape`, evaluated from the Poisson tail in log space.
pub fn erlang_cdf(x: f64, shape: u32, scale: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    let y = x / scale;
    let ln_y = y.ln();
    let mut ln_fact = 0.0;
    let mut tail = 0.0;
    for n in 0..shape {
        if n > 0 {
            ln_fact += (n as f64).ln();
        }
        tail += (n as f64 * ln_y - y - ln_fact).exp();
    }
    (1.0 - tail).clamp(0.0, 1.0)
}
