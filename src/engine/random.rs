use super::strategy::Agent;
use crate::domain::*;
use crate::error::AgentError;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

/// Source of raw per-asset scores.
pub trait Sampler {
    /// Draw `n` scores.
    fn sample(&mut self, n: usize) -> Vec<f64>;
}

/// Independent uniform scores in `[0, 1)`.
pub struct UniformNoise {
    rng: StdRng,
}

impl UniformNoise {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Sampler for UniformNoise {
    fn sample(&mut self, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.rng.gen::<f64>()).collect()
    }
}

/// Independent normal scores.
pub struct GaussianNoise {
    dist: Normal,
    rng: StdRng,
}

impl GaussianNoise {
    pub fn new(mean: f64, std_dev: f64, seed: u64) -> Result<Self, AgentError> {
        let dist = Normal::new(mean, std_dev)
            .map_err(|e| AgentError::invalid_param("std_dev", e.to_string()))?;
        Ok(Self {
            dist,
            rng: StdRng::seed_from_u64(seed),
        })
    }
}

impl Sampler for GaussianNoise {
    fn sample(&mut self, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.dist.sample(&mut self.rng)).collect()
    }
}

/// Mean-reverting Ornstein-Uhlenbeck process, one coordinate per asset.
///
/// `x += theta * (mu - x) * dt + sigma * sqrt(dt) * N(0, 1)`. The state is
/// resized (and restarted at `mu`) whenever the asset count changes.
pub struct OrnsteinUhlenbeck {
    pub mu: f64,
    pub theta: f64,
    pub sigma: f64,
    pub dt: f64,
    state: Vec<f64>,
    unit: Normal,
    rng: StdRng,
}

impl OrnsteinUhlenbeck {
    pub fn new(mu: f64, theta: f64, sigma: f64, seed: u64) -> Result<Self, AgentError> {
        if !(theta >= 0.0 && sigma >= 0.0) {
            return Err(AgentError::invalid_param(
                "theta",
                "theta and sigma must be non-negative",
            ));
        }
        let unit = Normal::new(0.0, 1.0).map_err(|e| AgentError::strategy(e.to_string()))?;
        Ok(Self {
            mu,
            theta,
            sigma,
            dt: 1.0,
            state: Vec::new(),
            unit,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn reset(&mut self) {
        self.state.iter_mut().for_each(|x| *x = self.mu);
    }
}

impl Sampler for OrnsteinUhlenbeck {
    fn sample(&mut self, n: usize) -> Vec<f64> {
        if self.state.len() != n {
            self.state = vec![self.mu; n];
        }
        let diffusion = self.sigma * self.dt.sqrt();
        for x in self.state.iter_mut() {
            let shock: f64 = self.unit.sample(&mut self.rng);
            *x += self.theta * (self.mu - *x) * self.dt + diffusion * shock;
        }
        self.state.clone()
    }
}

/// Map from raw scores to weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    Softmax,
    /// Plain sum normalization; negative scores count as zero.
    Normalize,
}

/// Random allocations, for baselines and plumbing tests.
pub struct DummyTrader {
    sampler: Box<dyn Sampler + Send>,
    activation: Activation,
}

impl DummyTrader {
    /// Uniform noise with softmax activation.
    pub fn new(seed: u64) -> Self {
        Self::with_sampler(Box::new(UniformNoise::new(seed)), Activation::Softmax)
    }

    pub fn with_sampler(sampler: Box<dyn Sampler + Send>, activation: Activation) -> Self {
        Self {
            sampler,
            activation,
        }
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }
}

impl Agent for DummyTrader {
    fn name(&self) -> &str {
        "DummyTrader"
    }

    fn act(&mut self, obs: &Observation) -> Result<Allocation, AgentError> {
        let n = obs.n_assets();
        let raw = self.sampler.sample(n);
        if raw.len() != n {
            return Err(AgentError::strategy(format!(
                "sampler returned {} scores for {} assets",
                raw.len(),
                n
            )));
        }
        Ok(match self.activation {
            Activation::Softmax => Allocation::softmax(&raw),
            Activation::Normalize => Allocation::normalize(&raw),
        })
    }
}
