use super::strategy::{with_cash_remainder, Agent, ModelState, Tunable};
use crate::domain::indicators::{self, last};
use crate::domain::*;
use crate::error::AgentError;
use crate::optimize::{require, ParamRange, ParamSet, SearchSpace};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Keeps the entry score finite on a flat window.
pub const EPSILON: f64 = 1e-8;

/// Moving average used for the fast and slow lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MeanKind {
    Simple,
    Exponential,
    #[default]
    Kama,
}

impl MeanKind {
    pub fn series(&self, close: &[f64], window: usize) -> Vec<f64> {
        match self {
            Self::Simple => indicators::sma(close, window),
            Self::Exponential => indicators::ema(close, window),
            Self::Kama => indicators::kama(close, window),
        }
    }
}

impl FromStr for MeanKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" | "sma" => Ok(Self::Simple),
            "exp" | "ema" | "exponential" => Ok(Self::Exponential),
            "kama" => Ok(Self::Kama),
            other => Err(AgentError::invalid_param(
                "mean_type",
                format!("unknown mean type `{}`", other),
            )),
        }
    }
}

/// Installed momentum parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumParams {
    /// Fast moving-average window
    pub ma1: usize,
    /// Slow moving-average window
    pub ma2: usize,
    /// Window of the centered volatility estimate
    pub std_span: usize,
    /// Volatility multiples below the slow line that trigger an exit
    pub std_weight_down: f64,
    /// Volatility multiples above the slow line that trigger an entry
    pub std_weight_up: f64,
}

impl MomentumParams {
    pub fn from_set(params: &ParamSet) -> Result<Self, AgentError> {
        let window = |name: &str| -> Result<usize, AgentError> {
            let v = require(params, name)?.round();
            if v < 1.0 {
                return Err(AgentError::invalid_param(name, format!("window {} below 1", v)));
            }
            Ok(v as usize)
        };
        let weight = |name: &str| -> Result<f64, AgentError> {
            let v = require(params, name)?;
            if v < 0.0 {
                return Err(AgentError::invalid_param(name, format!("{} is negative", v)));
            }
            Ok(v)
        };
        Ok(Self {
            ma1: window("ma1")?,
            ma2: window("ma2")?,
            std_span: window("std_span")?,
            std_weight_down: weight("std_weight_down")?,
            std_weight_up: weight("std_weight_up")?,
        })
    }

    pub fn to_set(&self) -> ParamSet {
        [
            ("ma1", self.ma1 as f64),
            ("ma2", self.ma2 as f64),
            ("std_span", self.std_span as f64),
            ("std_weight_down", self.std_weight_down),
            ("std_weight_up", self.std_weight_up),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

/// Threshold rule shared by the momentum strategies.
///
/// Below `slow - down * vol` the asset is dropped, above `slow + up * vol`
/// it is scored by the gap in volatility units, in between the held weight
/// is kept.
pub fn momentum_score(fast: f64, slow: f64, vol: f64, down: f64, up: f64, held: f64) -> f64 {
    if fast < slow - down * vol {
        0.0
    } else if fast > slow + up * vol {
        (fast - slow) / (vol + EPSILON)
    } else {
        held
    }
}

/// Moving-average crossover with volatility bands.
pub struct MomentumTrader {
    mean: MeanKind,
    state: ModelState<MomentumParams>,
}

impl MomentumTrader {
    pub fn new(mean: MeanKind) -> Self {
        Self {
            mean,
            state: ModelState::default(),
        }
    }

    pub fn mean_kind(&self) -> MeanKind {
        self.mean
    }

    fn score(&self, frame: &AssetFrame, p: &MomentumParams) -> f64 {
        let fast = last(&self.mean.series(&frame.close, p.ma1));
        let slow = last(&self.mean.series(&frame.close, p.ma2));
        // Centered window: the last row only sees the trailing half
        let vol = last(&indicators::rolling_std_centered(&frame.close, p.std_span));
        let held = frame.last(Field::Position).unwrap_or(0.0);
        momentum_score(fast, slow, vol, p.std_weight_down, p.std_weight_up, held)
    }
}

impl Default for MomentumTrader {
    fn default() -> Self {
        Self::new(MeanKind::default())
    }
}

impl Agent for MomentumTrader {
    fn name(&self) -> &str {
        "MomentumTrader"
    }

    fn act(&mut self, obs: &Observation) -> Result<Allocation, AgentError> {
        let params = self.state.get()?;
        let scores = obs.tradable().map(|frame| self.score(frame, params)).collect();
        Ok(with_cash_remainder(scores))
    }
}

impl Tunable for MomentumTrader {
    fn search_space(&self, obs_steps: usize) -> SearchSpace {
        let top = obs_steps.max(2) as f64;
        SearchSpace::new()
            .with_param("ma1", ParamRange::integer(2.0, top))
            .with_param("ma2", ParamRange::integer(2.0, top))
            .with_param("std_span", ParamRange::integer(1.0, top))
            .with_param("std_weight_down", ParamRange::continuous(0.0, 3.0))
            .with_param("std_weight_up", ParamRange::continuous(0.0, 3.0))
            .with_constraint(|p| match (p.get("ma1"), p.get("ma2")) {
                (Some(fast), Some(slow)) => fast < slow,
                _ => false,
            })
    }

    fn set_params(&mut self, params: &ParamSet) -> Result<(), AgentError> {
        self.state.set(MomentumParams::from_set(params)?);
        Ok(())
    }

    fn params(&self) -> Result<ParamSet, AgentError> {
        Ok(self.state.get()?.to_set())
    }
}
