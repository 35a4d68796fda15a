use super::strategy::{with_cash_remainder, Agent, ModelState, Tunable};
use crate::domain::indicators::{last, mama};
use crate::domain::*;
use crate::error::AgentError;
use crate::optimize::{require, ParamRange, ParamSet, SearchSpace};
use serde::{Deserialize, Serialize};

/// Installed MESA limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MesaParams {
    /// Upper bound of the adaptive smoothing factor
    pub fast_limit: f64,
    /// Lower bound of the adaptive smoothing factor
    pub slow_limit: f64,
}

impl MesaParams {
    pub fn from_set(params: &ParamSet) -> Result<Self, AgentError> {
        let limit = |name: &str| -> Result<f64, AgentError> {
            let v = require(params, name)?;
            if !(v > 0.0 && v < 1.0) {
                return Err(AgentError::invalid_param(name, format!("{} outside (0, 1)", v)));
            }
            Ok(v)
        };
        Ok(Self {
            fast_limit: limit("fast_limit")?,
            slow_limit: limit("slow_limit")?,
        })
    }

    pub fn to_set(&self) -> ParamSet {
        let mut set = ParamSet::new();
        set.insert("fast_limit".into(), self.fast_limit);
        set.insert("slow_limit".into(), self.slow_limit);
        set
    }
}

/// Momentum from the MESA adaptive averages: long while MAMA leads FAMA.
#[derive(Default)]
pub struct MesaMomentumTrader {
    state: ModelState<MesaParams>,
}

impl MesaMomentumTrader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Agent for MesaMomentumTrader {
    fn name(&self) -> &str {
        "MesaMomentumTrader"
    }

    fn act(&mut self, obs: &Observation) -> Result<Allocation, AgentError> {
        let p = *self.state.get()?;
        let scores = obs
            .tradable()
            .map(|frame| {
                let (m, f) = mama(&frame.close, p.fast_limit, p.slow_limit);
                let (m, f) = (last(&m), last(&f));
                if m < f {
                    0.0
                } else if m > f {
                    m - f
                } else {
                    // Also reached while the averages are still warming up
                    frame.last(Field::Position).unwrap_or(0.0)
                }
            })
            .collect();
        Ok(with_cash_remainder(scores))
    }
}

impl Tunable for MesaMomentumTrader {
    fn search_space(&self, _obs_steps: usize) -> SearchSpace {
        SearchSpace::new()
            .with_param("fast_limit", ParamRange::continuous(0.01, 0.99))
            .with_param("slow_limit", ParamRange::continuous(0.01, 0.99))
    }

    fn set_params(&mut self, params: &ParamSet) -> Result<(), AgentError> {
        self.state.set(MesaParams::from_set(params)?);
        Ok(())
    }

    fn params(&self) -> Result<ParamSet, AgentError> {
        Ok(self.state.get()?.to_set())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::market::testing::{linear, test_env};
    use crate::backtest::{Environment, ResetScope};

    fn limits(fast: f64, slow: f64) -> ParamSet {
        MesaParams {
            fast_limit: fast,
            slow_limit: slow,
        }
        .to_set()
    }

    #[test]
    fn test_act_before_fit_fails() {
        let mut env = test_env(&[linear(60, 100.0, 1.0)], 50);
        let obs = env.reset(ResetScope::full()).unwrap();
        assert_eq!(
            MesaMomentumTrader::new().act(&obs).unwrap_err(),
            AgentError::NotFitted
        );
    }

    #[test]
    fn test_uptrend_goes_long() {
        let mut env = test_env(&[linear(61, 100.0, 1.0)], 60);
        let obs = env.reset(ResetScope::full()).unwrap();
        let mut agent = MesaMomentumTrader::new();
        agent.set_params(&limits(0.5, 0.05)).unwrap();
        let a = agent.act(&obs).unwrap();
        assert!(a.is_valid());
        assert!(a.weights()[0] > 0.9, "{:?}", a.weights());
    }

    #[test]
    fn test_downtrend_goes_to_cash() {
        let mut env = test_env(&[linear(61, 200.0, -1.0)], 60);
        let obs = env.reset(ResetScope::full()).unwrap();
        let mut agent = MesaMomentumTrader::new();
        agent.set_params(&limits(0.5, 0.05)).unwrap();
        assert_eq!(agent.act(&obs).unwrap().weights(), &[0.0, 1.0]);
    }

    #[test]
    fn test_short_window_holds_position() {
        // Too few rows for the averages: hold the all-cash start
        let mut env = test_env(&[linear(30, 100.0, 1.0)], 20);
        let obs = env.reset(ResetScope::full()).unwrap();
        let mut agent = MesaMomentumTrader::new();
        agent.set_params(&limits(0.5, 0.05)).unwrap();
        assert_eq!(agent.act(&obs).unwrap().weights(), &[0.0, 1.0]);
    }

    #[test]
    fn test_inverted_limits_still_act() {
        let mut env = test_env(&[linear(61, 100.0, 1.0)], 60);
        let obs = env.reset(ResetScope::full()).unwrap();
        let mut agent = MesaMomentumTrader::new();
        agent.set_params(&limits(0.05, 0.5)).unwrap();
        assert!(agent.act(&obs).unwrap().is_valid());
    }

    #[test]
    fn test_search_space_is_unconstrained() {
        let space = MesaMomentumTrader::new().search_space(50);
        assert_eq!(space.dim(), 2);
        assert!(!space.is_constrained());
        assert_eq!(space.range("fast_limit").unwrap().min, 0.01);
        assert_eq!(space.range("slow_limit").unwrap().max, 0.99);
    }

    #[test]
    fn test_set_params_rejects_out_of_range() {
        let mut agent = MesaMomentumTrader::new();
        assert!(agent.set_params(&limits(1.5, 0.05)).is_err());
        assert!(agent.set_params(&ParamSet::new()).is_err());
        agent.set_params(&limits(0.3, 0.1)).unwrap();
        assert_eq!(agent.params().unwrap()["fast_limit"], 0.3);
    }
}
