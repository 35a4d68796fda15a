use crate::domain::*;
use crate::error::AgentError;
use crate::optimize::{ParamSet, SearchSpace};
use serde::{Deserialize, Serialize};

/// Trait separating the allocation decision from the environment that executes it.
///
/// The backtest and live loops only ever see `impl Agent`, so a strategy runs
/// unchanged against a replayed market or a live one. Strategies receive the
/// observation by shared reference: anything derived from it is computed into
/// fresh buffers.
pub trait Agent {
    fn name(&self) -> &str;

    /// Target weights for the next period, one per asset, cash last.
    fn act(&mut self, obs: &Observation) -> Result<Allocation, AgentError>;
}

/// Strategy with numeric hyperparameters that can be searched.
pub trait Tunable: Agent {
    /// Box, integrality and feasibility of the parameters for a window of `obs_steps` rows.
    fn search_space(&self, obs_steps: usize) -> SearchSpace;

    /// Install parameters, replacing any previous ones.
    fn set_params(&mut self, params: &ParamSet) -> Result<(), AgentError>;

    /// Currently installed parameters. `NotFitted` before the first install.
    fn params(&self) -> Result<ParamSet, AgentError>;
}

/// Fitted-parameter slot of a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelState<P> {
    Unfitted,
    Fitted(P),
}

impl<P> Default for ModelState<P> {
    fn default() -> Self {
        Self::Unfitted
    }
}

impl<P> ModelState<P> {
    pub fn get(&self) -> Result<&P, AgentError> {
        match self {
            Self::Fitted(params) => Ok(params),
            Self::Unfitted => Err(AgentError::NotFitted),
        }
    }

    pub fn set(&mut self, params: P) {
        *self = Self::Fitted(params);
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self, Self::Fitted(_))
    }
}

/// Close a score vector over the tradable assets into an allocation.
///
/// Cash receives whatever the scores leave of one unit, never less than zero,
/// and the result is sum-normalized. Non-finite scores count as zero.
pub fn with_cash_remainder(mut scores: Vec<f64>) -> Allocation {
    for s in scores.iter_mut() {
        if !s.is_finite() {
            *s = 0.0;
        }
    }
    let invested: f64 = scores.iter().sum();
    scores.push((1.0 - invested).max(0.0));
    Allocation::normalize(&scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_state_lifecycle() {
        let mut state: ModelState<u32> = ModelState::default();
        assert_eq!(state.get().unwrap_err(), AgentError::NotFitted);
        assert!(!state.is_fitted());
        state.set(3);
        assert_eq!(*state.get().unwrap(), 3);
        state.set(5);
        assert_eq!(*state.get().unwrap(), 5);
    }

    #[test]
    fn test_cash_takes_remainder() {
        let a = with_cash_remainder(vec![0.2, 0.3]);
        assert_eq!(a.len(), 3);
        assert!((a.weights()[2] - 0.5).abs() < 1e-12);
        assert!(a.is_valid());
    }

    #[test]
    fn test_overinvested_scores_leave_no_cash() {
        let a = with_cash_remainder(vec![2.0, 6.0]);
        assert_eq!(a.weights(), &[0.25, 0.75, 0.0]);
    }

    #[test]
    fn test_nan_scores_fall_back_to_cash() {
        let a = with_cash_remainder(vec![f64::NAN, 0.0]);
        assert_eq!(a.weights(), &[0.0, 0.0, 1.0]);
    }
}
