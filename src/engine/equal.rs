use super::strategy::Agent;
use crate::domain::*;
use crate::error::AgentError;

/// Equal weight on every tradable asset, nothing in cash.
#[derive(Debug, Clone, Default)]
pub struct EqualWeightTrader;

impl EqualWeightTrader {
    pub fn new() -> Self {
        Self
    }
}

impl Agent for EqualWeightTrader {
    fn name(&self) -> &str {
        "EqualWeightTrader"
    }

    fn act(&mut self, obs: &Observation) -> Result<Allocation, AgentError> {
        let raw: Vec<f64> = obs
            .assets()
            .iter()
            .map(|a| if a.is_cash() { 0.0 } else { 1.0 })
            .collect();
        Ok(Allocation::normalize(&raw))
    }
}
