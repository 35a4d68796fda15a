use crate::error::AgentError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named parameter assignment. Ordered by name so vectors built from it are stable.
pub type ParamSet = BTreeMap<String, f64>;

/// Feasibility predicate over a rounded candidate.
pub type Constraint = Box<dyn Fn(&ParamSet) -> bool + Send + Sync>;

/// Read a required parameter.
pub fn require(params: &ParamSet, name: &str) -> Result<f64, AgentError> {
    let value = params
        .get(name)
        .copied()
        .ok_or_else(|| AgentError::missing_param(name))?;
    if !value.is_finite() {
        return Err(AgentError::invalid_param(name, format!("{} is not finite", value)));
    }
    Ok(value)
}

/// Closed interval a parameter is searched in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    /// Candidates are rounded to the nearest integer before use.
    pub integral: bool,
}

impl ParamRange {
    pub fn new(min: f64, max: f64, integral: bool) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self { min, max, integral }
    }

    pub fn continuous(min: f64, max: f64) -> Self {
        Self::new(min, max, false)
    }

    pub fn integer(min: f64, max: f64) -> Self {
        Self::new(min, max, true)
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn round(&self, value: f64) -> f64 {
        if self.integral {
            value.round()
        } else {
            value
        }
    }

    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        if self.width() <= 0.0 {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }
}

/// Box-constrained parameter space with an optional feasibility predicate.
pub struct SearchSpace {
    ranges: BTreeMap<String, ParamRange>,
    constraint: Option<Constraint>,
    default_score: f64,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SearchSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchSpace")
            .field("ranges", &self.ranges)
            .field("constrained", &self.constraint.is_some())
            .field("default_score", &self.default_score)
            .finish()
    }
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            ranges: BTreeMap::new(),
            constraint: None,
            default_score: f64::NEG_INFINITY,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, range: ParamRange) -> Self {
        self.ranges.insert(name.into(), range);
        self
    }

    pub fn with_constraint(
        mut self,
        constraint: impl Fn(&ParamSet) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.constraint = Some(Box::new(constraint));
        self
    }

    /// Score given to infeasible candidates without evaluating them.
    pub fn with_default_score(mut self, score: f64) -> Self {
        self.default_score = score;
        self
    }

    pub fn ranges(&self) -> impl Iterator<Item = (&str, &ParamRange)> {
        self.ranges.iter().map(|(name, range)| (name.as_str(), range))
    }

    pub fn range(&self, name: &str) -> Option<&ParamRange> {
        self.ranges.get(name)
    }

    pub fn dim(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn default_score(&self) -> f64 {
        self.default_score
    }

    pub fn is_constrained(&self) -> bool {
        self.constraint.is_some()
    }

    /// Round integral parameters. Names outside the space pass through untouched.
    pub fn round(&self, params: &ParamSet) -> ParamSet {
        params
            .iter()
            .map(|(name, &value)| {
                let value = match self.ranges.get(name) {
                    Some(range) => range.round(value),
                    None => value,
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// Predicate check. Always true for an unconstrained space.
    pub fn is_feasible(&self, params: &ParamSet) -> bool {
        self.constraint.as_ref().map_or(true, |check| check(params))
    }

    /// Every parameter present, finite and inside its range.
    pub fn validate(&self, params: &ParamSet) -> Result<(), AgentError> {
        for (name, range) in &self.ranges {
            let value = require(params, name)?;
            if !range.contains(value) {
                return Err(AgentError::invalid_param(
                    name.as_str(),
                    format!("{} outside [{}, {}]", value, range.min, range.max),
                ));
            }
        }
        Ok(())
    }

    /// Map a solver coordinate vector (in name order) onto named parameters.
    pub fn assign(&self, coords: &[f64]) -> ParamSet {
        self.ranges
            .keys()
            .zip(coords)
            .map(|(name, &v)| (name.clone(), v))
            .collect()
    }

    pub fn coordinates(&self, params: &ParamSet) -> Vec<f64> {
        self.ranges
            .iter()
            .map(|(name, range)| params.get(name).copied().unwrap_or(range.min))
            .collect()
    }

    /// Ranges in coordinate order.
    pub fn bounds(&self) -> Vec<ParamRange> {
        self.ranges.values().copied().collect()
    }

    pub fn sample(&self, rng: &mut impl Rng) -> ParamSet {
        self.ranges
            .iter()
            .map(|(name, range)| (name.clone(), range.sample(rng)))
            .collect()
    }
}
