use crate::domain::{Allocation, Observation};
use crate::error::EnvError;
use serde::{Deserialize, Serialize};

/// Status flags reported by every step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeStatus {
    /// Out of data: the cursor reached the end of the series.
    pub ood: bool,
    /// The environment considers the episode finished. Ends a backtest;
    /// live trading carries on.
    pub terminal: bool,
    /// Fault captured while stepping. The run loops abort on it.
    pub error: Option<EnvError>,
}

impl EpisodeStatus {
    pub fn is_clean(&self) -> bool {
        !self.ood && !self.terminal && self.error.is_none()
    }
}

/// Result of applying one allocation.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f64,
    /// An order was placed on this step.
    pub done: bool,
    pub status: EpisodeStatus,
}

/// What `Environment::reset` clears besides the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetScope {
    /// Restore initial funds and an all-cash portfolio.
    pub funds: bool,
    /// Drop recorded step results.
    pub results: bool,
    /// Rewind the global step counter.
    pub global_step: bool,
}

impl ResetScope {
    /// Scope used before each backtest episode.
    pub fn episode() -> Self {
        Self {
            funds: true,
            results: true,
            global_step: false,
        }
    }

    pub fn full() -> Self {
        Self {
            funds: true,
            results: true,
            global_step: true,
        }
    }
}

/// Market simulation consumed by the run loops.
///
/// Implementations own the `position` column of the observations they emit:
/// after each step the weight held in every asset is written there, so
/// strategies can hold their previous allocation.
pub trait Environment {
    fn reset(&mut self, scope: ResetScope) -> Result<Observation, EnvError>;

    /// Apply an allocation. Faults are reported in `status.error`, never panicked.
    fn step(&mut self, action: &Allocation) -> StepOutcome;

    /// Latest window of `window` rows, sampled every `frequency` bars.
    fn observe(&mut self, window: usize, frequency: usize) -> Result<Observation, EnvError>;

    /// Training stage suppresses result recording and rendering.
    fn set_training_stage(&mut self, training: bool);

    fn is_training(&self) -> bool;

    fn render(&self);

    /// Clear status flags and errors left by a previous run.
    fn reset_status(&mut self);

    /// Total rows of market data available.
    fn data_len(&self) -> usize;

    /// Rows in each observation window.
    fn obs_steps(&self) -> usize;
}
