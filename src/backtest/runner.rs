use super::env::{Environment, ResetScope};
use super::interrupt::Interrupt;
use crate::engine::Agent;
use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info, warn};

/// Verbose progress lines per episode.
const PROGRESS_LINES: usize = 20;

/// Steps between verbose progress lines for an episode of `max_steps`.
fn progress_every(max_steps: usize) -> usize {
    (max_steps / PROGRESS_LINES).max(1)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestOptions {
    /// Step cap. Defaults to `data_len - obs_steps`.
    pub max_steps: Option<usize>,
    /// Log progress with an ETA.
    pub verbose: bool,
    /// Render the environment after each step.
    pub visualize: bool,
}

/// Why a run loop stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Termination {
    OutOfData,
    /// The environment flagged the episode as finished.
    Terminal,
    StepLimit,
    EnvFault { kind: String, message: String },
    StrategyFault { kind: String, message: String },
    Interrupted,
}

impl Termination {
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::EnvFault { .. } | Self::StrategyFault { .. })
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfData => write!(f, "out of data"),
            Self::Terminal => write!(f, "terminal state"),
            Self::StepLimit => write!(f, "step limit"),
            Self::EnvFault { kind, message } => write!(f, "{}: {}", kind, message),
            Self::StrategyFault { kind, message } => write!(f, "{}: {}", kind, message),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Outcome of one backtest episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeReport {
    /// Sum of step rewards, partial when the run stopped early
    pub reward: f64,
    pub steps: usize,
    pub max_steps: usize,
    pub termination: Termination,
}

/// Run one episode at full speed.
///
/// Environment and strategy faults end the episode and are reported in the
/// termination; only an unfitted agent is returned as an error, since no
/// meaningful reward exists for it.
pub fn backtest<A, E>(
    agent: &mut A,
    env: &mut E,
    options: &BacktestOptions,
    interrupt: &Interrupt,
) -> Result<EpisodeReport, AgentError>
where
    A: Agent + ?Sized,
    E: Environment + ?Sized,
{
    let max_steps = options
        .max_steps
        .unwrap_or_else(|| env.data_len().saturating_sub(env.obs_steps()));

    env.reset_status();
    let mut obs = match env.reset(ResetScope::episode()) {
        Ok(obs) => obs,
        Err(e) => {
            error!("{} reset failed: {} ({})", agent.name(), e, e.kind());
            return Ok(EpisodeReport {
                reward: 0.0,
                steps: 0,
                max_steps,
                termination: Termination::EnvFault {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                },
            });
        }
    };

    let started = Instant::now();
    let log_every = progress_every(max_steps);
    let mut reward = 0.0;
    let mut steps = 0;

    let termination = loop {
        if interrupt.is_triggered() {
            let pct = if max_steps > 0 {
                steps as f64 / max_steps as f64 * 100.0
            } else {
                100.0
            };
            warn!(
                "{} backtest interrupted at step {}/{} ({:.1}%), reward {:.6}",
                agent.name(),
                steps,
                max_steps,
                pct,
                reward
            );
            break Termination::Interrupted;
        }
        if steps >= max_steps {
            break Termination::StepLimit;
        }

        let action = match agent.act(&obs) {
            Ok(action) => action,
            Err(AgentError::NotFitted) => {
                error!("must fit the model or provide indicator parameters before testing");
                return Err(AgentError::NotFitted);
            }
            Err(e) => {
                error!("{} failed at step {}: {} ({})", agent.name(), steps, e, e.kind());
                break Termination::StrategyFault {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                };
            }
        };

        let outcome = env.step(&action);
        reward += outcome.reward;
        steps += 1;
        obs = outcome.observation;

        if options.visualize {
            env.render();
        }
        if options.verbose && steps % log_every == 0 {
            let elapsed = started.elapsed().as_secs_f64();
            let eta = elapsed / steps as f64 * max_steps.saturating_sub(steps) as f64;
            info!(
                "{} step {}/{} reward {:.6} elapsed {:.1}s ETA {:.1}s",
                agent.name(),
                steps,
                max_steps,
                reward,
                elapsed,
                eta
            );
        }

        if let Some(e) = outcome.status.error {
            error!("Environment fault at step {}: {} ({})", steps, e, e.kind());
            break Termination::EnvFault {
                kind: e.kind().to_string(),
                message: e.to_string(),
            };
        }
        if outcome.status.ood {
            break Termination::OutOfData;
        }
        if outcome.status.terminal {
            break Termination::Terminal;
        }
    };

    if options.verbose {
        info!(
            "{} backtest finished: {} steps, reward {:.6}, {} in {:.2}s",
            agent.name(),
            steps,
            reward,
            termination,
            started.elapsed().as_secs_f64()
        );
    }

    Ok(EpisodeReport {
        reward,
        steps,
        max_steps,
        termination,
    })
}
