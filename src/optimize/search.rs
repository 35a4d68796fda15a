use super::solver::{Optimizer, ParticleSwarm, RandomSearch, SwarmConfig, Trial};
use super::space::ParamSet;
use crate::backtest::{backtest, BacktestOptions, Environment, Interrupt, ResetScope, Termination};
use crate::engine::Tunable;
use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Black-box solver driving the search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolverKind {
    #[default]
    ParticleSwarm,
    RandomSearch,
}

impl FromStr for SolverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pso" | "swarm" | "particle-swarm" => Ok(Self::ParticleSwarm),
            "random" | "random-search" => Ok(Self::RandomSearch),
            other => Err(format!("unknown solver `{}`", other)),
        }
    }
}

/// Hyperparameter search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Objective evaluations (one backtest each)
    pub num_evals: usize,
    pub solver: SolverKind,
    /// Swarm size for the particle solver
    pub num_particles: usize,
    pub seed: u64,
    /// Step cap per evaluation. Defaults to the whole series.
    pub max_episode_steps: Option<usize>,
    /// Log a progress line after every evaluation
    pub verbose: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            num_evals: 100,
            solver: SolverKind::default(),
            num_particles: 10,
            seed: 42,
            max_episode_steps: None,
            verbose: true,
        }
    }
}

impl FitConfig {
    pub fn build_solver(&self) -> Box<dyn Optimizer> {
        match self.solver {
            SolverKind::ParticleSwarm => Box::new(ParticleSwarm::new(
                SwarmConfig {
                    num_particles: self.num_particles,
                    ..Default::default()
                },
                self.seed,
            )),
            SolverKind::RandomSearch => Box::new(RandomSearch::new(self.seed)),
        }
    }
}

/// Metadata of a completed search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchInfo {
    pub solver: String,
    pub evaluations: usize,
    /// Candidates rejected by the feasibility predicate (no backtest run)
    pub infeasible: usize,
    pub best_score: f64,
    pub elapsed_secs: f64,
    pub mean_backtest_secs: f64,
}

#[derive(Debug, Clone)]
pub enum FitOutcome {
    /// Budget spent; the rounded best parameters are installed.
    Completed { params: ParamSet, info: SearchInfo },
    /// Stopped by the user. The last evaluated parameters stay installed.
    Interrupted { evaluations: usize },
}

/// Running bookkeeping of a search
#[derive(Debug)]
pub struct SearchProgress {
    started: Instant,
    budget: usize,
    evaluations: usize,
    infeasible: usize,
    backtest_time: Duration,
    best: Option<Trial>,
}

impl SearchProgress {
    pub fn new(budget: usize) -> Self {
        Self {
            started: Instant::now(),
            budget,
            evaluations: 0,
            infeasible: 0,
            backtest_time: Duration::ZERO,
            best: None,
        }
    }

    pub fn record(&mut self, params: &ParamSet, score: f64, backtest_time: Duration) {
        self.evaluations += 1;
        self.backtest_time += backtest_time;
        self.track_best(params, score);
    }

    pub fn record_infeasible(&mut self, params: &ParamSet, score: f64) {
        self.evaluations += 1;
        self.infeasible += 1;
        self.track_best(params, score);
    }

    fn track_best(&mut self, params: &ParamSet, score: f64) {
        if self.best.as_ref().map_or(true, |b| score > b.score) {
            self.best = Some(Trial {
                params: params.clone(),
                score,
            });
        }
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn infeasible(&self) -> usize {
        self.infeasible
    }

    pub fn best(&self) -> Option<&Trial> {
        self.best.as_ref()
    }

    /// Remaining time assuming the mean pace so far.
    pub fn eta(&self) -> Duration {
        if self.evaluations == 0 {
            return Duration::ZERO;
        }
        let remaining = self.budget.saturating_sub(self.evaluations) as u32;
        self.started.elapsed() / self.evaluations as u32 * remaining
    }

    pub fn log_line(&self, score: f64) {
        let best = self.best.as_ref().map_or(f64::NEG_INFINITY, |b| b.score);
        info!(
            "Optimization step {}/{}, reward {:.6}, best {:.6}, ETA {:.1}s",
            self.evaluations,
            self.budget,
            score,
            best,
            self.eta().as_secs_f64()
        );
    }

    pub fn finish(&self, solver: &str, best_score: f64) -> SearchInfo {
        let backtests = self.evaluations - self.infeasible;
        SearchInfo {
            solver: solver.to_string(),
            evaluations: self.evaluations,
            infeasible: self.infeasible,
            best_score,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            mean_backtest_secs: if backtests > 0 {
                self.backtest_time.as_secs_f64() / backtests as f64
            } else {
                0.0
            },
        }
    }
}

/// Search the agent's parameter space with the solver named in `config`.
pub fn fit<A, E>(
    agent: &mut A,
    env: &mut E,
    config: &FitConfig,
    interrupt: &Interrupt,
) -> Result<FitOutcome, AgentError>
where
    A: Tunable + ?Sized,
    E: Environment + ?Sized,
{
    let mut solver = config.build_solver();
    fit_with(agent, env, solver.as_mut(), config, interrupt)
}

/// Search with an explicit solver.
///
/// The environment stays in its training stage for the whole search and is
/// switched back on every exit path.
pub fn fit_with<A, E>(
    agent: &mut A,
    env: &mut E,
    solver: &mut dyn Optimizer,
    config: &FitConfig,
    interrupt: &Interrupt,
) -> Result<FitOutcome, AgentError>
where
    A: Tunable + ?Sized,
    E: Environment + ?Sized,
{
    env.reset_status();
    env.set_training_stage(true);
    let result = run_search(agent, env, solver, config, interrupt);
    env.set_training_stage(false);
    result
}

fn run_search<A, E>(
    agent: &mut A,
    env: &mut E,
    solver: &mut dyn Optimizer,
    config: &FitConfig,
    interrupt: &Interrupt,
) -> Result<FitOutcome, AgentError>
where
    A: Tunable + ?Sized,
    E: Environment + ?Sized,
{
    env.reset(ResetScope::full())?;
    let space = agent.search_space(env.obs_steps());
    let options = BacktestOptions {
        max_steps: config.max_episode_steps,
        verbose: false,
        visualize: false,
    };

    info!(
        "Fitting {} with {} over {} evaluations",
        agent.name(),
        solver.name(),
        config.num_evals
    );

    let mut progress = SearchProgress::new(config.num_evals);
    let mut failure: Option<AgentError> = None;
    let mut interrupted = false;

    let report = {
        let mut objective = |candidate: &ParamSet| -> ControlFlow<(), f64> {
            if interrupt.is_triggered() {
                interrupted = true;
                return ControlFlow::Break(());
            }

            let params = space.round(candidate);
            if !space.is_feasible(&params) {
                progress.record_infeasible(&params, space.default_score());
                return ControlFlow::Continue(space.default_score());
            }
            if let Err(e) = agent.set_params(&params) {
                warn!("Rejected candidate {:?}: {}", params, e);
                progress.record_infeasible(&params, space.default_score());
                return ControlFlow::Continue(space.default_score());
            }

            let started = Instant::now();
            match backtest(&mut *agent, &mut *env, &options, interrupt) {
                Ok(episode) if episode.termination == Termination::Interrupted => {
                    interrupted = true;
                    ControlFlow::Break(())
                }
                Ok(episode) => {
                    progress.record(&params, episode.reward, started.elapsed());
                    if config.verbose {
                        progress.log_line(episode.reward);
                    }
                    ControlFlow::Continue(episode.reward)
                }
                Err(e) => {
                    failure = Some(e);
                    ControlFlow::Break(())
                }
            }
        };
        solver.maximize(&space, config.num_evals, &mut objective)
    };

    if let Some(e) = failure {
        return Err(e);
    }
    if interrupted || report.aborted {
        warn!(
            "Optimization interrupted by user after {} evaluations",
            progress.evaluations()
        );
        return Ok(FitOutcome::Interrupted {
            evaluations: progress.evaluations(),
        });
    }

    let best = report
        .best
        .ok_or_else(|| AgentError::strategy("search finished without evaluating a candidate"))?;
    let params = space.round(&best.params);
    agent.set_params(&params)?;

    let info = progress.finish(solver.name(), best.score);
    info!(
        "Search finished: best reward {:.6} after {} evaluations ({} infeasible) in {:.1}s",
        info.best_score, info.evaluations, info.infeasible, info.elapsed_secs
    );
    Ok(FitOutcome::Completed { params, info })
}
