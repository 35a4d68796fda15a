use super::space::{ParamSet, SearchSpace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;

/// Objective handed to a solver. `Break` stops the search immediately.
pub type Objective<'a> = dyn FnMut(&ParamSet) -> ControlFlow<(), f64> + 'a;

/// One evaluated candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub params: ParamSet,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolverReport {
    /// First candidate reaching the highest score
    pub best: Option<Trial>,
    pub evaluations: usize,
    /// The objective asked to stop before the budget was spent.
    pub aborted: bool,
}

impl SolverReport {
    fn record(&mut self, params: &ParamSet, score: f64) {
        self.evaluations += 1;
        let score = comparable(score);
        let better = match &self.best {
            Some(best) => score > best.score,
            None => true,
        };
        if better {
            self.best = Some(Trial {
                params: params.clone(),
                score,
            });
        }
    }
}

/// NaN compares as the worst possible score.
fn comparable(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}

/// Black-box maximizer over a box-constrained space.
pub trait Optimizer {
    fn name(&self) -> &'static str;

    /// Spend at most `num_evals` objective calls looking for the maximum.
    fn maximize(
        &mut self,
        space: &SearchSpace,
        num_evals: usize,
        objective: &mut Objective<'_>,
    ) -> SolverReport;
}

/// Uniform sampling over the box
pub struct RandomSearch {
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Optimizer for RandomSearch {
    fn name(&self) -> &'static str {
        "random-search"
    }

    fn maximize(
        &mut self,
        space: &SearchSpace,
        num_evals: usize,
        objective: &mut Objective<'_>,
    ) -> SolverReport {
        let mut report = SolverReport::default();
        for _ in 0..num_evals {
            let candidate = space.sample(&mut self.rng);
            match objective(&candidate) {
                ControlFlow::Continue(score) => report.record(&candidate, score),
                ControlFlow::Break(()) => {
                    report.aborted = true;
                    break;
                }
            }
        }
        report
    }
}

/// Particle swarm settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    pub num_particles: usize,
    /// Velocity carried over between moves
    pub inertia: f64,
    /// Pull towards the particle's own best position
    pub cognitive: f64,
    /// Pull towards the swarm's best position
    pub social: f64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        // Constriction coefficients of Clerc and Kennedy
        Self {
            num_particles: 10,
            inertia: 0.7298,
            cognitive: 1.49618,
            social: 1.49618,
        }
    }
}

struct Particle {
    position: Vec<f64>,
    velocity: Vec<f64>,
    best_position: Vec<f64>,
    best_score: Option<f64>,
}

/// Particle swarm optimizer.
///
/// Particles are evaluated round-robin, one objective call each, so the budget
/// is respected exactly even when it is not a multiple of the swarm size.
/// Positions are clamped to the box and velocities to the box width.
pub struct ParticleSwarm {
    config: SwarmConfig,
    rng: StdRng,
}

impl ParticleSwarm {
    pub fn new(config: SwarmConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn spawn(&mut self, space: &SearchSpace) -> Vec<Particle> {
        let bounds = space.bounds();
        (0..self.config.num_particles.max(1))
            .map(|_| {
                let position: Vec<f64> = bounds.iter().map(|r| r.sample(&mut self.rng)).collect();
                let velocity = bounds
                    .iter()
                    .map(|r| {
                        let w = r.width();
                        if w > 0.0 {
                            self.rng.gen_range(-w..=w)
                        } else {
                            0.0
                        }
                    })
                    .collect();
                Particle {
                    best_position: position.clone(),
                    position,
                    velocity,
                    best_score: None,
                }
            })
            .collect()
    }
}

impl Optimizer for ParticleSwarm {
    fn name(&self) -> &'static str {
        "particle-swarm"
    }

    fn maximize(
        &mut self,
        space: &SearchSpace,
        num_evals: usize,
        objective: &mut Objective<'_>,
    ) -> SolverReport {
        let mut report = SolverReport::default();
        let bounds = space.bounds();
        let mut swarm = self.spawn(space);
        let mut global_best: Option<(Vec<f64>, f64)> = None;
        let mut generation = 0;

        'search: while report.evaluations < num_evals {
            for particle in swarm.iter_mut() {
                if report.evaluations >= num_evals {
                    break 'search;
                }

                if generation > 0 {
                    let leader = global_best
                        .as_ref()
                        .map(|(pos, _)| pos.as_slice())
                        .unwrap_or(particle.best_position.as_slice())
                        .to_vec();
                    for d in 0..bounds.len() {
                        let r1: f64 = self.rng.gen();
                        let r2: f64 = self.rng.gen();
                        let width = bounds[d].width();
                        let v = self.config.inertia * particle.velocity[d]
                            + self.config.cognitive
                                * r1
                                * (particle.best_position[d] - particle.position[d])
                            + self.config.social * r2 * (leader[d] - particle.position[d]);
                        particle.velocity[d] = v.clamp(-width, width);
                        particle.position[d] =
                            bounds[d].clamp(particle.position[d] + particle.velocity[d]);
                    }
                }

                let candidate = space.assign(&particle.position);
                let score = match objective(&candidate) {
                    ControlFlow::Continue(score) => comparable(score),
                    ControlFlow::Break(()) => {
                        report.aborted = true;
                        break 'search;
                    }
                };
                report.record(&candidate, score);

                if particle.best_score.map_or(true, |best| score > best) {
                    particle.best_score = Some(score);
                    particle.best_position = particle.position.clone();
                }
                if global_best.as_ref().map_or(true, |(_, best)| score > *best) {
                    global_best = Some((particle.position.clone(), score));
                }
            }
            generation += 1;
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::space::ParamRange;

    fn quadratic_space() -> SearchSpace {
        SearchSpace::new()
            .with_param("x", ParamRange::continuous(-5.0, 5.0))
            .with_param("y", ParamRange::continuous(-5.0, 5.0))
    }

    /// Peak of 0 at (1, -2)
    fn bowl(p: &ParamSet) -> ControlFlow<(), f64> {
        ControlFlow::Continue(-((p["x"] - 1.0).powi(2) + (p["y"] + 2.0).powi(2)))
    }

    #[test]
    fn test_random_search_respects_budget() {
        let mut calls = 0;
        let mut objective = |p: &ParamSet| {
            calls += 1;
            bowl(p)
        };
        let report = RandomSearch::new(42).maximize(&quadratic_space(), 25, &mut objective);
        assert_eq!(calls, 25);
        assert_eq!(report.evaluations, 25);
        assert!(!report.aborted);
        assert!(report.best.is_some());
    }

    #[test]
    fn test_swarm_finds_peak() {
        let mut objective = bowl;
        let mut pso = ParticleSwarm::new(SwarmConfig::default(), 7);
        let report = pso.maximize(&quadratic_space(), 400, &mut objective);
        let best = report.best.unwrap();
        assert!(best.score > -0.05, "best score {}", best.score);
        assert!((best.params["x"] - 1.0).abs() < 0.25);
        assert!((best.params["y"] + 2.0).abs() < 0.25);
    }

    #[test]
    fn test_swarm_stays_in_box_and_budget() {
        let space = SearchSpace::new()
            .with_param("x", ParamRange::continuous(0.0, 1.0))
            .with_param("n", ParamRange::integer(2.0, 10.0));
        let mut seen = Vec::new();
        let mut objective = |p: &ParamSet| {
            seen.push(p.clone());
            // Pushes particles against the upper bound
            ControlFlow::Continue(p["x"] * 100.0 + p["n"])
        };
        let report = ParticleSwarm::new(SwarmConfig::default(), 3).maximize(&space, 37, &mut objective);
        assert_eq!(report.evaluations, 37);
        assert_eq!(seen.len(), 37);
        for p in &seen {
            assert!((0.0..=1.0).contains(&p["x"]));
            assert!((2.0..=10.0).contains(&p["n"]));
        }
    }

    #[test]
    fn test_break_aborts_search() {
        let mut calls = 0;
        let mut objective = |_: &ParamSet| {
            calls += 1;
            if calls == 4 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(1.0)
            }
        };
        let report = ParticleSwarm::new(SwarmConfig::default(), 1)
            .maximize(&quadratic_space(), 100, &mut objective);
        assert!(report.aborted);
        assert_eq!(report.evaluations, 3);
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_nan_scores_never_win() {
        let mut flip = false;
        let mut objective = |_: &ParamSet| {
            flip = !flip;
            ControlFlow::Continue(if flip { f64::NAN } else { -1.0 })
        };
        let report = RandomSearch::new(0).maximize(&quadratic_space(), 6, &mut objective);
        assert_eq!(report.best.unwrap().score, -1.0);
    }

    #[test]
    fn test_same_seed_same_result() {
        let run = |seed| {
            let mut objective = bowl;
            ParticleSwarm::new(SwarmConfig::default(), seed)
                .maximize(&quadratic_space(), 50, &mut objective)
                .best
                .unwrap()
        };
        assert_eq!(run(11), run(11));
    }
}
