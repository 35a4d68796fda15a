use super::env::Environment;
use super::interrupt::Interrupt;
use super::runner::Termination;
use crate::engine::Agent;
use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Seconds slept per unit of sampling frequency between live steps.
pub const PACING_FACTOR: f64 = 59.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOptions {
    /// Bars between samples of the observation window
    pub frequency: usize,
    /// Rows in each observation window
    pub obs_steps: usize,
    /// Length of one pacing unit. One second in production.
    pub time_unit: Duration,
    pub verbose: bool,
    pub render: bool,
}

impl Default for TradeOptions {
    fn default() -> Self {
        Self {
            frequency: 1,
            obs_steps: 50,
            time_unit: Duration::from_secs(1),
            verbose: true,
            render: false,
        }
    }
}

impl TradeOptions {
    /// Sleep between two live steps: `frequency * 59.5` time units.
    pub fn pacing(&self) -> Duration {
        self.time_unit.mul_f64(self.frequency as f64 * PACING_FACTOR)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveReport {
    pub steps: usize,
    /// Steps on which the environment reported an executed order
    pub actions: usize,
    pub reward: f64,
    pub uptime: Duration,
    pub termination: Termination,
}

/// Trade live until interrupted or a fault occurs.
///
/// A terminal status does not stop the loop. A replay environment running out
/// of rows does.
/// Each cycle observes, acts and steps, then sleeps for `options.pacing()`.
/// The sleep ends early when the interrupt fires. Faults end the loop; nothing
/// is retried.
pub async fn trade<A, E>(
    agent: &mut A,
    env: &mut E,
    options: &TradeOptions,
    interrupt: &Interrupt,
) -> Result<LiveReport, AgentError>
where
    A: Agent + ?Sized,
    E: Environment + ?Sized,
{
    let pacing = options.pacing();
    let started = Instant::now();
    let mut steps = 0;
    let mut actions = 0;
    let mut reward = 0.0;

    env.reset_status();
    info!(
        "{} trading live: window {} every {} bars, pacing {:.1}s",
        agent.name(),
        options.obs_steps,
        options.frequency,
        pacing.as_secs_f64()
    );

    let termination = loop {
        if interrupt.is_triggered() {
            break Termination::Interrupted;
        }

        let obs = match env.observe(options.obs_steps, options.frequency) {
            Ok(obs) => obs,
            Err(e) => {
                error!("Observation failed at step {}: {} ({})", steps, e, e.kind());
                break Termination::EnvFault {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                };
            }
        };

        let action = match agent.act(&obs) {
            Ok(action) => action,
            Err(AgentError::NotFitted) => {
                error!("must fit the model or provide indicator parameters before trading");
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
        steps += 1;
        reward += outcome.reward;
        if outcome.done {
            actions += 1;
        }

        if options.render {
            env.render();
        }
        if options.verbose {
            info!(
                "step {} | actions {} | reward {:.6} | uptime {:.0}s",
                steps,
                actions,
                reward,
                started.elapsed().as_secs_f64()
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

        tokio::select! {
            _ = tokio::time::sleep(pacing) => {}
            _ = interrupt.triggered() => break Termination::Interrupted,
        }
    };

    let uptime = started.elapsed();
    if termination == Termination::Interrupted {
        warn!(
            "Live trading interrupted: {} steps, uptime {:.1}s, {} actions, reward {:.6}",
            steps,
            uptime.as_secs_f64(),
            actions,
            reward
        );
    }

    Ok(LiveReport {
        steps,
        actions,
        reward,
        uptime,
        termination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::market::testing::{linear, test_env};
    use crate::backtest::runner::test_agents::ScriptedAgent;
    use crate::backtest::{MarketEnv, ResetScope, StepOutcome};
    use crate::domain::{Allocation, Observation};
    use crate::error::EnvError;

    /// Records the (paused) clock on every call.
    struct ClockAgent {
        calls: Vec<Instant>,
    }

    impl Agent for ClockAgent {
        fn name(&self) -> &str {
            "Clock"
        }

        fn act(&mut self, obs: &Observation) -> Result<Allocation, AgentError> {
            self.calls.push(Instant::now());
            Ok(Allocation::all_cash(obs.n_assets()))
        }
    }

    fn fast_options(obs_steps: usize) -> TradeOptions {
        TradeOptions {
            frequency: 1,
            obs_steps,
            time_unit: Duration::from_millis(1),
            verbose: false,
            render: false,
        }
    }

    #[test]
    fn test_pacing_scales_with_frequency() {
        let options = TradeOptions {
            frequency: 2,
            ..Default::default()
        };
        assert_eq!(options.pacing(), Duration::from_secs(119));
        assert_eq!(TradeOptions::default().pacing(), Duration::from_millis(59_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_steps_are_paced() {
        let mut env = test_env(&[linear(10, 100.0, 1.0)], 5);
        let mut agent = ClockAgent { calls: Vec::new() };
        let report = trade(&mut agent, &mut env, &fast_options(5), &Interrupt::new())
            .await
            .unwrap();

        assert_eq!(report.termination, Termination::OutOfData);
        assert_eq!(report.steps, 5);
        for pair in agent.calls.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_micros(59_500), "gap {:?}", gap);
            // Timer deadlines round up to the next millisecond
            assert!(gap <= Duration::from_millis(61), "gap {:?}", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_cuts_sleep_short() {
        let mut env = test_env(&[linear(500, 100.0, 1.0)], 5);
        let mut agent = ScriptedAgent::holding(vec![]);
        let interrupt = Interrupt::new();
        let handle = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            handle.trigger();
        });

        let report = trade(&mut agent, &mut env, &fast_options(5), &interrupt)
            .await
            .unwrap();
        assert_eq!(report.termination, Termination::Interrupted);
        assert!(report.steps >= 1 && report.steps <= 4, "steps {}", report.steps);
        assert!(report.uptime < Duration::from_millis(240));
    }

    #[tokio::test(start_paused = true)]
    async fn test_actions_count_rebalances() {
        let mut env = test_env(&[linear(8, 100.0, 1.0)], 5);
        // Fully invested from the first step, then the drift is held
        let mut agent = ScriptedAgent::holding(vec![1.0, 0.0]);
        let report = trade(&mut agent, &mut env, &fast_options(5), &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(report.steps, 3);
        assert_eq!(report.actions, 1);
        assert!(report.reward > 0.0);
    }

    /// Market that flags every step as terminal.
    struct EndlessEpisodes(MarketEnv);

    impl Environment for EndlessEpisodes {
        fn reset(&mut self, scope: ResetScope) -> Result<Observation, EnvError> {
            self.0.reset(scope)
        }

        fn step(&mut self, action: &Allocation) -> StepOutcome {
            let mut outcome = self.0.step(action);
            outcome.status.terminal = true;
            outcome
        }

        fn observe(&mut self, window: usize, frequency: usize) -> Result<Observation, EnvError> {
            self.0.observe(window, frequency)
        }

        fn set_training_stage(&mut self, training: bool) {
            self.0.set_training_stage(training)
        }

        fn is_training(&self) -> bool {
            self.0.is_training()
        }

        fn render(&self) {
            self.0.render()
        }

        fn reset_status(&mut self) {
            self.0.reset_status()
        }

        fn data_len(&self) -> usize {
            self.0.data_len()
        }

        fn obs_steps(&self) -> usize {
            self.0.obs_steps()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_status_keeps_trading() {
        let mut env = EndlessEpisodes(test_env(&[linear(10, 100.0, 1.0)], 5));
        let mut agent = ScriptedAgent::holding(vec![]);
        let report = trade(&mut agent, &mut env, &fast_options(5), &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(report.steps, 5);
        assert_eq!(report.termination, Termination::OutOfData);
    }

    #[tokio::test]
    async fn test_not_fitted_aborts_live_loop() {
        let mut env = test_env(&[linear(10, 100.0, 1.0)], 5);
        let mut agent = ScriptedAgent::failing_after(0, AgentError::NotFitted);
        let result = trade(&mut agent, &mut env, &fast_options(5), &Interrupt::new()).await;
        assert_eq!(result.unwrap_err(), AgentError::NotFitted);
    }

    #[tokio::test]
    async fn test_observe_fault_ends_loop() {
        let mut env = test_env(&[linear(10, 100.0, 1.0)], 5);
        let mut agent = ScriptedAgent::holding(vec![]);
        // Window longer than the available history
        let report = trade(&mut agent, &mut env, &fast_options(8), &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(report.steps, 0);
        assert!(report.termination.is_fault());
    }
}
