use super::env::{EpisodeStatus, Environment, ResetScope, StepOutcome};
use crate::domain::*;
use crate::error::EnvError;
use serde::{Deserialize, Serialize};

/// Turnover above which a step counts as an executed order.
pub const REBALANCE_TOLERANCE: f64 = 1e-6;

/// Simulated market configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Rows in each observation window
    pub obs_steps: usize,
    /// Proportional fee charged on non-cash turnover (0.0025 = 0.25%)
    pub fee: f64,
    /// Portfolio value after a funds reset
    pub initial_funds: f64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            obs_steps: 50,
            fee: 0.0025,
            initial_funds: 10_000.0,
        }
    }
}

/// One recorded step of an episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    pub timestamp: i64,
    pub reward: f64,
    pub portfolio_value: f64,
    pub turnover: f64,
    pub fee_paid: f64,
    /// Weights held after the step, cash last
    pub weights: Vec<f64>,
}

/// Replay market over aligned candle series.
///
/// The cursor points at the newest row visible to the agent. A step applies
/// the allocation over the move from the cursor row to the next one: the
/// reward is the log growth of the portfolio net of fees, and the weights
/// drift with prices before being written into the next row's `position`.
pub struct MarketEnv {
    config: MarketConfig,
    symbols: Vec<Symbol>,
    timestamps: Vec<i64>,
    candles: Vec<Vec<Candle>>,
    /// Held weights per row, cash last
    positions: Vec<Vec<f64>>,
    weights: Vec<f64>,
    cursor: usize,
    global_step: usize,
    portfolio_value: f64,
    equity_curve: Vec<f64>,
    records: Vec<StepRecord>,
    status: EpisodeStatus,
    training: bool,
    /// Observation returned by the last successful reset or step
    last_obs: Observation,
}

impl MarketEnv {
    pub fn new(series: Vec<(Symbol, Vec<Candle>)>, config: MarketConfig) -> Result<Self, EnvError> {
        if series.is_empty() {
            return Err(EnvError::market("at least one symbol is required"));
        }
        if config.obs_steps == 0 {
            return Err(EnvError::market("obs_steps must be positive"));
        }
        if !(0.0..0.5).contains(&config.fee) {
            return Err(EnvError::market(format!("fee {} out of range [0, 0.5)", config.fee)));
        }
        if !(config.initial_funds > 0.0) {
            return Err(EnvError::market("initial funds must be positive"));
        }

        let timestamps: Vec<i64> = series[0].1.iter().map(|c| c.open_time).collect();
        if timestamps.len() <= config.obs_steps {
            return Err(EnvError::market(format!(
                "{} rows cannot fill a window of {} and step once",
                timestamps.len(),
                config.obs_steps
            )));
        }
        for i in 1..timestamps.len() {
            if timestamps[i] <= timestamps[i - 1] {
                return Err(EnvError::market(format!(
                    "candles not in temporal order at index {}",
                    i
                )));
            }
        }

        let mut symbols = Vec::with_capacity(series.len());
        let mut candles = Vec::with_capacity(series.len());
        for (symbol, data) in series {
            if symbol.is_fiat() {
                return Err(EnvError::market("the cash asset is implicit"));
            }
            if symbols.contains(&symbol) {
                return Err(EnvError::market(format!("duplicate symbol {}", symbol)));
            }
            if data.len() != timestamps.len()
                || data.iter().zip(&timestamps).any(|(c, t)| c.open_time != *t)
            {
                return Err(EnvError::market(format!("series for {} is misaligned", symbol)));
            }
            if let Some(bad) = data.iter().position(|c| !(c.close.is_finite() && c.close > 0.0)) {
                return Err(EnvError::market(format!(
                    "non-positive close for {} at index {}",
                    symbol, bad
                )));
            }
            symbols.push(symbol);
            candles.push(data);
        }

        let n_assets = symbols.len() + 1;
        let all_cash = Allocation::all_cash(n_assets).into_inner();
        let positions = vec![all_cash.clone(); timestamps.len()];
        let first_rows: Vec<usize> = (0..config.obs_steps).collect();
        let last_obs = window_observation(&symbols, &candles, &positions, &timestamps, &first_rows)?;
        Ok(Self {
            positions,
            weights: all_cash,
            cursor: config.obs_steps - 1,
            global_step: 0,
            portfolio_value: config.initial_funds,
            equity_curve: vec![config.initial_funds],
            records: Vec::new(),
            status: EpisodeStatus::default(),
            training: false,
            last_obs,
            config,
            symbols,
            timestamps,
            candles,
        })
    }

    /// Tradable symbols in allocation order (cash excluded).
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Allocation length, cash included.
    pub fn n_assets(&self) -> usize {
        self.symbols.len() + 1
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn portfolio_value(&self) -> f64 {
        self.portfolio_value
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn status(&self) -> &EpisodeStatus {
        &self.status
    }

    /// Portfolio value after each recorded step, starting with the reset value.
    pub fn equity_curve(&self) -> &[f64] {
        &self.equity_curve
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    fn build_observation(&self, rows: &[usize]) -> Result<Observation, EnvError> {
        window_observation(&self.symbols, &self.candles, &self.positions, &self.timestamps, rows)
    }

    fn window_rows(&self) -> Vec<usize> {
        (self.cursor + 1 - self.config.obs_steps..=self.cursor).collect()
    }

    fn validate(&self, action: &Allocation) -> Result<(), EnvError> {
        if action.len() != self.n_assets() {
            return Err(EnvError::invalid_action(format!(
                "expected {} weights, got {}",
                self.n_assets(),
                action.len()
            )));
        }
        if !action.is_valid() {
            return Err(EnvError::invalid_action(format!(
                "weights must be finite, non-negative and sum to 1 (sum = {:.6})",
                action.sum()
            )));
        }
        Ok(())
    }

    fn outcome(&self, reward: f64, done: bool) -> StepOutcome {
        StepOutcome {
            observation: self.last_obs.clone(),
            reward,
            done,
            status: self.status.clone(),
        }
    }

    fn apply(&mut self, action: &Allocation) -> Result<(f64, bool), EnvError> {
        self.validate(action)?;
        let t = self.cursor;
        if t + 1 >= self.data_len() {
            self.status.ood = true;
            return Err(EnvError::OutOfData { index: t + 1 });
        }

        let target = action.weights();
        let mut relatives: Vec<f64> = self
            .candles
            .iter()
            .map(|c| c[t + 1].close / c[t].close)
            .collect();
        relatives.push(1.0);

        let turnover: f64 = target
            .iter()
            .zip(&self.weights)
            .take(self.symbols.len())
            .map(|(w, held)| (w - held).abs())
            .sum();
        let cost = self.config.fee * turnover;
        let growth: f64 = target.iter().zip(&relatives).map(|(w, y)| w * y).sum();
        let net = growth * (1.0 - cost);
        if !(net.is_finite() && net > 0.0) {
            return Err(EnvError::market(format!("portfolio growth {} at row {}", net, t + 1)));
        }
        let reward = net.ln();

        let drifted: Vec<f64> = target
            .iter()
            .zip(&relatives)
            .map(|(w, y)| w * y / growth)
            .collect();
        let fee_paid = self.portfolio_value * growth * cost;
        self.portfolio_value *= net;
        self.cursor = t + 1;
        self.global_step += 1;
        self.positions[self.cursor] = drifted.clone();
        self.weights = drifted;

        if self.cursor + 1 >= self.data_len() {
            self.status.ood = true;
        }

        if !self.training {
            self.equity_curve.push(self.portfolio_value);
            self.records.push(StepRecord {
                step: self.global_step,
                timestamp: self.timestamps[self.cursor],
                reward,
                portfolio_value: self.portfolio_value,
                turnover,
                fee_paid,
                weights: self.weights.clone(),
            });
        }

        Ok((reward, turnover > REBALANCE_TOLERANCE))
    }
}

fn window_observation(
    symbols: &[Symbol],
    candles: &[Vec<Candle>],
    positions: &[Vec<f64>],
    timestamps: &[i64],
    rows: &[usize],
) -> Result<Observation, EnvError> {
    let cash_col = symbols.len();
    let mut assets = Vec::with_capacity(symbols.len() + 1);
    for (k, (symbol, series)) in symbols.iter().zip(candles).enumerate() {
        let column =
            |f: fn(&Candle) -> f64| -> Vec<f64> { rows.iter().map(|&r| f(&series[r])).collect() };
        assets.push(AssetFrame {
            symbol: symbol.clone(),
            open: column(|c| c.open),
            high: column(|c| c.high),
            low: column(|c| c.low),
            close: column(|c| c.close),
            volume: column(|c| c.volume),
            position: rows.iter().map(|&r| positions[r][k]).collect(),
        });
    }
    assets.push(AssetFrame::cash(
        rows.iter().map(|&r| positions[r][cash_col]).collect(),
    ));
    Observation::new(rows.iter().map(|&r| timestamps[r]).collect(), assets)
}

impl Environment for MarketEnv {
    fn reset(&mut self, scope: ResetScope) -> Result<Observation, EnvError> {
        self.cursor = self.config.obs_steps - 1;
        self.status = EpisodeStatus::default();
        if scope.funds {
            self.portfolio_value = self.config.initial_funds;
            self.weights = Allocation::all_cash(self.n_assets()).into_inner();
        }
        for row in self.positions.iter_mut() {
            row.clone_from(&self.weights);
        }
        if scope.results {
            self.records.clear();
            self.equity_curve = vec![self.portfolio_value];
        }
        if scope.global_step {
            self.global_step = 0;
        }
        let obs = self.build_observation(&self.window_rows())?;
        self.last_obs = obs.clone();
        Ok(obs)
    }

    fn step(&mut self, action: &Allocation) -> StepOutcome {
        let (reward, done) = match self.apply(action) {
            Ok(result) => result,
            Err(EnvError::OutOfData { .. }) => (0.0, false),
            Err(err) => {
                self.status.error = Some(err);
                (0.0, false)
            }
        };
        if self.status.error.is_none() {
            match self.build_observation(&self.window_rows()) {
                Ok(obs) => self.last_obs = obs,
                Err(err) => self.status.error = Some(err),
            }
        }
        self.outcome(reward, done)
    }

    fn observe(&mut self, window: usize, frequency: usize) -> Result<Observation, EnvError> {
        if window == 0 || frequency == 0 {
            return Err(EnvError::market("window and frequency must be positive"));
        }
        let span = (window - 1) * frequency;
        if span > self.cursor {
            return Err(EnvError::market(format!(
                "{} rows every {} bars need {} rows of history, cursor at {}",
                window,
                frequency,
                span + 1,
                self.cursor
            )));
        }
        let rows: Vec<usize> = (0..window).rev().map(|k| self.cursor - k * frequency).collect();
        self.build_observation(&rows)
    }

    fn set_training_stage(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn render(&self) {
        if self.training {
            return;
        }
        let when = self.candles[0][self.cursor].datetime().format("%Y-%m-%d %H:%M");
        let weights: Vec<String> = self
            .symbols
            .iter()
            .map(|s| s.0.as_str())
            .chain(std::iter::once(FIAT))
            .zip(&self.weights)
            .map(|(s, w)| format!("{}={:.3}", s, w))
            .collect();
        println!(
            "  [{}] step {:>6}  value ${:>12.2}  {}",
            when,
            self.global_step,
            self.portfolio_value,
            weights.join(" ")
        );
    }

    fn reset_status(&mut self) {
        self.status = EpisodeStatus::default();
    }

    fn data_len(&self) -> usize {
        self.timestamps.len()
    }

    fn obs_steps(&self) -> usize {
        self.config.obs_steps
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Hourly candles with the given closes; open equals the previous close.
    pub fn make_candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = if i == 0 { close } else { closes[i - 1] };
                Candle {
                    open_time: 1_700_000_000_000 + i as i64 * 3_600_000,
                    open,
                    high: open.max(close),
                    low: open.min(close),
                    close,
                    volume: 100.0,
                    close_time: 1_700_000_000_000 + (i as i64 + 1) * 3_600_000 - 1,
                }
            })
            .collect()
    }

    /// Fee-free market over one close series per symbol (`A`, `B`, ...).
    pub fn test_env(closes: &[Vec<f64>], obs_steps: usize) -> MarketEnv {
        let series = closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let name = ((b'A' + i as u8) as char).to_string();
                (Symbol::new(name), make_candles(c))
            })
            .collect();
        let config = MarketConfig {
            obs_steps,
            fee: 0.0,
            initial_funds: 1_000.0,
        };
        MarketEnv::new(series, config).unwrap()
    }

    pub fn linear(n: usize, start: f64, slope: f64) -> Vec<f64> {
        (0..n).map(|i| start + slope * i as f64).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_reset_builds_all_cash_window() {
        let mut env = test_env(&[linear(20, 100.0, 1.0), linear(20, 50.0, 0.0)], 5);
        let obs = env.reset(ResetScope::full()).unwrap();
        assert_eq!(obs.len(), 5);
        assert_eq!(obs.n_assets(), 3);
        assert!(obs.cash().is_cash());
        assert_eq!(obs.cash().position, vec![1.0; 5]);
        assert_eq!(obs.asset("A").unwrap().last(Field::Close), Some(104.0));
        assert_eq!(env.cursor(), 4);
    }

    #[test]
    fn test_all_cash_step_is_flat() {
        let mut env = test_env(&[linear(20, 100.0, 1.0)], 5);
        env.reset(ResetScope::full()).unwrap();
        let out = env.step(&Allocation::all_cash(2));
        assert_eq!(out.reward, 0.0);
        assert!(!out.done);
        assert!(out.status.is_clean());
        assert_eq!(env.portfolio_value(), 1_000.0);
    }

    #[test]
    fn test_step_reward_and_drifted_position() {
        // A rises 10%, B flat
        let mut a = vec![100.0; 10];
        a[5] = 110.0;
        let b = vec![50.0; 10];
        let mut env = test_env(&[a, b], 5);
        env.reset(ResetScope::full()).unwrap();

        let out = env.step(&Allocation::from_vec(vec![0.5, 0.5, 0.0]));
        assert!(out.done);
        assert!((out.reward - 1.05_f64.ln()).abs() < 1e-12);
        let held = out.observation.asset("A").unwrap().last(Field::Position).unwrap();
        assert!((held - 0.55 / 1.05).abs() < 1e-12);
        assert!((env.portfolio_value() - 1_050.0).abs() < 1e-9);
    }

    #[test]
    fn test_fee_charged_on_turnover() {
        let series = vec![(Symbol::new("A"), make_candles(&[100.0; 10]))];
        let config = MarketConfig {
            obs_steps: 3,
            fee: 0.01,
            initial_funds: 100.0,
        };
        let mut env = MarketEnv::new(series, config).unwrap();
        env.reset(ResetScope::full()).unwrap();
        let out = env.step(&Allocation::from_vec(vec![1.0, 0.0]));
        assert!((out.reward - 0.99_f64.ln()).abs() < 1e-12);
        // Holding the drifted weights again costs nothing
        let out = env.step(&Allocation::from_vec(vec![1.0, 0.0]));
        assert_eq!(out.reward, 0.0);
        assert!(!out.done);
        assert!((env.records()[0].fee_paid - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_action_is_captured() {
        let mut env = test_env(&[linear(20, 100.0, 1.0)], 5);
        let before = env.reset(ResetScope::full()).unwrap();
        let out = env.step(&Allocation::from_vec(vec![0.7, 0.7]));
        assert!(matches!(out.status.error, Some(EnvError::InvalidAction { .. })));
        assert_eq!(out.observation, before);
        assert_eq!(env.cursor(), 4);

        env.reset_status();
        let out = env.step(&Allocation::from_vec(vec![1.0]));
        assert!(matches!(out.status.error, Some(EnvError::InvalidAction { .. })));
    }

    #[test]
    fn test_out_of_data_after_last_row() {
        let mut env = test_env(&[linear(6, 100.0, 1.0)], 5);
        env.reset(ResetScope::full()).unwrap();
        let out = env.step(&Allocation::all_cash(2));
        assert!(out.status.ood);
        assert!(out.status.error.is_none());
        // Stepping past the end keeps reporting ood without moving
        let out = env.step(&Allocation::all_cash(2));
        assert!(out.status.ood);
        assert_eq!(env.cursor(), 5);
    }

    #[test]
    fn test_training_suppresses_records() {
        let mut env = test_env(&[linear(20, 100.0, 1.0)], 5);
        env.set_training_stage(true);
        env.reset(ResetScope::full()).unwrap();
        env.step(&Allocation::from_vec(vec![1.0, 0.0]));
        assert!(env.records().is_empty());
        assert_eq!(env.equity_curve().len(), 1);

        env.set_training_stage(false);
        env.step(&Allocation::from_vec(vec![1.0, 0.0]));
        assert_eq!(env.records().len(), 1);
    }

    #[test]
    fn test_observe_with_frequency() {
        let mut env = test_env(&[linear(30, 1.0, 1.0)], 20);
        env.reset(ResetScope::full()).unwrap();
        let obs = env.observe(4, 3).unwrap();
        let closes = &obs.asset("A").unwrap().close;
        // cursor 19 -> rows 10, 13, 16, 19
        assert_eq!(closes, &vec![11.0, 14.0, 17.0, 20.0]);
        assert!(env.observe(10, 3).is_err());
        assert!(env.observe(0, 1).is_err());
    }

    #[test]
    fn test_reset_restores_funds_and_positions() {
        let mut env = test_env(&[linear(20, 100.0, 5.0)], 5);
        env.reset(ResetScope::full()).unwrap();
        env.step(&Allocation::from_vec(vec![1.0, 0.0]));
        env.step(&Allocation::from_vec(vec![1.0, 0.0]));
        assert!(env.portfolio_value() > 1_000.0);
        assert_eq!(env.global_step(), 2);

        let obs = env.reset(ResetScope::episode()).unwrap();
        assert_eq!(env.portfolio_value(), 1_000.0);
        assert_eq!(obs.cash().last(Field::Position), Some(1.0));
        assert_eq!(env.global_step(), 2);
        assert!(env.records().is_empty());
    }

    #[test]
    fn test_new_rejects_bad_series() {
        let config = MarketConfig {
            obs_steps: 3,
            ..Default::default()
        };
        assert!(MarketEnv::new(vec![], config.clone()).is_err());

        let short = vec![(Symbol::new("A"), make_candles(&[1.0, 2.0, 3.0]))];
        assert!(MarketEnv::new(short, config.clone()).is_err());

        let mut shifted = make_candles(&[1.0; 10]);
        for c in shifted.iter_mut() {
            c.open_time += 1;
        }
        let misaligned = vec![
            (Symbol::new("A"), make_candles(&[1.0; 10])),
            (Symbol::new("B"), shifted),
        ];
        assert!(MarketEnv::new(misaligned, config.clone()).is_err());

        let zero = vec![(Symbol::new("A"), make_candles(&[1.0, 0.0, 1.0, 1.0, 1.0]))];
        assert!(MarketEnv::new(zero, config.clone()).is_err());

        let fiat = vec![(Symbol::fiat(), make_candles(&[1.0; 10]))];
        assert!(MarketEnv::new(fiat, config).is_err());
    }
}
