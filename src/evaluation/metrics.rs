use crate::backtest::market::StepRecord;
use serde::{Deserialize, Serialize};

const MS_PER_YEAR: f64 = 365.0 * 24.0 * 3_600_000.0;

/// Risk/return summary of one recorded episode
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeMetrics {
    pub total_return_pct: f64,
    pub annualized_return_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown_pct: f64,
    pub calmar_ratio: f64,
    // Trading activity
    pub periods: usize,
    pub rebalances: usize,
    pub avg_turnover: f64,
    pub total_fees: f64,
    pub final_value: f64,
}

impl EpisodeMetrics {
    /// Metrics from an equity curve sampled `periods_per_year` times a year.
    pub fn from_equity(equity: &[f64], periods_per_year: f64) -> Self {
        let periods = equity.len().saturating_sub(1);
        let total_return_pct = match (equity.first(), equity.last()) {
            (Some(&first), Some(&last)) if periods > 0 && first > 0.0 => {
                (last / first - 1.0) * 100.0
            }
            _ => 0.0,
        };

        let years = periods as f64 / periods_per_year;
        let annualized_return_pct = if years > 0.0 && total_return_pct > -100.0 {
            ((1.0 + total_return_pct / 100.0).powf(1.0 / years) - 1.0) * 100.0
        } else {
            0.0
        };

        let returns = period_returns(equity);
        let max_drawdown_pct = max_drawdown(equity);
        let calmar_ratio = if max_drawdown_pct > 0.01 {
            annualized_return_pct / max_drawdown_pct
        } else {
            0.0
        };

        Self {
            total_return_pct,
            annualized_return_pct,
            sharpe_ratio: sharpe(&returns, periods_per_year),
            sortino_ratio: sortino(&returns, periods_per_year),
            max_drawdown_pct,
            calmar_ratio,
            periods,
            final_value: equity.last().copied().unwrap_or(0.0),
            ..Default::default()
        }
    }

    /// Adds turnover and fee statistics from the step records.
    pub fn with_records(mut self, records: &[StepRecord]) -> Self {
        self.rebalances = records.iter().filter(|r| r.turnover > 1e-6).count();
        self.total_fees = records.iter().map(|r| r.fee_paid).sum();
        self.avg_turnover = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|r| r.turnover).sum::<f64>() / records.len() as f64
        };
        self
    }
}

/// Periods per year for a bar interval given in milliseconds.
pub fn periods_per_year(interval_ms: i64) -> f64 {
    if interval_ms <= 0 {
        return 365.0;
    }
    MS_PER_YEAR / interval_ms as f64
}

fn period_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

fn sharpe(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    let std = variance.sqrt();
    if std < 1e-10 {
        return 0.0;
    }
    (mean / std) * periods_per_year.sqrt()
}

fn sortino(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let downside_variance = returns
        .iter()
        .filter(|&&r| r < 0.0)
        .map(|r| r.powi(2))
        .sum::<f64>()
        / returns.len() as f64;
    let downside_std = downside_variance.sqrt();
    if downside_std < 1e-10 {
        return if mean > 0.0 { 100.0 } else { 0.0 };
    }
    (mean / downside_std) * periods_per_year.sqrt()
}

fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = match equity.first() {
        Some(&v) => v,
        None => return 0.0,
    };
    let mut max_dd = 0.0;
    for &val in equity {
        if val > peak {
            peak = val;
        }
        if peak > 0.0 {
            let dd = (peak - val) / peak * 100.0;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::market::testing::{linear, test_env};
    use crate::backtest::{Environment, ResetScope};
    use crate::domain::Allocation;

    #[test]
    fn test_sharpe_positive() {
        let returns: Vec<f64> = (0..100)
            .map(|i| 0.001 + (i as f64 * 0.0001).sin() * 0.0002)
            .collect();
        assert!(sharpe(&returns, 365.0) > 0.0);
    }

    #[test]
    fn test_sharpe_zero_std() {
        assert_eq!(sharpe(&[0.0; 100], 365.0), 0.0);
        assert_eq!(sharpe(&[0.01], 365.0), 0.0);
    }

    #[test]
    fn test_sortino_all_positive() {
        assert_eq!(sortino(&[0.01, 0.02, 0.015, 0.03], 365.0), 100.0);
    }

    #[test]
    fn test_sortino_all_negative() {
        assert!(sortino(&[-0.01, -0.02, -0.015], 365.0) < 0.0);
    }

    #[test]
    fn test_max_drawdown() {
        let equity = vec![100.0, 110.0, 95.0, 105.0, 80.0, 90.0];
        // Peak at 110, trough at 80
        assert!((max_drawdown(&equity) - 27.27).abs() < 0.1);
        assert_eq!(max_drawdown(&[100.0, 101.0, 102.0]), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn test_total_return() {
        let m = EpisodeMetrics::from_equity(&[10000.0, 10500.0, 11000.0], 365.0);
        assert!((m.total_return_pct - 10.0).abs() < 1e-9);
        assert_eq!(m.periods, 2);
        assert_eq!(m.final_value, 11000.0);
    }

    #[test]
    fn test_flat_curve_has_no_risk() {
        let m = EpisodeMetrics::from_equity(&[1000.0; 10], 365.0);
        assert_eq!(m.total_return_pct, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.max_drawdown_pct, 0.0);
        assert_eq!(m.calmar_ratio, 0.0);
    }

    #[test]
    fn test_empty_curve() {
        let m = EpisodeMetrics::from_equity(&[], 365.0);
        assert_eq!(m.periods, 0);
        assert_eq!(m.total_return_pct, 0.0);
        assert_eq!(m.annualized_return_pct, 0.0);
    }

    #[test]
    fn test_annualized_one_year() {
        // 365 daily periods returning 10% overall
        let equity: Vec<f64> = (0..=365).map(|i| 100.0 * 1.1f64.powf(i as f64 / 365.0)).collect();
        let m = EpisodeMetrics::from_equity(&equity, 365.0);
        assert!((m.annualized_return_pct - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_periods_per_year() {
        assert!((periods_per_year(86_400_000) - 365.0).abs() < 1e-9);
        assert!((periods_per_year(3_600_000) - 8760.0).abs() < 1e-9);
        assert_eq!(periods_per_year(0), 365.0);
    }

    #[test]
    fn test_metrics_from_market_records() {
        let mut env = test_env(&[linear(20, 100.0, 1.0)], 5);
        env.reset(ResetScope::full()).unwrap();
        env.step(&Allocation::from_vec(vec![1.0, 0.0]));
        env.step(&Allocation::from_vec(vec![1.0, 0.0]));
        let m = EpisodeMetrics::from_equity(env.equity_curve(), 365.0).with_records(env.records());
        assert_eq!(m.periods, 2);
        assert!(m.total_return_pct > 0.0);
        // Drift keeps the second step on target
        assert_eq!(m.rebalances, 1);
        assert_eq!(m.total_fees, 0.0);
    }
}
