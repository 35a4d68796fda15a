//! Moving averages and volatility over a price series.
//!
//! Every function returns a series of the same length as its input, with NaN
//! in the warm-up region where the indicator is not yet defined.

/// Fast smoothing period of the adaptive moving average.
pub const KAMA_FAST: f64 = 2.0;
/// Slow smoothing period of the adaptive moving average.
pub const KAMA_SLOW: f64 = 30.0;
/// Rows before the MESA adaptive averages are reported.
pub const MAMA_LOOKBACK: usize = 32;

/// Simple moving average.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; data.len()];
    if period == 0 || data.len() < period {
        return out;
    }
    let mut window_sum: f64 = data[..period].iter().sum();
    out[period - 1] = window_sum / period as f64;
    for i in period..data.len() {
        window_sum += data[i] - data[i - period];
        out[i] = window_sum / period as f64;
    }
    out
}

/// Exponential moving average with `alpha = 2 / (span + 1)`.
///
/// Uses adjusted weights (`sum (1-a)^k x_{t-k} / sum (1-a)^k`), so it is
/// defined from the first row on.
pub fn ema(data: &[f64], span: usize) -> Vec<f64> {
    if span == 0 {
        return vec![f64::NAN; data.len()];
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let decay = 1.0 - alpha;
    let mut weighted = 0.0;
    let mut weights = 0.0;
    data.iter()
        .map(|&x| {
            weighted = x + decay * weighted;
            weights = 1.0 + decay * weights;
            weighted / weights
        })
        .collect()
}

/// Kaufman adaptive moving average.
///
/// The smoothing constant moves between the fast and slow periods with the
/// efficiency ratio (net change over summed absolute changes) of the last
/// `period` rows.
pub fn kama(data: &[f64], period: usize) -> Vec<f64> {
    let n = data.len();
    let mut out = vec![f64::NAN; n];
    if period == 0 || n <= period {
        return out;
    }
    let fast = 2.0 / (KAMA_FAST + 1.0);
    let slow = 2.0 / (KAMA_SLOW + 1.0);

    let mut value = data[period - 1];
    for i in period..n {
        let change = (data[i] - data[i - period]).abs();
        let volatility: f64 = (i + 1 - period..=i)
            .map(|j| (data[j] - data[j - 1]).abs())
            .sum();
        let efficiency = if volatility <= change {
            1.0
        } else {
            change / volatility
        };
        let sc = (efficiency * (fast - slow) + slow).powi(2);
        value += sc * (data[i] - value);
        out[i] = value;
    }
    out
}

fn lag(series: &[f64], i: usize, k: usize) -> f64 {
    if i >= k {
        series[i - k]
    } else {
        0.0
    }
}

fn hilbert(series: &[f64], i: usize, adjustment: f64) -> f64 {
    (0.0962 * lag(series, i, 0) + 0.5769 * lag(series, i, 2)
        - 0.5769 * lag(series, i, 4)
        - 0.0962 * lag(series, i, 6))
        * adjustment
}

/// MESA adaptive moving average. Returns `(mama, fama)`.
///
/// The dominant cycle phase is measured with a Hilbert transform; the rate of
/// phase change sets the smoothing factor, bounded below by `slow_limit` and
/// above by `fast_limit`.
pub fn mama(data: &[f64], fast_limit: f64, slow_limit: f64) -> (Vec<f64>, Vec<f64>) {
    let n = data.len();
    let mut mama_out = vec![f64::NAN; n];
    let mut fama_out = vec![f64::NAN; n];
    if n == 0 {
        return (mama_out, fama_out);
    }

    let mut smooth = vec![0.0; n];
    let mut detrender = vec![0.0; n];
    let mut in_phase = vec![0.0; n];
    let mut quadrature = vec![0.0; n];

    let (mut i2_prev, mut q2_prev) = (0.0, 0.0);
    let (mut re_prev, mut im_prev) = (0.0, 0.0);
    let mut period: f64 = 0.0;
    let mut phase_prev = 0.0;
    let mut mama_val = data[0];
    let mut fama_val = data[0];

    for i in 0..n {
        let price = data[i];
        if i >= 3 {
            smooth[i] = (4.0 * price + 3.0 * data[i - 1] + 2.0 * data[i - 2] + data[i - 3]) / 10.0;
        }
        let adjustment = 0.075 * period + 0.54;
        detrender[i] = hilbert(&smooth, i, adjustment);
        quadrature[i] = hilbert(&detrender, i, adjustment);
        in_phase[i] = lag(&detrender, i, 3);

        // Advance the phase of I1 and Q1 by 90 degrees
        let j_i = hilbert(&in_phase, i, adjustment);
        let j_q = hilbert(&quadrature, i, adjustment);

        let i2 = 0.2 * (in_phase[i] - j_q) + 0.8 * i2_prev;
        let q2 = 0.2 * (quadrature[i] + j_i) + 0.8 * q2_prev;

        // Homodyne discriminator
        let re = 0.2 * (i2 * i2_prev + q2 * q2_prev) + 0.8 * re_prev;
        let im = 0.2 * (i2 * q2_prev - q2 * i2_prev) + 0.8 * im_prev;
        i2_prev = i2;
        q2_prev = q2;
        re_prev = re;
        im_prev = im;

        let prev_period = period;
        if im != 0.0 && re != 0.0 {
            period = 360.0 / (im / re).atan().to_degrees();
        }
        if period > 1.5 * prev_period {
            period = 1.5 * prev_period;
        }
        if period < 0.67 * prev_period {
            period = 0.67 * prev_period;
        }
        period = period.clamp(6.0, 50.0);
        period = 0.2 * period + 0.8 * prev_period;

        let phase = if in_phase[i] != 0.0 {
            (quadrature[i] / in_phase[i]).atan().to_degrees()
        } else {
            phase_prev
        };
        let delta_phase = (phase_prev - phase).max(1.0);
        phase_prev = phase;

        let mut alpha = fast_limit / delta_phase;
        if alpha < slow_limit {
            alpha = slow_limit;
        }

        mama_val = alpha * price + (1.0 - alpha) * mama_val;
        fama_val = 0.5 * alpha * mama_val + (1.0 - 0.5 * alpha) * fama_val;

        if i >= MAMA_LOOKBACK {
            mama_out[i] = mama_val;
            fama_out[i] = fama_val;
        }
    }

    (mama_out, fama_out)
}

/// Rolling sample standard deviation over a window centered on each row.
///
/// Windows are truncated at the series edges (a single value is enough to
/// form a window) and a window with fewer than two values yields NaN.
pub fn rolling_std_centered(data: &[f64], window: usize) -> Vec<f64> {
    let n = data.len();
    if window == 0 {
        return vec![f64::NAN; n];
    }
    let half = window / 2;
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + window - half).min(n);
            sample_std(&data[start..end])
        })
        .collect()
}

fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Last value of a series, NaN when empty.
pub fn last(series: &[f64]) -> f64 {
    series.last().copied().unwrap_or(f64::NAN)
}
