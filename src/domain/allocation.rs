use serde::{Deserialize, Serialize};

/// Tolerance on the unit-sum invariant of an allocation.
pub const ALLOCATION_TOLERANCE: f64 = 1e-6;

/// Target portfolio weights, one per asset in observation order (cash last).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation(Vec<f64>);

impl Allocation {
    /// Wrap raw weights without validation. Environments check validity on step.
    pub fn from_vec(weights: Vec<f64>) -> Self {
        Self(weights)
    }

    /// Sum-normalize raw scores into a valid allocation.
    ///
    /// Negative and non-finite scores count as zero. When nothing positive is
    /// left the whole portfolio goes to the last (cash) asset.
    pub fn normalize(raw: &[f64]) -> Self {
        let cleaned: Vec<f64> = raw
            .iter()
            .map(|&x| if x.is_finite() && x > 0.0 { x } else { 0.0 })
            .collect();
        let total: f64 = cleaned.iter().sum();
        if total <= f64::EPSILON {
            return Self::all_cash(raw.len());
        }
        Self(cleaned.into_iter().map(|x| x / total).collect())
    }

    /// Softmax activation over raw scores. Non-finite scores count as zero.
    pub fn softmax(raw: &[f64]) -> Self {
        if raw.is_empty() {
            return Self(Vec::new());
        }
        let cleaned: Vec<f64> = raw
            .iter()
            .map(|&x| if x.is_finite() { x } else { 0.0 })
            .collect();
        let max = cleaned.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = cleaned.iter().map(|x| (x - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        Self(exps.into_iter().map(|x| x / total).collect())
    }

    pub fn all_cash(n_assets: usize) -> Self {
        let mut weights = vec![0.0; n_assets];
        if let Some(last) = weights.last_mut() {
            *last = 1.0;
        }
        Self(weights)
    }

    pub fn weights(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Weight of the cash asset.
    pub fn cash(&self) -> Option<f64> {
        self.0.last().copied()
    }

    /// Non-negative, finite and summing to one within `ALLOCATION_TOLERANCE`.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.iter().all(|w| w.is_finite() && *w >= 0.0)
            && (self.sum() - 1.0).abs() <= ALLOCATION_TOLERANCE
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        let a = Allocation::normalize(&[1.0, 1.0, 0.0]);
        assert_eq!(a.weights(), &[0.5, 0.5, 0.0]);
        assert!(a.is_valid());
    }

    #[test]
    fn test_normalize_zero_sum_goes_to_cash() {
        let a = Allocation::normalize(&[0.0, 0.0, 0.0]);
        assert_eq!(a.weights(), &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_normalize_ignores_negative_and_nan() {
        let a = Allocation::normalize(&[-1.0, f64::NAN, 2.0, 2.0]);
        assert_eq!(a.weights(), &[0.0, 0.0, 0.5, 0.5]);
        assert!(a.is_valid());
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let a = Allocation::softmax(&[1.0, 2.0, 3.0]);
        assert!(a.is_valid());
        assert!(a.weights()[2] > a.weights()[1]);
        assert!(a.weights()[1] > a.weights()[0]);
    }

    #[test]
    fn test_softmax_large_scores_stable() {
        let a = Allocation::softmax(&[1000.0, 1000.0]);
        assert!((a.weights()[0] - 0.5).abs() < 1e-12);
        assert!(a.is_valid());
    }

    #[test]
    fn test_is_valid_rejects_bad_weights() {
        assert!(!Allocation::from_vec(vec![0.6, 0.6]).is_valid());
        assert!(!Allocation::from_vec(vec![-0.5, 1.5]).is_valid());
        assert!(!Allocation::from_vec(vec![]).is_valid());
        assert!(Allocation::from_vec(vec![0.3, 0.7 + 1e-9]).is_valid());
    }

    #[test]
    fn test_all_cash() {
        let a = Allocation::all_cash(3);
        assert_eq!(a.cash(), Some(1.0));
        assert!(a.is_valid());
        assert!(Allocation::all_cash(0).is_empty());
    }
}
