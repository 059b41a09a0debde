use statrs::statistics::Statistics;

use crate::series::pct_change;

/// Return/risk figures of a value curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSummary {
    pub periods: usize,
    pub total_return: f64,
    pub annual_return: f64,
    /// Annualized sample deviation of period returns
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

impl PerformanceSummary {
    /// `None` for an empty curve or one that starts at a non-positive value.
    pub fn from_values(values: &[f64], periods_per_year: f64) -> Option<Self> {
        let first = *values.first()?;
        let last = *values.last()?;
        if !(first > 0.0) {
            return None;
        }
        let n = values.len();
        let total_return = last / first - 1.0;
        let annual_return = (1.0 + total_return).powf(periods_per_year / n as f64) - 1.0;

        let rets: Vec<f64> = pct_change(values).into_iter().skip(1).collect();
        let volatility = if rets.len() > 1 {
            rets.std_dev() * periods_per_year.sqrt()
        } else {
            0.0
        };
        let sharpe_ratio = if volatility > 0.0 {
            annual_return / volatility
        } else {
            0.0
        };
        Some(Self {
            periods: n,
            total_return,
            annual_return,
            volatility,
            sharpe_ratio,
        })
    }
}

/// Growth of one unit invested in the benchmark: cumulative product of
/// `1 + r` over period returns, the first return taken as 0.
pub fn benchmark_curve(closes: &[f64]) -> Vec<f64> {
    pct_change(closes)
        .into_iter()
        .scan(1.0, |acc, r| {
            *acc *= 1.0 + r;
            Some(*acc)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benchmark_curve_tracks_price_ratio() {
        let curve = benchmark_curve(&[50.0, 55.0, 44.0, 60.0]);
        assert_eq!(curve[0], 1.0);
        for (c, p) in curve.iter().zip([50.0, 55.0, 44.0, 60.0]) {
            assert!((c - p / 50.0).abs() < 1e-12);
        }
        assert!(benchmark_curve(&[]).is_empty());
    }

    #[test]
    fn summary_of_steady_growth() {
        // 1% a week for 52 weeks
        let values: Vec<f64> = (0..52).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let s = PerformanceSummary::from_values(&values, 52.0).unwrap();
        assert_eq!(s.periods, 52);
        assert!((s.total_return - (1.01f64.powi(51) - 1.0)).abs() < 1e-9);
        assert!(s.volatility < 1e-9);
    }

    #[test]
    fn summary_volatility_and_sharpe() {
        let values = [100.0, 110.0, 99.0, 108.9];
        let s = PerformanceSummary::from_values(&values, 52.0).unwrap();
        assert!((s.total_return - 0.089).abs() < 1e-9);
        let rets: [f64; 3] = [0.1, -0.1, 0.1];
        let mean: f64 = 0.1 / 3.0;
        let var = rets.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / 2.0;
        assert!((s.volatility - var.sqrt() * 52f64.sqrt()).abs() < 1e-9);
        assert!((s.sharpe_ratio - s.annual_return / s.volatility).abs() < 1e-12);
    }

    #[test]
    fn degenerate_curves() {
        assert_eq!(PerformanceSummary::from_values(&[], 52.0), None);
        assert_eq!(PerformanceSummary::from_values(&[0.0, 10.0], 52.0), None);
        let one = PerformanceSummary::from_values(&[10.0], 52.0).unwrap();
        assert_eq!(one.total_return, 0.0);
        assert_eq!(one.volatility, 0.0);
    }
}
