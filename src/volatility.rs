use anyhow::Result;
use itertools::Itertools;
use serde::Serialize;
use statrs::statistics::Statistics;
use std::future::Future;

/// Where a week's volatility came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VolSource {
    Implied,
    Historical,
    Fallback,
}

impl std::fmt::Display for VolSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VolSource::Implied => "implied",
            VolSource::Historical => "historical",
            VolSource::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

/// Annualized sample standard deviation of log-returns of `closes`.
///
/// Needs at least two closes. A single return has no spread to measure and
/// yields `0.0`. Returns `None` for fewer closes or non-positive prices.
pub fn historical_volatility(closes: &[f64], periods_per_year: f64) -> Option<f64> {
    if closes.iter().any(|c| !(*c > 0.0)) {
        return None;
    }
    let logrets: Vec<f64> = closes
        .iter()
        .tuple_windows()
        .map(|(prev, next)| (next / prev).ln())
        .collect();
    match logrets.len() {
        0 => return None,
        1 => return Some(0.0),
        _ => {}
    }
    let sd = logrets.std_dev() * periods_per_year.sqrt();
    sd.is_finite().then_some(sd)
}

/// Volatility for week `idx`, in priority order: a positive implied
/// volatility, the historical estimate over `closes[..=idx]` from the second
/// week on, else `fallback`.
pub fn select_volatility(
    implied: Option<f64>,
    closes: &[f64],
    idx: usize,
    periods_per_year: f64,
    fallback: f64,
) -> (f64, VolSource) {
    if let Some(iv) = implied.filter(|v| *v > 0.0) {
        return (iv, VolSource::Implied);
    }
    if idx > 0 {
        if let Some(hv) = historical_volatility(&closes[..=idx], periods_per_year) {
            return (hv, VolSource::Historical);
        }
    }
    (fallback, VolSource::Fallback)
}

/// Supplies an at-the-money implied volatility snapshot for a ticker.
///
/// `Ok(None)` means the source has no data; callers treat errors the same way.
pub trait ImpliedVolSource {
    fn atm_implied_vol(
        &self,
        ticker: &str,
        spot: f64,
    ) -> impl Future<Output = Result<Option<f64>>> + Send;
}

/// Constant implied volatility, e.g. from the command line.
#[derive(Debug, Clone, Copy)]
pub struct FixedImpliedVol(pub f64);

impl ImpliedVolSource for FixedImpliedVol {
    async fn atm_implied_vol(&self, _ticker: &str, _spot: f64) -> Result<Option<f64>> {
        Ok(Some(self.0))
    }
}

/// One call quote of an option chain snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct OptionQuote {
    /// Expiry as unix seconds
    pub expiration: i64,
    pub strike: f64,
    pub implied_volatility: Option<f64>,
}

/// Implied volatility of the call nearest the money at the nearest expiry.
pub fn nearest_atm_iv(chain: &[OptionQuote], spot: f64) -> Option<f64> {
    let nearest = chain.iter().map(|q| q.expiration).min()?;
    chain
        .iter()
        .filter(|q| q.expiration == nearest && q.strike.is_finite())
        .min_by(|a, b| (a.strike - spot).abs().total_cmp(&(b.strike - spot).abs()))
        .and_then(|q| q.implied_volatility)
        .filter(|iv| iv.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn historical_needs_two_closes() {
        assert_eq!(historical_volatility(&[], 52.0), None);
        assert_eq!(historical_volatility(&[100.0], 52.0), None);
        assert_eq!(historical_volatility(&[100.0, 101.0], 52.0), Some(0.0));
        assert!(historical_volatility(&[100.0, 101.0, 99.0], 52.0).is_some());
    }

    #[test]
    fn historical_matches_hand_computation() {
        let closes = [100.0, 110.0, 99.0];
        let r1 = (110.0f64 / 100.0).ln();
        let r2 = (99.0f64 / 110.0).ln();
        let m = (r1 + r2) / 2.0;
        let sd = (((r1 - m).powi(2) + (r2 - m).powi(2)) / 1.0).sqrt();
        let hv = historical_volatility(&closes, 52.0).unwrap();
        assert!((hv - sd * 52f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn flat_prices_have_zero_volatility() {
        assert_eq!(historical_volatility(&[50.0, 50.0, 50.0], 52.0), Some(0.0));
    }

    #[test]
    fn selection_priority() {
        let closes = [100.0, 110.0, 99.0];
        assert_eq!(
            select_volatility(Some(0.35), &closes, 2, 52.0, 0.2),
            (0.35, VolSource::Implied)
        );
        assert_eq!(
            select_volatility(Some(0.0), &closes, 0, 52.0, 0.2),
            (0.2, VolSource::Fallback)
        );
        assert_eq!(
            select_volatility(None, &closes, 0, 52.0, 0.2),
            (0.2, VolSource::Fallback)
        );
        assert_eq!(
            select_volatility(None, &closes, 1, 52.0, 0.2),
            (0.0, VolSource::Historical)
        );
        let (v, src) = select_volatility(None, &closes, 2, 52.0, 0.2);
        assert_eq!(src, VolSource::Historical);
        assert_eq!(Some(v), historical_volatility(&closes, 52.0));
    }

    #[test]
    fn atm_pick_uses_nearest_expiry() {
        let chain = vec![
            OptionQuote { expiration: 200, strike: 100.0, implied_volatility: Some(0.9) },
            OptionQuote { expiration: 100, strike: 90.0, implied_volatility: Some(0.3) },
            OptionQuote { expiration: 100, strike: 102.0, implied_volatility: Some(0.25) },
            OptionQuote { expiration: 100, strike: 110.0, implied_volatility: Some(0.4) },
        ];
        assert_eq!(nearest_atm_iv(&chain, 101.0), Some(0.25));
        assert_eq!(nearest_atm_iv(&[], 101.0), None);
    }

    #[tokio::test]
    async fn fixed_source_returns_its_value() {
        let iv = FixedImpliedVol(0.42).atm_implied_vol("AAPL", 150.0).await.unwrap();
        assert_eq!(iv, Some(0.42));
    }
}
