use statrs::function::erf::erfc;
use std::f64::consts::SQRT_2;

/// Standard normal CDF.
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Theoretical price of a European call (Black-Scholes, no dividends).
///
/// `spot` and `strike` in currency units, `t` in years, `rate` and `sigma`
/// annualized fractions. Degenerate inputs (any of spot, strike, sigma or t
/// not strictly positive) price at `0.0`. The result is floored at `0.0`.
pub fn black_scholes_call(spot: f64, strike: f64, t: f64, rate: f64, sigma: f64) -> f64 {
    // negated comparisons so NaN lands here as well
    if !(spot > 0.0 && strike > 0.0 && sigma > 0.0 && t > 0.0) {
        return 0.0;
    }
    let sd = sigma * t.sqrt();
    let d1 = ((spot / strike).ln() + (rate + 0.5 * sigma.powi(2)) * t) / sd;
    let d2 = d1 - sd;
    let call = spot * norm_cdf(d1) - strike * (-rate * t).exp() * norm_cdf(d2);
    if call.is_finite() { call.max(0.0) } else { 0.0 }
}
