pub mod covered_call;
pub mod market_data;
pub mod metrics;
pub mod pricing;
pub mod report;
pub mod series;
pub mod sma;
pub mod volatility;

use clap::Parser;
use std::path::PathBuf;

/// Backtests writing one weekly call per 100 shares held, against a benchmark.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct CoveredCallArgs {
    /// Underlying ticker (also used for the implied-volatility lookup)
    #[arg(long)]
    pub ticker: Option<String>,

    /// Read underlying prices from this CSV (date,close) instead of downloading
    #[arg(long)]
    pub prices: Option<PathBuf>,

    /// Benchmark ticker, e.g. ^GSPC
    #[arg(long)]
    pub benchmark_ticker: Option<String>,

    /// Read benchmark prices from this CSV instead of downloading
    #[arg(long)]
    pub benchmark: Option<PathBuf>,

    /// Start date (inclusive), format YYYY-MM-DD
    #[arg(long)]
    pub start: Option<String>,

    /// End date (exclusive), format YYYY-MM-DD
    #[arg(long)]
    pub end: Option<String>,

    /// Cash on hand at the start, reinvested in whole shares
    #[arg(long)]
    pub initial_cash: Option<f64>,

    /// Use this implied volatility (fraction, e.g. 0.25) for every week
    #[arg(long)]
    pub iv: Option<f64>,

    /// Skip the one-time ATM implied-volatility lookup
    #[arg(long)]
    pub no_iv_lookup: bool,

    /// Annual risk-free rate used for pricing
    #[arg(long)]
    pub rate: Option<f64>,

    /// Strike as a multiple of the weekly close
    #[arg(long)]
    pub strike_multiplier: Option<f64>,

    /// Volatility for the first week when no implied volatility is available
    #[arg(long)]
    pub fallback_vol: Option<f64>,

    /// Skip the week-by-week table
    #[arg(long)]
    pub quiet: bool,
}

/// Backtests a fixed-size moving-average crossover position on daily closes.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct SmaArgs {
    #[arg(long)]
    pub ticker: Option<String>,
    #[arg(long)]
    pub prices: Option<PathBuf>,
    #[arg(long)]
    pub benchmark_ticker: Option<String>,
    #[arg(long)]
    pub benchmark: Option<PathBuf>,
    /// Start date (inclusive), format YYYY-MM-DD
    #[arg(long)]
    pub start: Option<String>,
    /// End date (exclusive), format YYYY-MM-DD
    #[arg(long)]
    pub end: Option<String>,

    /// Lookbacks (bars)
    #[arg(long)]
    pub ma_short: Option<usize>,
    #[arg(long)]
    pub ma_long: Option<usize>,

    #[arg(long)]
    pub initial_capital: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covered_call_switches_are_bare_flags() {
        let args = CoveredCallArgs::try_parse_from(["covered-call", "--no-iv-lookup", "--quiet"]).unwrap();
        assert!(args.no_iv_lookup);
        assert!(args.quiet);

        let args = CoveredCallArgs::try_parse_from(["covered-call", "--ticker", "MSFT"]).unwrap();
        assert!(!args.no_iv_lookup);
        assert!(!args.quiet);
        assert_eq!(args.ticker.as_deref(), Some("MSFT"));
    }

    #[test]
    fn covered_call_switches_take_no_value() {
        assert!(CoveredCallArgs::try_parse_from(["covered-call", "--quiet", "true"]).is_err());
    }
}
