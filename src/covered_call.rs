use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::CoveredCallArgs;
use crate::market_data::{self, Interval, YahooOptions};
use crate::metrics::{self, PerformanceSummary};
use crate::pricing::black_scholes_call;
use crate::report;
use crate::series::{self, PricePoint};
use crate::volatility::{FixedImpliedVol, ImpliedVolSource, VolSource, select_volatility};

/// Shares per option contract.
pub const LOT_SIZE: u64 = 100;

/// Parameters of the weekly covered-call simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoveredCallConfig {
    pub initial_shares: u64,
    pub initial_cash: f64,
    /// Strike as a multiple of the week's close
    pub strike_multiplier: f64,
    /// Time to expiry of each written call, in years
    pub tenor_years: f64,
    pub risk_free_rate: f64,
    /// Volatility for the first week when no implied volatility is known
    pub fallback_vol: f64,
    pub periods_per_year: f64,
}

impl Default for CoveredCallConfig {
    fn default() -> Self {
        Self {
            initial_shares: 100,
            initial_cash: 0.0,
            strike_multiplier: 1.05,
            tenor_years: 1.0 / 52.0,
            risk_free_rate: 0.02,
            fallback_vol: 0.20,
            periods_per_year: 52.0,
        }
    }
}

/// One simulated week. Share and cash figures are after any assignment
/// triggered by this week's call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRow {
    pub date: NaiveDate,
    pub close: f64,
    pub portfolio_value: f64,
    pub premiums_collected: f64,
    pub contracts_sold: u64,
    pub shares_held: u64,
    pub leftover_shares: u64,
    pub assignment: bool,
    pub cash: f64,
    pub shares_bought: u64,
    /// Premium earned this week across all contracts
    pub premium: f64,
    pub premium_per_contract: f64,
    /// Strike of the call written this week, if any
    pub strike: Option<f64>,
    pub sigma: f64,
    pub vol_source: VolSource,
}

struct SimState {
    shares: u64,
    cash: f64,
    premiums: f64,
}

/// Fold the weekly closes into the ledger.
///
/// `implied_vol` is a single snapshot held for the whole run; when absent or
/// not positive each week falls back to historical volatility (from the
/// second week) or `cfg.fallback_vol`.
pub fn simulate(
    weeks: &[PricePoint],
    cfg: &CoveredCallConfig,
    implied_vol: Option<f64>,
) -> Vec<LedgerRow> {
    let closes = series::closes(weeks);
    let n = weeks.len();
    let mut st = SimState {
        shares: cfg.initial_shares,
        cash: cfg.initial_cash,
        premiums: 0.0,
    };
    let mut ledger = Vec::with_capacity(n);

    for (idx, week) in weeks.iter().enumerate() {
        let price = week.close;

        // reinvest idle cash in whole shares first
        let affordable = (st.cash / price).floor();
        let shares_bought = if affordable >= 1.0 { affordable as u64 } else { 0 };
        if shares_bought > 0 {
            st.shares += shares_bought;
            st.cash -= shares_bought as f64 * price;
        }

        let contracts = st.shares / LOT_SIZE;
        let leftover_shares = st.shares % LOT_SIZE;

        let (sigma, vol_source) = select_volatility(
            implied_vol,
            &closes,
            idx,
            cfg.periods_per_year,
            cfg.fallback_vol,
        );

        let mut strike = None;
        let mut premium_per_contract = 0.0;
        let mut premium = 0.0;
        if contracts > 0 {
            let k = price * cfg.strike_multiplier;
            premium_per_contract =
                black_scholes_call(price, k, cfg.tenor_years, cfg.risk_free_rate, sigma);
            premium = premium_per_contract * contracts as f64;
            st.cash += premium;
            st.premiums += premium;
            strike = Some(k);
        }

        // the call expires on next week's date; the last week has no expiry to check
        let mut assignment = false;
        if let (Some(k), Some(next)) = (strike, weeks.get(idx + 1)) {
            if next.close >= k {
                st.cash += k * (contracts * LOT_SIZE) as f64;
                st.shares -= contracts * LOT_SIZE;
                assignment = true;
            }
        }

        debug!(
            "{} price={:.2} shares={} contracts={} cash={:.2} premium={:.4} sigma={:.4} ({}) assigned={}",
            week.date, price, st.shares, contracts, st.cash, premium, sigma, vol_source, assignment
        );

        ledger.push(LedgerRow {
            date: week.date,
            close: price,
            portfolio_value: st.cash + st.shares as f64 * price,
            premiums_collected: st.premiums,
            contracts_sold: contracts,
            shares_held: st.shares,
            leftover_shares,
            assignment,
            cash: st.cash,
            shares_bought,
            premium,
            premium_per_contract,
            strike,
            sigma,
            vol_source,
        });
    }
    ledger
}

/// Ask `source` once for an implied volatility at the first week's close.
/// Any error, missing value or non-positive value yields `None`.
pub async fn lookup_implied_vol<S: ImpliedVolSource>(
    source: &S,
    ticker: &str,
    spot: f64,
) -> Option<f64> {
    match source.atm_implied_vol(ticker, spot).await {
        Ok(Some(iv)) if iv.is_finite() && iv > 0.0 => {
            info!("using implied volatility {:.2}% for {}", iv * 100.0, ticker);
            Some(iv)
        }
        Ok(_) => {
            warn!("no implied volatility for {}; using historical estimate", ticker);
            None
        }
        Err(e) => {
            warn!("implied volatility lookup for {} failed: {:#}", ticker, e);
            None
        }
    }
}

/// Simulate with a single implied-volatility lookup made before the first week.
pub async fn simulate_with_source<S: ImpliedVolSource>(
    weeks: &[PricePoint],
    cfg: &CoveredCallConfig,
    ticker: &str,
    source: &S,
) -> Vec<LedgerRow> {
    let Some(first) = weeks.first() else {
        return vec![];
    };
    let iv = lookup_implied_vol(source, ticker, first.close).await;
    simulate(weeks, cfg, iv)
}

/// Headline figures of a finished ledger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerSummary {
    pub weeks: usize,
    pub total_premiums: f64,
    pub last_contracts: u64,
    pub assignments: usize,
    pub final_value: f64,
}

impl LedgerSummary {
    pub fn new(ledger: &[LedgerRow]) -> Self {
        let last = ledger.last();
        Self {
            weeks: ledger.len(),
            total_premiums: last.map(|r| r.premiums_collected).unwrap_or(0.0),
            last_contracts: last.map(|r| r.contracts_sold).unwrap_or(0),
            assignments: ledger.iter().filter(|r| r.assignment).count(),
            final_value: last.map(|r| r.portfolio_value).unwrap_or(0.0),
        }
    }
}

pub async fn execute(args: &CoveredCallArgs) -> Result<()> {
    let ticker = args.ticker.as_deref().unwrap_or("AAPL");
    let bench_ticker = args.benchmark_ticker.as_deref().unwrap_or("^GSPC");
    let start = parse_date(args.start.as_deref(), "--start")?;
    let end = parse_date(args.end.as_deref(), "--end")?;
    if end <= start {
        bail!("--end must be after --start");
    }

    let client = market_data::mk_client()?;
    let prices = market_data::load_prices(
        &client,
        args.prices.as_deref(),
        ticker,
        start,
        end,
        Interval::Weekly,
    )
    .await
    .with_context(|| format!("load prices for {}", ticker))?;
    let bench = market_data::load_prices(
        &client,
        args.benchmark.as_deref(),
        bench_ticker,
        start,
        end,
        Interval::Weekly,
    )
    .await
    .with_context(|| format!("load benchmark {}", bench_ticker))?;

    let (weeks, bench_weeks) = series::align(
        &series::resample_weekly(&prices),
        &series::resample_weekly(&bench),
    );
    if weeks.is_empty() {
        bail!("no overlapping valid weeks for {} and {}", ticker, bench_ticker);
    }
    info!(
        "{} weeks from {} to {}",
        weeks.len(),
        weeks[0].date,
        weeks[weeks.len() - 1].date
    );

    let cfg = CoveredCallConfig {
        initial_cash: args.initial_cash.unwrap_or(0.0),
        risk_free_rate: args.rate.unwrap_or(0.02),
        strike_multiplier: args.strike_multiplier.unwrap_or(1.05),
        fallback_vol: args.fallback_vol.unwrap_or(0.20),
        ..CoveredCallConfig::default()
    };

    let ledger = if let Some(iv) = args.iv {
        simulate_with_source(&weeks, &cfg, ticker, &FixedImpliedVol(iv)).await
    } else if !args.no_iv_lookup {
        simulate_with_source(&weeks, &cfg, ticker, &YahooOptions::new(client.clone())).await
    } else {
        simulate(&weeks, &cfg, None)
    };

    if !args.quiet {
        report::print_ledger(&ledger);
    }

    let values: Vec<f64> = ledger.iter().map(|r| r.portfolio_value).collect();
    let bench_curve = metrics::benchmark_curve(&series::closes(&bench_weeks));
    let strat = PerformanceSummary::from_values(&values, cfg.periods_per_year);
    let bench_perf = PerformanceSummary::from_values(&bench_curve, cfg.periods_per_year);
    report::print_covered_call_summary(ticker, &LedgerSummary::new(&ledger));
    report::print_comparison(
        &format!("Covered Call ({})", ticker),
        strat.as_ref(),
        bench_ticker,
        bench_perf.as_ref(),
    );
    Ok(())
}

pub fn parse_date(s: Option<&str>, flag: &str) -> Result<NaiveDate> {
    let s = s.with_context(|| format!("missing {}", flag))?;
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid {} (expected YYYY-MM-DD)", flag))
}
