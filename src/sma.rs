use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use crate::SmaArgs;
use crate::covered_call::parse_date;
use crate::market_data::{self, Interval};
use crate::metrics::{self, PerformanceSummary};
use crate::report;
use crate::series::{self, PricePoint, rolling_ma};

/// Shares held while the crossover signal is on.
pub const POSITION_SHARES: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmaRow {
    pub date: NaiveDate,
    pub close: f64,
    pub short_ma: Option<f64>,
    pub long_ma: Option<f64>,
    pub signal: u8,
    pub position: f64,
    pub holdings: f64,
    pub cash: f64,
    pub total: f64,
    pub returns: f64,
}

/// 1 while the short moving average is above the long one, else 0.
pub fn crossover_signals(closes: &[f64], short: usize, long: usize) -> Vec<u8> {
    let ma_s = rolling_ma(closes, short);
    let ma_l = rolling_ma(closes, long);
    ma_s.iter()
        .zip(&ma_l)
        .map(|(s, l)| match (s, l) {
            (Some(s), Some(l)) if s > l => 1,
            _ => 0,
        })
        .collect()
}

/// Fixed 100-share position while the signal is on. Trades settle at the
/// close; no costs.
pub fn backtest(points: &[PricePoint], short: usize, long: usize, initial_capital: f64) -> Vec<SmaRow> {
    let closes = series::closes(points);
    let ma_s = rolling_ma(&closes, short);
    let ma_l = rolling_ma(&closes, long);
    let signals = crossover_signals(&closes, short, long);

    let mut rows: Vec<SmaRow> = Vec::with_capacity(points.len());
    let mut cash = initial_capital;
    let mut prev_position = None;
    for (i, p) in points.iter().enumerate() {
        let position = POSITION_SHARES * signals[i] as f64;
        if let Some(prev) = prev_position {
            cash -= (position - prev) * p.close;
        }
        prev_position = Some(position);
        let holdings = position * p.close;
        let total = cash + holdings;
        let returns = match rows.last() {
            Some(r) if r.total != 0.0 => total / r.total - 1.0,
            _ => 0.0,
        };
        rows.push(SmaRow {
            date: p.date,
            close: p.close,
            short_ma: ma_s[i],
            long_ma: ma_l[i],
            signal: signals[i],
            position,
            holdings,
            cash,
            total,
            returns,
        });
    }
    rows
}

pub async fn execute(args: &SmaArgs) -> Result<()> {
    let ticker = args.ticker.as_deref().unwrap_or("AAPL");
    let bench_ticker = args.benchmark_ticker.as_deref().unwrap_or("^GSPC");
    let start = parse_date(args.start.as_deref(), "--start")?;
    let end = parse_date(args.end.as_deref(), "--end")?;
    let short = args.ma_short.unwrap_or(40);
    let long = args.ma_long.unwrap_or(100);
    if short == 0 || long <= short {
        bail!("need 0 < --ma-short < --ma-long (got {} / {})", short, long);
    }

    let client = market_data::mk_client()?;
    let prices = market_data::load_prices(
        &client,
        args.prices.as_deref(),
        ticker,
        start,
        end,
        Interval::Daily,
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
    if prices.len() < long {
        bail!("{} has {} bars, need at least {}", ticker, prices.len(), long);
    }

    let rows = backtest(&prices, short, long, args.initial_capital.unwrap_or(10_000.0));
    let days_in = rows.iter().filter(|r| r.signal == 1).count();
    info!("{} bars, {} with the signal on", rows.len(), days_in);

    let totals: Vec<f64> = rows.iter().map(|r| r.total).collect();
    let bench_weeks = series::resample_weekly(&bench);
    let bench_curve = metrics::benchmark_curve(&series::closes(&bench_weeks));
    report::print_comparison(
        &format!("SMA Crossover {}/{} ({})", short, long, ticker),
        PerformanceSummary::from_values(&totals, 252.0).as_ref(),
        bench_ticker,
        PerformanceSummary::from_values(&bench_curve, 52.0).as_ref(),
    );
    Ok(())
}
