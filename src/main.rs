use anyhow::{Result, bail};
use covered_call_backtest::{CoveredCallArgs, SmaArgs, covered_call, sma};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    CoveredCall(CoveredCallArgs),
    Sma(SmaArgs),
}

const DEFAULT_TICKER: &str = "AAPL";
const DEFAULT_BENCHMARK: &str = "^GSPC";
const DEFAULT_START: &str = "2020-01-01";
const DEFAULT_END: &str = "2023-01-01";

fn apply_covered_call_defaults(args: &mut CoveredCallArgs) -> Result<()> {
    if args.ticker.is_none() {
        args.ticker = Some(DEFAULT_TICKER.to_string());
    }
    if args.benchmark_ticker.is_none() {
        args.benchmark_ticker = Some(DEFAULT_BENCHMARK.to_string());
    }
    if args.start.is_none() {
        args.start = Some(DEFAULT_START.to_string());
    }
    if args.end.is_none() {
        args.end = Some(DEFAULT_END.to_string());
    }
    if args.initial_cash.is_none() {
        args.initial_cash = Some(0.0);
    }
    if args.rate.is_none() {
        args.rate = Some(0.02);
    }
    if args.strike_multiplier.is_none() {
        args.strike_multiplier = Some(1.05);
    }
    if args.fallback_vol.is_none() {
        args.fallback_vol = Some(0.20);
    }
    if let Some(cash) = args.initial_cash
        && !(cash >= 0.0)
    {
        bail!("--initial-cash must be >= 0 (got {})", cash);
    }
    if let Some(m) = args.strike_multiplier
        && !(m > 0.0)
    {
        bail!("--strike-multiplier must be > 0 (got {})", m);
    }
    Ok(())
}

fn apply_sma_defaults(args: &mut SmaArgs) {
    if args.ticker.is_none() {
        args.ticker = Some(DEFAULT_TICKER.to_string());
    }
    if args.benchmark_ticker.is_none() {
        args.benchmark_ticker = Some(DEFAULT_BENCHMARK.to_string());
    }
    if args.start.is_none() {
        args.start = Some(DEFAULT_START.to_string());
    }
    if args.end.is_none() {
        args.end = Some(DEFAULT_END.to_string());
    }
    if args.ma_short.is_none() {
        args.ma_short = Some(40);
    }
    if args.ma_long.is_none() {
        args.ma_long = Some(100);
    }
    if args.initial_capital.is_none() {
        args.initial_capital = Some(10_000.0);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Args::parse();
    match args.command {
        Some(Command::CoveredCall(mut cc_args)) => {
            apply_covered_call_defaults(&mut cc_args)?;
            covered_call::execute(&cc_args).await?;
        }
        Some(Command::Sma(mut sma_args)) => {
            apply_sma_defaults(&mut sma_args);
            sma::execute(&sma_args).await?;
        }
        None => {
            println!("Running covered-call backtest with default arguments...");
            let mut cc_args = CoveredCallArgs::default();
            apply_covered_call_defaults(&mut cc_args)?;
            covered_call::execute(&cc_args).await?;
        }
    }
    Ok(())
}
