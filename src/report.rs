use crate::covered_call::{LedgerRow, LedgerSummary};
use crate::metrics::PerformanceSummary;

/// Week-by-week ledger table on stdout.
pub fn print_ledger(ledger: &[LedgerRow]) {
    println!("\nWEEK-BY-WEEK LEDGER:");
    println!(
        "{:<10} {:>10} {:>8} {:>9} {:>8} {:>12} {:>10} {:>12} {:>7} {:>10} {:>8} {:>14}",
        "Week",
        "Price",
        "Shares",
        "Contracts",
        "Leftover",
        "Cash",
        "Premium",
        "Premiums",
        "Sigma",
        "VolSource",
        "Assigned",
        "Value"
    );
    for r in ledger {
        println!(
            "{:<10} {:>10.2} {:>8} {:>9} {:>8} {:>12.2} {:>10.4} {:>12.2} {:>7.4} {:>10} {:>8} {:>14.2}",
            r.date.format("%Y-%m-%d").to_string(),
            r.close,
            r.shares_held,
            r.contracts_sold,
            r.leftover_shares,
            r.cash,
            r.premium,
            r.premiums_collected,
            r.sigma,
            r.vol_source.to_string(),
            r.assignment,
            r.portfolio_value
        );
    }
}

pub fn print_covered_call_summary(ticker: &str, s: &LedgerSummary) {
    println!("\n📊 Covered Call {}", ticker);
    println!("   Weeks: {}", s.weeks);
    println!("   Total premiums collected: ${:.2}", s.total_premiums);
    println!("   Contracts sold (last week): {}", s.last_contracts);
    println!("   Assignments: {}", s.assignments);
    println!("   Final portfolio value: ${:.2}", s.final_value);
}

fn print_performance(label: &str, perf: Option<&PerformanceSummary>) {
    println!("\n{} Performance:", label);
    match perf {
        Some(p) => {
            println!("   Total Return: {:.2}%", p.total_return * 100.0);
            println!("   Annual Return: {:.2}%", p.annual_return * 100.0);
            println!("   Annual Volatility: {:.2}%", p.volatility * 100.0);
            println!("   Sharpe Ratio: {:.2}", p.sharpe_ratio);
        }
        None => println!("   (no data)"),
    }
}

/// Strategy metrics followed by the benchmark's.
pub fn print_comparison(
    strategy: &str,
    strat: Option<&PerformanceSummary>,
    benchmark: &str,
    bench: Option<&PerformanceSummary>,
) {
    print_performance(strategy, strat);
    print_performance(benchmark, bench);
    if let (Some(s), Some(b)) = (strat, bench) {
        println!(
            "\nExcess total return vs {}: {:.2}%",
            benchmark,
            (s.total_return - b.total_return) * 100.0
        );
    }
    println!();
}
