use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate};
use csv::ReaderBuilder;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, path::Path};

/// A dated closing price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, close: f64) -> Self {
        Self { date, close }
    }
}

/// CSV row: `date,close` (or the capitalized `Date,...,Close` export header).
/// Other OHLC columns the export carries are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    #[serde(alias = "Date")]
    date: NaiveDate,
    #[serde(default, alias = "Close")]
    close: Option<f64>,
}

/// Read a price CSV. Rows with an empty close are skipped; invalid prices are
/// left for [`clean`].
pub fn read_series(path: &Path) -> Result<Vec<PricePoint>> {
    let mut rdr = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    let mut out = Vec::new();
    for rec in rdr.deserialize::<Row>() {
        let r = rec.with_context(|| format!("parse {}", path.display()))?;
        if let Some(close) = r.close {
            out.push(PricePoint::new(r.date, close));
        }
    }
    Ok(out)
}

/// Drop non-finite or non-positive closes and sort chronologically.
pub fn clean(mut points: Vec<PricePoint>) -> Vec<PricePoint> {
    points.retain(|p| p.close.is_finite() && p.close > 0.0);
    points.sort_by_key(|p| p.date);
    points
}

/// Friday closing the Saturday..Friday week that contains `date`.
pub fn week_ending_friday(date: NaiveDate) -> NaiveDate {
    let wd = date.weekday().num_days_from_monday() as i64;
    date + Duration::days((4 + 7 - wd) % 7)
}

/// Resample to week-ending Friday values: the last valid close of each week,
/// dated on its Friday. Weeks without a valid close are absent.
pub fn resample_weekly(points: &[PricePoint]) -> Vec<PricePoint> {
    let valid = clean(points.to_vec());
    let mut out = Vec::new();
    for (friday, group) in &valid.into_iter().chunk_by(|p| week_ending_friday(p.date)) {
        if let Some(last) = group.last() {
            out.push(PricePoint::new(friday, last.close));
        }
    }
    out
}

/// Restrict both series to the dates they share.
pub fn align(a: &[PricePoint], b: &[PricePoint]) -> (Vec<PricePoint>, Vec<PricePoint>) {
    let da: BTreeSet<NaiveDate> = a.iter().map(|p| p.date).collect();
    let db: BTreeSet<NaiveDate> = b.iter().map(|p| p.date).collect();
    let common: BTreeSet<NaiveDate> = da.intersection(&db).cloned().collect();
    let keep = |s: &[PricePoint]| -> Vec<PricePoint> {
        s.iter()
            .filter(|p| common.contains(&p.date))
            .cloned()
            .collect()
    };
    (keep(a), keep(b))
}

pub fn closes(points: &[PricePoint]) -> Vec<f64> {
    points.iter().map(|p| p.close).collect()
}

pub fn rolling_ma(x: &[f64], w: usize) -> Vec<Option<f64>> {
    if w == 0 {
        return vec![None; x.len()];
    }
    let mut out = vec![None; x.len()];
    let mut sum = 0.0;
    for i in 0..x.len() {
        sum += x[i];
        if i >= w {
            sum -= x[i - w];
        }
        if i + 1 >= w {
            out[i] = Some(sum / w as f64);
        }
    }
    out
}

/// Period-over-period simple returns; the first period is 0.
pub fn pct_change(x: &[f64]) -> Vec<f64> {
    if x.is_empty() {
        return vec![];
    }
    std::iter::once(0.0)
        .chain(
            x.iter()
                .tuple_windows()
                .map(|(prev, next)| if *prev != 0.0 { (next - prev) / prev } else { 0.0 }),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn friday_anchor() {
        // 2024-01-05 is a Friday
        assert_eq!(week_ending_friday(d("2024-01-05")), d("2024-01-05"));
        assert_eq!(week_ending_friday(d("2024-01-01")), d("2024-01-05"));
        assert_eq!(week_ending_friday(d("2024-01-06")), d("2024-01-12"));
        assert_eq!(week_ending_friday(d("2024-01-07")), d("2024-01-12"));
    }

    #[test]
    fn resample_takes_last_valid_close_per_week() {
        let pts = vec![
            PricePoint::new(d("2024-01-02"), 10.0),
            PricePoint::new(d("2024-01-04"), 11.0),
            PricePoint::new(d("2024-01-05"), f64::NAN),
            PricePoint::new(d("2024-01-08"), 12.0),
            PricePoint::new(d("2024-01-12"), -1.0),
            PricePoint::new(d("2024-01-22"), 13.0),
        ];
        let w = resample_weekly(&pts);
        assert_eq!(
            w,
            vec![
                PricePoint::new(d("2024-01-05"), 11.0),
                PricePoint::new(d("2024-01-12"), 12.0),
                PricePoint::new(d("2024-01-26"), 13.0),
            ]
        );
    }

    #[test]
    fn clean_sorts_and_filters() {
        let pts = vec![
            PricePoint::new(d("2024-01-03"), 2.0),
            PricePoint::new(d("2024-01-01"), 0.0),
            PricePoint::new(d("2024-01-02"), 1.0),
        ];
        let c = clean(pts);
        assert_eq!(closes(&c), vec![1.0, 2.0]);
    }

    #[test]
    fn align_keeps_common_dates() {
        let a = vec![
            PricePoint::new(d("2024-01-05"), 1.0),
            PricePoint::new(d("2024-01-12"), 2.0),
        ];
        let b = vec![
            PricePoint::new(d("2024-01-12"), 20.0),
            PricePoint::new(d("2024-01-19"), 30.0),
        ];
        let (a2, b2) = align(&a, &b);
        assert_eq!(closes(&a2), vec![2.0]);
        assert_eq!(closes(&b2), vec![20.0]);
    }

    #[test]
    fn rolling_ma_window() {
        let ma = rolling_ma(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(ma, vec![None, Some(1.5), Some(2.5), Some(3.5)]);
    }

    #[test]
    fn pct_change_first_is_zero() {
        let r = pct_change(&[100.0, 110.0, 99.0]);
        assert_eq!(r.len(), 3);
        assert_eq!(r[0], 0.0);
        assert!((r[1] - 0.1).abs() < 1e-12);
        assert!((r[2] + 0.1).abs() < 1e-12);
    }

    #[test]
    fn reads_csv_with_optional_columns() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "date,open,high,low,close").unwrap();
        writeln!(f, "2024-01-02, 1.0, 2.0, 0.5, 1.5").unwrap();
        writeln!(f, "2024-01-03,,,,").unwrap();
        writeln!(f, "2024-01-04,1.0,2.0,0.5,0").unwrap();
        f.flush().unwrap();
        let pts = read_series(f.path()).unwrap();
        assert_eq!(pts.len(), 2);
        assert_eq!(clean(pts), vec![PricePoint::new(d("2024-01-02"), 1.5)]);
    }

    #[test]
    fn reads_capitalized_export_header() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "Date,Open,High,Low,Close,Adj Close,Volume").unwrap();
        writeln!(f, "2024-01-02,187.15,188.44,183.89,185.64,184.94,82488700").unwrap();
        writeln!(f, "2024-01-03,184.22,185.88,183.43,184.25,183.55,58414500").unwrap();
        f.flush().unwrap();
        let pts = read_series(f.path()).unwrap();
        assert_eq!(
            pts,
            vec![
                PricePoint::new(d("2024-01-02"), 185.64),
                PricePoint::new(d("2024-01-03"), 184.25),
            ]
        );
    }
}
