use anyhow::{Context, Result, anyhow, bail};
use chrono::{NaiveDate, TimeZone, Utc};
use reqwest::{Client, Url, header};
use serde::Deserialize;
use std::{env, path::Path, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::series::{self, PricePoint};
use crate::volatility::{ImpliedVolSource, OptionQuote, nearest_atm_iv};

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart/";
const OPTIONS_URL: &str = "https://query2.finance.yahoo.com/v7/finance/options/";
// hands out the session cookie the crumb endpoint checks
const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_URL: &str = "https://query1.finance.yahoo.com/v1/test/getcrumb";
// a common agent avoids the 429s served to unknown clients
const DEFAULT_USER_AGENT: &str = "curl/7.68.0";

/// Bar granularity of a price request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Daily,
    Weekly,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Daily => "1d",
            Interval::Weekly => "1wk",
        }
    }
}

/// HTTP client for the quote endpoints, with a cookie store for the options
/// session. `YAHOO_USER_AGENT` overrides the agent.
pub fn mk_client() -> Result<Client> {
    let agent = env::var("YAHOO_USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());
    let mut headers = header::HeaderMap::new();
    headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
    let client = Client::builder()
        .default_headers(headers)
        .user_agent(agent)
        .timeout(Duration::from_secs(30))
        .cookie_store(true)
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()?;
    Ok(client)
}

/// GET with retry/backoff (+Retry-After)
pub async fn do_get_json<T: for<'de> Deserialize<'de>>(client: &Client, url: Url) -> Result<T> {
    let mut attempt = 0usize;
    loop {
        let resp = client.get(url.clone()).send().await?;
        if resp.status().is_success() {
            return Ok(resp.json::<T>().await?);
        }
        let status = resp.status();
        attempt += 1;
        if attempt > 4 || !(status.as_u16() == 429 || status.is_server_error()) {
            let txt = resp.text().await.unwrap_or_default();
            bail!("HTTP {} for {}; body: {}", status, url, txt);
        }
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let backoff_ms = retry_after
            .map(|s| s * 1000)
            .unwrap_or(500 * attempt as u64);
        info!("{} -> retrying in {}ms", status, backoff_ms);
        sleep(Duration::from_millis(backoff_ms)).await;
    }
}

fn ticker_url(base: &str, ticker: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("cannot extend {}", base))?
        .pop_if_empty()
        .push(ticker);
    Ok(url)
}

pub fn chart_url(ticker: &str, start: NaiveDate, end: NaiveDate, interval: Interval) -> Result<Url> {
    let (from_ts, to_ts) = (midnight_ts(start)?, midnight_ts(end)?);
    let mut url = ticker_url(CHART_URL, ticker)?;
    url.query_pairs_mut()
        .append_pair("period1", &from_ts.to_string())
        .append_pair("period2", &to_ts.to_string())
        .append_pair("interval", interval.as_str())
        .append_pair("events", "div|split");
    Ok(url)
}

fn midnight_ts(d: NaiveDate) -> Result<i64> {
    let dt = d.and_hms_opt(0, 0, 0).context("invalid date")?;
    Ok(Utc.from_utc_datetime(&dt).timestamp())
}

#[derive(Debug, Deserialize)]
pub struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteList>,
}

#[derive(Debug, Deserialize)]
struct QuoteList {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

impl ChartResponse {
    /// Dated closes; bars with a null close are skipped.
    pub fn closes(&self) -> Result<Vec<PricePoint>> {
        if let Some(err) = self.chart.error.as_ref().filter(|e| !e.is_null()) {
            bail!("chart error: {}", err);
        }
        let block = self
            .chart
            .result
            .as_ref()
            .and_then(|r| r.first())
            .ok_or_else(|| anyhow!("chart returned no result"))?;
        let quote = block
            .indicators
            .quote
            .first()
            .ok_or_else(|| anyhow!("chart returned no quote block"))?;
        if quote.close.len() != block.timestamp.len() {
            bail!(
                "chart returned {} closes for {} timestamps",
                quote.close.len(),
                block.timestamp.len()
            );
        }
        let mut out = Vec::with_capacity(block.timestamp.len());
        for (ts, close) in block.timestamp.iter().zip(&quote.close) {
            let (Some(close), Some(dt)) = (close, Utc.timestamp_opt(*ts, 0).single()) else {
                continue;
            };
            out.push(PricePoint::new(dt.date_naive(), *close));
        }
        Ok(out)
    }
}

/// Closing prices for `ticker` over `[start, end)`.
pub async fn fetch_closes(
    client: &Client,
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
    interval: Interval,
) -> Result<Vec<PricePoint>> {
    let url = chart_url(ticker, start, end, interval)?;
    debug!("GET {}", url);
    let resp = do_get_json::<ChartResponse>(client, url).await?;
    let points = resp.closes()?;
    info!("{}: {} {} bars", ticker, points.len(), interval.as_str());
    Ok(points)
}

/// Prices from `csv` when given, else from the chart endpoint, restricted to
/// `[start, end)` and cleaned of missing or non-positive closes.
pub async fn load_prices(
    client: &Client,
    csv: Option<&Path>,
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
    interval: Interval,
) -> Result<Vec<PricePoint>> {
    let raw = match csv {
        Some(path) => {
            info!("reading {} prices from {}", ticker, path.display());
            series::read_series(path)?
        }
        None => fetch_closes(client, ticker, start, end, interval).await?,
    };
    let mut points = series::clean(raw);
    points.retain(|p| p.date >= start && p.date < end);
    Ok(points)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsResponse {
    option_chain: OptionChain,
}

#[derive(Debug, Deserialize)]
struct OptionChain {
    #[serde(default)]
    result: Vec<OptionChainResult>,
}

#[derive(Debug, Deserialize)]
struct OptionChainResult {
    #[serde(default)]
    options: Vec<ExpiryBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpiryBlock {
    expiration_date: i64,
    #[serde(default)]
    calls: Vec<CallContract>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallContract {
    strike: f64,
    #[serde(default)]
    implied_volatility: Option<f64>,
}

impl OptionsResponse {
    pub fn calls(&self) -> Vec<OptionQuote> {
        self.option_chain
            .result
            .iter()
            .flat_map(|r| &r.options)
            .flat_map(|block| {
                block.calls.iter().map(move |c| OptionQuote {
                    expiration: block.expiration_date,
                    strike: c.strike,
                    implied_volatility: c.implied_volatility,
                })
            })
            .collect()
    }
}

pub fn options_url(ticker: &str, crumb: Option<&str>) -> Result<Url> {
    let mut url = ticker_url(OPTIONS_URL, ticker)?;
    if let Some(crumb) = crumb {
        url.query_pairs_mut().append_pair("crumb", crumb);
    }
    Ok(url)
}

/// Checks a getcrumb body. Rejections come back as an HTML or JSON error page.
fn parse_crumb(body: &str) -> Result<String> {
    let crumb = body.trim();
    if crumb.is_empty() || crumb.len() > 64 || crumb.contains(['<', '{', ' ']) {
        bail!("unexpected crumb response: {:.80}", crumb);
    }
    Ok(crumb.to_string())
}

/// Option-chain implied volatility from the quote endpoint.
///
/// The options endpoint wants a session cookie plus a matching crumb, so each
/// lookup first visits the cookie page and asks for a crumb. Without one the
/// chain request is still sent bare and may be refused with 401; that error
/// reaches the caller, which logs it and falls back to historical volatility.
/// One attempt, no retry.
#[derive(Debug, Clone)]
pub struct YahooOptions {
    client: Client,
}

impl YahooOptions {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn crumb(&self) -> Result<String> {
        // the cookie page answers 404 but still sets the cookie
        self.client
            .get(COOKIE_URL)
            .send()
            .await
            .context("session cookie")?;
        let body = self
            .client
            .get(CRUMB_URL)
            .send()
            .await?
            .error_for_status()
            .context("crumb")?
            .text()
            .await?;
        parse_crumb(&body)
    }
}

impl ImpliedVolSource for YahooOptions {
    async fn atm_implied_vol(&self, ticker: &str, spot: f64) -> Result<Option<f64>> {
        let crumb = match self.crumb().await {
            Ok(c) => Some(c),
            Err(e) => {
                debug!("no crumb, requesting options without one: {:#}", e);
                None
            }
        };
        let url = options_url(ticker, crumb.as_deref())?;
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<OptionsResponse>()
            .await?;
        Ok(nearest_atm_iv(&resp.calls(), spot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_url_carries_range_and_interval() {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let url = chart_url("^GSPC", start, end, Interval::Weekly).unwrap();
        let s = url.as_str();
        assert!(s.starts_with("https://query1.finance.yahoo.com/v8/finance/chart/"), "{}", s);
        assert!(url.path().ends_with("GSPC"), "{}", s);
        assert!(!url.path().contains("//"), "{}", s);
        assert!(s.contains("period1=1577836800"));
        assert!(s.contains("period2=1672531200"));
        assert!(s.contains("interval=1wk"));
    }

    #[test]
    fn chart_payload_skips_null_closes() {
        let json = r#"{"chart":{"result":[{"meta":{"symbol":"AAPL"},
            "timestamp":[1704205800,1704292200,1704378600],
            "indicators":{"quote":[{"close":[185.6,null,181.9],"open":[1,2,3]}]}}],
            "error":null}}"#;
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        let pts = resp.closes().unwrap();
        assert_eq!(pts.len(), 2);
        assert_eq!(pts[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(pts[1].close, 181.9);
    }

    #[test]
    fn chart_error_is_reported() {
        let json = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#;
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        assert!(resp.closes().is_err());
    }

    #[test]
    fn options_url_carries_crumb() {
        let url = options_url("AAPL", Some("abc/DEF.1")).unwrap();
        assert_eq!(url.path(), "/v7/finance/options/AAPL");
        assert_eq!(
            url.query_pairs().find(|(k, _)| k == "crumb").map(|(_, v)| v.into_owned()),
            Some("abc/DEF.1".to_string())
        );
        assert_eq!(options_url("AAPL", None).unwrap().query(), None);
    }

    #[test]
    fn crumb_body_is_validated() {
        assert_eq!(parse_crumb(" Xy7.abc/Q1\n").unwrap(), "Xy7.abc/Q1");
        assert!(parse_crumb("").is_err());
        assert!(parse_crumb("<html><body>Too Many Requests</body></html>").is_err());
        assert!(parse_crumb(r#"{"finance":{"error":{"code":"Unauthorized"}}}"#).is_err());
    }

    #[test]
    fn empty_option_chain_has_no_iv() {
        let resp: OptionsResponse = serde_json::from_str(r#"{"optionChain":{"result":[],"error":null}}"#).unwrap();
        assert!(resp.calls().is_empty());
        assert_eq!(nearest_atm_iv(&resp.calls(), 100.0), None);
    }

    #[test]
    fn options_payload_picks_atm_call() {
        let json = r#"{"optionChain":{"result":[{"underlyingSymbol":"AAPL",
            "options":[{"expirationDate":1705017600,
              "calls":[{"strike":180.0,"impliedVolatility":0.31},
                       {"strike":185.0,"impliedVolatility":0.27},
                       {"strike":190.0}]}]}],"error":null}}"#;
        let resp: OptionsResponse = serde_json::from_str(json).unwrap();
        let calls = resp.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(nearest_atm_iv(&calls, 184.0), Some(0.27));
        assert_eq!(nearest_atm_iv(&calls, 191.0), None);
    }
}
