use crate::error::FetchError;
use crate::series::DailyBar;
use chrono::{DateTime, Days, NaiveDate, NaiveTime};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Half-open calendar range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// The `days` calendar days before `end`.
    pub fn trailing(end: NaiveDate, days: u64) -> Self {
        Self {
            start: end.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN),
            end,
        }
    }
}

/// Latest close and volume for an instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub date: NaiveDate,
    pub close: f64,
    pub volume: Option<f64>,
}

/// Source of daily bars.
///
/// Implementations return bars ascending by date. An unknown or delisted
/// symbol, or a range with no trading, is an empty vector and not an error.
#[allow(async_fn_in_trait)]
pub trait MarketDataSource {
    async fn daily_bars(&self, symbol: &str, range: DateRange) -> Result<Vec<DailyBar>, FetchError>;
}

/// Last bar of the trailing week ending at `today` (inclusive).
pub async fn latest_quote<S: MarketDataSource>(
    source: &S,
    symbol: &str,
    today: NaiveDate,
) -> Result<Option<Quote>, FetchError> {
    let end = today.succ_opt().unwrap_or(today);
    let bars = source.daily_bars(symbol, DateRange::trailing(end, 7)).await?;
    Ok(bars.last().map(|b| Quote {
        date: b.date,
        close: b.close,
        volume: b.volume,
    }))
}

// --- Yahoo Finance chart API ---

#[derive(Deserialize, Debug)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Deserialize, Debug)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Deserialize, Debug, Default)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Deserialize, Debug)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Deserialize, Debug, Default)]
struct ChartQuote {
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

pub struct YahooFinance {
    client: Client,
    base_url: String,
}

impl YahooFinance {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl MarketDataSource for YahooFinance {
    async fn daily_bars(&self, symbol: &str, range: DateRange) -> Result<Vec<DailyBar>, FetchError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let query = [
            ("period1", unix_seconds(range.start).to_string()),
            ("period2", unix_seconds(range.end).to_string()),
            ("interval", "1d".to_string()),
            ("events", "history".to_string()),
        ];

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(symbol, status = status.as_u16(), bytes = body.len(), "chart response");

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        parse_chart(&body, range)
    }
}

fn unix_seconds(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// Turns a chart payload into ascending bars within `range`.
fn parse_chart(body: &str, range: DateRange) -> Result<Vec<DailyBar>, FetchError> {
    let envelope: ChartEnvelope =
        serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;

    if let Some(err) = envelope.chart.error {
        if err.code == "Not Found" {
            return Ok(Vec::new());
        }
        return Err(FetchError::Decode(format!("{}: {}", err.code, err.description)));
    }

    let Some(result) = envelope.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

    // keyed by date so repeated sessions keep the last bar
    let mut by_date = BTreeMap::new();
    for (i, ts) in result.timestamp.iter().enumerate() {
        let Some(close) = quote.close.get(i).copied().flatten() else {
            continue;
        };
        let Some(date) = DateTime::from_timestamp(ts + result.meta.gmtoffset, 0).map(|d| d.date_naive())
        else {
            continue;
        };
        if date < range.start || date >= range.end {
            continue;
        }
        by_date.insert(
            date,
            DailyBar {
                date,
                high: quote.high.get(i).copied().flatten(),
                low: quote.low.get(i).copied().flatten(),
                close,
                volume: quote.volume.get(i).copied().flatten(),
            },
        );
    }

    Ok(by_date.into_values().collect())
}
