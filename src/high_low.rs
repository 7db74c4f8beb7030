use crate::quotes::{DateRange, MarketDataSource};
use crate::series::DailyBar;
use crate::storage_utils::{AsyncStorageManager, HighLowConfig, MarketConfig};
use anyhow::{Context, Result};
use chrono::{Months, NaiveDate};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

pub const HIGH_LOW_COLUMNS: [&str; 8] = [
    "Stock",
    "52 Week High",
    "Date of High",
    "52 Week Low",
    "Date of Low",
    "Current Close",
    "Difference (High - Close)",
    "Status",
];

#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct HighLowRow {
    #[serde(rename = "Stock")]
    pub stock: String,
    #[serde(rename = "52 Week High")]
    pub high: Option<f64>,
    #[serde(rename = "Date of High")]
    pub high_date: Option<NaiveDate>,
    #[serde(rename = "52 Week Low")]
    pub low: Option<f64>,
    #[serde(rename = "Date of Low")]
    pub low_date: Option<NaiveDate>,
    #[serde(rename = "Current Close")]
    pub close: Option<f64>,
    #[serde(rename = "Difference (High - Close)")]
    pub difference: Option<f64>,
    #[serde(rename = "Status")]
    pub status: Option<&'static str>,
}

/// Trailing high/low summary over ascending bars.
///
/// Ties keep the earliest date. An empty slice gives a row with only the
/// symbol filled in.
pub fn summarize(stock: &str, bars: &[DailyBar], max_difference: f64) -> HighLowRow {
    let Some(last) = bars.last() else {
        return HighLowRow {
            stock: stock.to_string(),
            ..HighLowRow::default()
        };
    };

    let mut high: Option<(f64, NaiveDate)> = None;
    let mut low: Option<(f64, NaiveDate)> = None;
    for bar in bars {
        if let Some(h) = bar.high {
            if high.is_none_or(|(best, _)| h > best) {
                high = Some((h, bar.date));
            }
        }
        if let Some(l) = bar.low {
            if low.is_none_or(|(best, _)| l < best) {
                low = Some((l, bar.date));
            }
        }
    }

    let close = last.close;
    let difference = high.map(|(h, _)| h - close);
    let status = match (high, low, difference) {
        (Some((h, _)), Some((l, _)), Some(diff)) if l < h && diff < max_difference => "OK",
        _ => "Wait",
    };

    HighLowRow {
        stock: stock.to_string(),
        high: high.map(|(h, _)| h),
        high_date: high.map(|(_, d)| d),
        low: low.map(|(l, _)| l),
        low_date: low.map(|(_, d)| d),
        close: Some(close),
        difference,
        status: Some(status),
    }
}

pub async fn collect<S: MarketDataSource>(
    source: &S,
    symbols: &[String],
    config: &HighLowConfig,
    market: &MarketConfig,
    today: NaiveDate,
) -> Vec<HighLowRow> {
    let end = today.succ_opt().unwrap_or(today);
    let range = DateRange {
        start: end.checked_sub_months(Months::new(12)).unwrap_or(NaiveDate::MIN),
        end,
    };

    stream::iter(symbols.iter())
        .map(|symbol| async move {
            let stock = format!("{}{}", symbol, market.symbol_suffix);
            let bars = match source.daily_bars(&stock, range).await {
                Ok(bars) => bars,
                Err(e) => {
                    warn!(%stock, error = %e, "history fetch failed");
                    Vec::new()
                }
            };
            summarize(&stock, &bars, config.max_difference)
        })
        .buffered(market.max_concurrent_requests.max(1))
        .collect()
        .await
}

pub async fn run<S: MarketDataSource>(
    storage: &AsyncStorageManager,
    source: &S,
    config: &HighLowConfig,
    market: &MarketConfig,
    today: NaiveDate,
) -> Result<Vec<HighLowRow>> {
    let table = storage.load_table(&market.instruments_file).await?;
    let symbols: Vec<String> = table
        .column(&market.symbol_column)
        .with_context(|| format!("{} has no '{}' column", market.instruments_file, market.symbol_column))?
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let rows = collect(source, &symbols, config, market, today).await;
    storage.save_csv(&config.output_file, &HIGH_LOW_COLUMNS, &rows).await?;
    info!(rows = rows.len(), "Data saved to {}", config.output_file);
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotes::tests::FakeSource;
    use crate::storage_utils::tests::temp_storage;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, day).unwrap()
    }

    fn ohlc(date: NaiveDate, high: f64, low: f64, close: f64) -> DailyBar {
        DailyBar {
            date,
            high: Some(high),
            low: Some(low),
            close,
            volume: Some(1.0),
        }
    }

    #[test]
    fn summary_finds_extremes_and_dates() {
        let bars = vec![
            ohlc(d(1, 2), 110.0, 95.0, 100.0),
            ohlc(d(2, 5), 150.0, 120.0, 140.0),
            ohlc(d(3, 1), 150.0, 80.0, 90.0),
            ohlc(d(4, 1), 130.0, 100.0, 120.0),
        ];
        let row = summarize("TCS.NS", &bars, 60.0);
        assert_eq!(row.high, Some(150.0));
        assert_eq!(row.high_date, Some(d(2, 5)));
        assert_eq!(row.low, Some(80.0));
        assert_eq!(row.low_date, Some(d(3, 1)));
        assert_eq!(row.close, Some(120.0));
        assert_eq!(row.difference, Some(30.0));
        assert_eq!(row.status, Some("OK"));
    }

    #[test]
    fn far_below_high_waits() {
        let bars = vec![ohlc(d(1, 2), 200.0, 90.0, 100.0), ohlc(d(1, 3), 120.0, 95.0, 100.0)];
        assert_eq!(summarize("X", &bars, 60.0).status, Some("Wait"));
    }

    #[test]
    fn empty_history_only_names_the_stock() {
        let row = summarize("GONE.NS", &[], 60.0);
        assert_eq!(
            row,
            HighLowRow {
                stock: "GONE.NS".into(),
                ..HighLowRow::default()
            }
        );
    }

    #[tokio::test]
    async fn run_writes_one_row_per_instrument() {
        let storage = temp_storage("high-low").await;
        storage
            .write_atomic("nse_stocks.csv", b"Symbol\nTCS\nBROKEN\nGONE\n".to_vec())
            .await
            .unwrap();
        let source = FakeSource::default()
            .with("TCS.NS", vec![ohlc(d(5, 1), 110.0, 90.0, 100.0)])
            .failing("BROKEN.NS", "timeout");

        let config = HighLowConfig::default();
        let rows = run(&storage, &source, &config, &MarketConfig::default(), d(6, 1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].status, Some("OK"));
        assert_eq!(rows[1].status, None);

        let csv = String::from_utf8(storage.read(&config.output_file).await.unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "Stock,52 Week High,Date of High,52 Week Low,Date of Low,Current Close,Difference (High - Close),Status"
        );
        assert_eq!(lines[1], "TCS.NS,110.0,2024-05-01,90.0,2024-05-01,100.0,10.0,OK");
        assert_eq!(lines[3], "GONE.NS,,,,,,,");
    }
}
