//! Screens the 52-week report against live quotes.
//!
//! EQ rows are enriched with the latest close and volume. Illiquid names are
//! dropped, and each survivor's distance from its adjusted 52-week high is
//! labelled.

use crate::indicators::round3;
use crate::nse_archive::Week52Record;
use crate::quotes::{MarketDataSource, Quote, latest_quote};
use crate::storage_utils::{AsyncStorageManager, Cell, ScreenerConfig};
use anyhow::Result;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

pub const NEED_TO_LOOK: &str = "NEED TO LOOK";
pub const WAIT: &str = "WAIT";

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ScreenedRow {
    #[serde(rename = "SYMBOL")]
    pub symbol: String,
    #[serde(rename = "SERIES")]
    pub series: String,
    #[serde(rename = "Adjusted 52_Week_High")]
    pub adjusted_high: Option<f64>,
    #[serde(rename = "52_Week_High_Date")]
    pub high_date: String,
    #[serde(rename = "Adjusted 52_Week_Low")]
    pub adjusted_low: Option<f64>,
    #[serde(rename = "52_Week_Low_Date")]
    pub low_date: String,
    #[serde(rename = "Close_Price")]
    pub close: f64,
    #[serde(rename = "Volume")]
    pub volume: f64,
    #[serde(rename = "Difference")]
    pub difference: Option<f64>,
    #[serde(rename = "Percentage_Difference")]
    pub percentage_difference: Option<f64>,
    #[serde(rename = "Status")]
    pub status: &'static str,
}

pub const STATUS_COLUMNS: [&str; 11] = [
    "SYMBOL",
    "SERIES",
    "Adjusted 52_Week_High",
    "52_Week_High_Date",
    "Adjusted 52_Week_Low",
    "52_Week_Low_Date",
    "Close_Price",
    "Volume",
    "Difference",
    "Percentage_Difference",
    "Status",
];

impl ScreenedRow {
    fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::Text(self.symbol.clone()),
            Cell::Text(self.series.clone()),
            self.adjusted_high.into(),
            Cell::Text(self.high_date.clone()),
            self.adjusted_low.into(),
            Cell::Text(self.low_date.clone()),
            Cell::Number(self.close),
            Cell::Number(self.volume),
            self.difference.into(),
            self.percentage_difference.into(),
            Cell::Text(self.status.to_string()),
        ]
    }
}

/// Applies the liquidity filter and status band to one enriched record.
///
/// Returns `None` when the quote is missing a volume or falls below the
/// thresholds.
pub fn screen_record(record: &Week52Record, quote: &Quote, config: &ScreenerConfig) -> Option<ScreenedRow> {
    let volume = quote.volume?;
    if !(quote.close > config.min_close && volume > config.min_volume) {
        return None;
    }

    let close = round3(quote.close);
    let (difference, percentage_difference) = match record.adjusted_high {
        Some(high) if high != 0.0 => {
            let diff = high - close;
            (Some(round3(diff)), Some(round3(diff / high * 100.0)))
        }
        _ => (None, None),
    };

    let status = match percentage_difference {
        Some(pct) if pct >= config.look_lower && pct <= config.look_upper => NEED_TO_LOOK,
        _ => WAIT,
    };

    Some(ScreenedRow {
        symbol: record.symbol.clone(),
        series: record.series.clone(),
        adjusted_high: record.adjusted_high,
        high_date: record.high_date.clone(),
        adjusted_low: record.adjusted_low,
        low_date: record.low_date.clone(),
        close,
        volume: round3(volume),
        difference,
        percentage_difference,
        status,
    })
}

/// Enriches and screens the report rows. Quote failures drop the row.
pub async fn screen<S: MarketDataSource>(
    source: &S,
    records: &[Week52Record],
    config: &ScreenerConfig,
    symbol_suffix: &str,
    concurrency: usize,
    today: NaiveDate,
) -> Vec<ScreenedRow> {
    let limit = config.row_limit.unwrap_or(records.len());
    let candidates: Vec<&Week52Record> = records
        .iter()
        .take(limit)
        .filter(|r| r.series == config.series)
        .collect();

    let quotes: Vec<Option<Quote>> = stream::iter(candidates.iter().enumerate())
        .map(|(idx, record)| async move {
            let symbol = format!("{}{}", record.symbol, symbol_suffix);
            info!(idx = idx + 1, %symbol, "fetching quote");
            match latest_quote(source, &symbol, today).await {
                Ok(quote) => quote,
                Err(e) => {
                    warn!(%symbol, error = %e, "quote fetch failed");
                    None
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    candidates
        .into_iter()
        .zip(quotes)
        .filter_map(|(record, quote)| screen_record(record, quote.as_ref()?, config))
        .collect()
}

/// Runs the screener over the stored report and writes both outputs.
pub async fn run<S: MarketDataSource>(
    storage: &AsyncStorageManager,
    source: &S,
    config: &ScreenerConfig,
    report_file: &str,
    symbol_suffix: &str,
    concurrency: usize,
    today: NaiveDate,
) -> Result<Vec<ScreenedRow>> {
    let records: Vec<Week52Record> = storage.load_csv(report_file).await?;
    let rows = screen(source, &records, config, symbol_suffix, concurrency, today).await;
    if rows.is_empty() {
        info!("no rows passed the screener");
    }

    // both outputs are rewritten every run, header-only when nothing passed
    storage.save_csv(&config.status_file, &STATUS_COLUMNS, &rows).await?;
    info!(rows = rows.len(), "Data saved to {}", config.status_file);

    let need_to_look: Vec<Vec<Cell>> = rows
        .iter()
        .filter(|r| r.status == NEED_TO_LOOK)
        .map(ScreenedRow::cells)
        .collect();
    storage
        .save_xlsx(&config.need_to_look_file, &STATUS_COLUMNS, &need_to_look)
        .await?;
    info!(rows = need_to_look.len(), "Data saved to {}", config.need_to_look_file);

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotes::tests::{FakeSource, bar};
    use crate::series::DailyBar;
    use crate::storage_utils::tests::temp_storage;

    fn record(symbol: &str, series: &str, high: Option<f64>) -> Week52Record {
        Week52Record {
            symbol: symbol.to_string(),
            series: series.to_string(),
            adjusted_high: high,
            high_date: "24-JAN-2024".to_string(),
            adjusted_low: Some(1.0),
            low_date: "28-MAR-2023".to_string(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 25).unwrap()
    }

    fn quote(close: f64, volume: f64) -> Quote {
        Quote {
            date: today(),
            close,
            volume: Some(volume),
        }
    }

    fn traded(close: f64, volume: f64) -> Vec<DailyBar> {
        vec![DailyBar {
            volume: Some(volume),
            ..bar(today(), close)
        }]
    }

    #[test]
    fn thresholds_are_strict() {
        let config = ScreenerConfig::default();
        let r = record("A", "EQ", Some(100.0));
        assert!(screen_record(&r, &quote(60.0, 100_000.0), &config).is_none());
        assert!(screen_record(&r, &quote(61.0, 60_000.0), &config).is_none());
        assert!(screen_record(&r, &quote(61.0, 60_001.0), &config).is_some());
    }

    #[test]
    fn close_above_high_inside_band_needs_a_look() {
        let config = ScreenerConfig::default();
        let row = screen_record(&record("A", "EQ", Some(100.0)), &quote(105.0, 1e6), &config).unwrap();
        assert_eq!(row.difference, Some(-5.0));
        assert_eq!(row.percentage_difference, Some(-5.0));
        assert_eq!(row.status, NEED_TO_LOOK);

        let row = screen_record(&record("A", "EQ", Some(100.0)), &quote(90.0, 1e6), &config).unwrap();
        assert_eq!(row.percentage_difference, Some(10.0));
        assert_eq!(row.status, WAIT);
    }

    #[test]
    fn band_edges_are_inclusive_and_values_rounded() {
        let config = ScreenerConfig::default();
        let row = screen_record(&record("A", "EQ", Some(100.0)), &quote(110.0, 1e6), &config).unwrap();
        assert_eq!(row.status, NEED_TO_LOOK);

        let row = screen_record(&record("A", "EQ", Some(300.0)), &quote(307.12345, 1e6), &config).unwrap();
        assert_eq!(row.close, 307.123);
        assert_eq!(row.difference, Some(-7.123));
        assert_eq!(row.percentage_difference, Some(-2.374));
        assert_eq!(row.status, NEED_TO_LOOK);
    }

    #[test]
    fn missing_high_leaves_differences_empty() {
        let row = screen_record(
            &record("A", "EQ", None),
            &quote(100.0, 1e6),
            &ScreenerConfig::default(),
        )
        .unwrap();
        assert_eq!(row.difference, None);
        assert_eq!(row.status, WAIT);
    }

    #[tokio::test]
    async fn only_eq_rows_with_quotes_survive() {
        let source = FakeSource::default()
            .with("GOOD.NS", traded(105.0, 500_000.0))
            .with("THIN.NS", traded(105.0, 10.0))
            .with("BOND.NS", traded(105.0, 500_000.0))
            .failing("DOWN.NS", "connection reset");
        let records = vec![
            record("GOOD", "EQ", Some(100.0)),
            record("THIN", "EQ", Some(100.0)),
            record("BOND", "BE", Some(100.0)),
            record("DOWN", "EQ", Some(100.0)),
            record("GONE", "EQ", Some(100.0)),
        ];

        let rows = screen(&source, &records, &ScreenerConfig::default(), ".NS", 2, today()).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "GOOD");
    }

    #[tokio::test]
    async fn row_limit_applies_before_series_filter() {
        let source = FakeSource::default()
            .with("A.NS", traded(105.0, 500_000.0))
            .with("B.NS", traded(105.0, 500_000.0));
        let records = vec![record("A", "EQ", Some(100.0)), record("B", "EQ", Some(100.0))];
        let config = ScreenerConfig {
            row_limit: Some(1),
            ..ScreenerConfig::default()
        };

        let rows = screen(&source, &records, &config, ".NS", 1, today()).await;
        assert_eq!(rows.iter().map(|r| r.symbol.as_str()).collect::<Vec<_>>(), vec!["A"]);
    }

    #[tokio::test]
    async fn run_writes_status_csv_and_workbook() {
        let storage = temp_storage("screener").await;
        let records = vec![record("GOOD", "EQ", Some(100.0)), record("MEH", "EQ", Some(200.0))];
        storage
            .save_csv("52.csv", &crate::nse_archive::COLUMNS, &records)
            .await
            .unwrap();

        let source = FakeSource::default()
            .with("GOOD.NS", traded(105.0, 500_000.0))
            .with("MEH.NS", traded(150.0, 500_000.0));
        let config = ScreenerConfig::default();

        let rows = run(&storage, &source, &config, "52.csv", ".NS", 1, today())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let csv = String::from_utf8(storage.read(&config.status_file).await.unwrap()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "SYMBOL,SERIES,Adjusted 52_Week_High,52_Week_High_Date,Adjusted 52_Week_Low,52_Week_Low_Date,Close_Price,Volume,Difference,Percentage_Difference,Status"
        );
        assert!(lines.next().unwrap().ends_with("NEED TO LOOK"));
        assert!(lines.next().unwrap().ends_with("WAIT"));
        assert!(storage.exists(&config.need_to_look_file));
    }

    #[tokio::test]
    async fn empty_run_clears_previous_outputs() {
        let storage = temp_storage("screener-rerun").await;
        let records = vec![record("GOOD", "EQ", Some(100.0))];
        storage
            .save_csv("52.csv", &crate::nse_archive::COLUMNS, &records)
            .await
            .unwrap();
        let config = ScreenerConfig::default();

        let source = FakeSource::default().with("GOOD.NS", traded(105.0, 500_000.0));
        let rows = run(&storage, &source, &config, "52.csv", ".NS", 1, today())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let first_book = storage.read(&config.need_to_look_file).await.unwrap();

        // the quote source is down on the next run
        let source = FakeSource::default().failing("GOOD.NS", "connection reset");
        let rows = run(&storage, &source, &config, "52.csv", ".NS", 1, today())
            .await
            .unwrap();
        assert!(rows.is_empty());

        let csv = String::from_utf8(storage.read(&config.status_file).await.unwrap()).unwrap();
        assert_eq!(csv.lines().count(), 1);
        assert!(csv.starts_with("SYMBOL,SERIES,"));
        let second_book = storage.read(&config.need_to_look_file).await.unwrap();
        assert_eq!(&second_book[..2], b"PK");
        assert_ne!(first_book, second_book);
    }
}
