//! Per-instrument RSI scan.
//!
//! Each instrument is fetched, scored and classified on its own. A failing
//! instrument becomes an outcome in the report instead of stopping the scan.
//! Only an unusable period or a session-ordering contract violation aborts
//! the run.

use crate::error::{IndicatorError, ScanError};
use crate::indicators::{
    Action, IndicatorRow, RsiBand, compute_indicator_with_period, round3, validate_period,
};
use crate::quotes::{DateRange, MarketDataSource};
use crate::series::SessionSeries;
use crate::storage_utils::{AsyncStorageManager, CsvTable, MarketConfig, RsiConfig};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::{Serialize, Serializer};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum NoDataReason {
    EmptySeries,
    Insufficient { actual: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentOutcome {
    Scored { latest: IndicatorRow, action: Action },
    NoData(NoDataReason),
    FetchFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentReport {
    pub symbol: String,
    pub outcome: InstrumentOutcome,
}

/// Outcomes in instrument-list order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanReport {
    pub instruments: Vec<InstrumentReport>,
}

impl ScanReport {
    pub fn scored(&self) -> impl Iterator<Item = (&str, &IndicatorRow, Action)> {
        self.instruments.iter().filter_map(|r| match &r.outcome {
            InstrumentOutcome::Scored { latest, action } => Some((r.symbol.as_str(), latest, *action)),
            _ => None,
        })
    }

    pub fn no_data_count(&self) -> usize {
        self.instruments
            .iter()
            .filter(|r| matches!(r.outcome, InstrumentOutcome::NoData(_)))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.instruments
            .iter()
            .filter(|r| matches!(r.outcome, InstrumentOutcome::FetchFailed(_)))
            .count()
    }
}

/// Text form of a number in both the sink and the instrument table:
/// rounded to 3 decimals, no trailing `.0` on whole values.
pub fn format_number(value: f64) -> String {
    // adding 0.0 turns a rounded -0 into 0
    (round3(value) + 0.0).to_string()
}

fn serialize_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_number(*value))
}

fn serialize_opt_number<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serialize_number(v, serializer),
        None => serializer.serialize_none(),
    }
}

pub const SCAN_COLUMNS: [&str; 10] = [
    "Symbol",
    "Date",
    "Close",
    "Gain",
    "Loss",
    "Average Gain",
    "Average Loss",
    "RS",
    "RSI",
    "Action",
];

/// One row of the result sink.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ScanRow {
    #[serde(rename = "Symbol")]
    pub symbol: String,
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Close", serialize_with = "serialize_number")]
    pub close: f64,
    #[serde(rename = "Gain", serialize_with = "serialize_opt_number")]
    pub gain: Option<f64>,
    #[serde(rename = "Loss", serialize_with = "serialize_opt_number")]
    pub loss: Option<f64>,
    #[serde(rename = "Average Gain", serialize_with = "serialize_opt_number")]
    pub average_gain: Option<f64>,
    #[serde(rename = "Average Loss", serialize_with = "serialize_opt_number")]
    pub average_loss: Option<f64>,
    #[serde(rename = "RS", serialize_with = "serialize_opt_number")]
    pub rs: Option<f64>,
    #[serde(rename = "RSI", serialize_with = "serialize_opt_number")]
    pub rsi: Option<f64>,
    #[serde(rename = "Action")]
    pub action: Action,
}

impl ScanRow {
    pub fn new(symbol: &str, row: &IndicatorRow, action: Action) -> Self {
        Self {
            symbol: symbol.to_string(),
            date: row.date,
            close: round3(row.close),
            gain: row.gain.map(round3),
            loss: row.loss.map(round3),
            average_gain: row.average_gain.map(round3),
            average_loss: row.average_loss.map(round3),
            rs: row.rs.map(round3),
            rsi: row.rsi.map(round3),
            action,
        }
    }

    /// The indicator cells in `INDICATOR_COLUMNS` order, formatted as in the sink.
    fn indicator_cells(&self) -> [String; 8] {
        let opt = |v: Option<f64>| v.map(format_number).unwrap_or_default();
        [
            format_number(self.close),
            opt(self.gain),
            opt(self.loss),
            opt(self.average_gain),
            opt(self.average_loss),
            opt(self.rs),
            opt(self.rsi),
            self.action.to_string(),
        ]
    }
}

/// Scores a single instrument.
///
/// `Err` only for problems no other instrument would escape: unordered
/// sessions from the source, or a period that cannot seed the average.
pub async fn scan_instrument<S: MarketDataSource>(
    source: &S,
    symbol: &str,
    fetch_symbol: &str,
    range: DateRange,
    period: usize,
    band: &RsiBand,
) -> Result<InstrumentReport, ScanError> {
    let outcome = match source.daily_bars(fetch_symbol, range).await {
        Err(e) => {
            warn!(symbol, error = %e, "Error fetching data");
            InstrumentOutcome::FetchFailed(e.to_string())
        }
        Ok(bars) if bars.is_empty() => {
            info!(symbol = fetch_symbol, "No data found");
            InstrumentOutcome::NoData(NoDataReason::EmptySeries)
        }
        Ok(bars) => {
            let series = SessionSeries::from_bars(&bars)?;
            match compute_indicator_with_period(&series, period) {
                Ok(rows) => match rows.last() {
                    Some(latest) => InstrumentOutcome::Scored {
                        latest: *latest,
                        action: band.classify(latest),
                    },
                    None => InstrumentOutcome::NoData(NoDataReason::EmptySeries),
                },
                Err(IndicatorError::InsufficientData { actual, .. }) => {
                    info!(symbol, sessions = actual, "too few sessions for RSI");
                    InstrumentOutcome::NoData(NoDataReason::Insufficient { actual })
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    Ok(InstrumentReport {
        symbol: symbol.to_string(),
        outcome,
    })
}

/// Scans every symbol, at most `concurrency` in flight, keeping input order.
///
/// The period is checked before anything is fetched.
pub async fn scan<S: MarketDataSource>(
    source: &S,
    symbols: &[String],
    config: &RsiConfig,
    symbol_suffix: &str,
    concurrency: usize,
    today: NaiveDate,
) -> Result<ScanReport, ScanError> {
    if let Err(e) = validate_period(config.period) {
        error!(period = config.period, error = %e, "RSI period rejected, nothing fetched");
        return Err(e.into());
    }

    let range = DateRange::trailing(today, config.lookback_days);
    let band = config.band;

    let reports: Vec<Result<InstrumentReport, ScanError>> = stream::iter(symbols.iter())
        .map(|symbol| async move {
            let fetch_symbol = format!("{}{}", symbol, symbol_suffix);
            scan_instrument(source, symbol, &fetch_symbol, range, config.period, &band).await
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    Ok(ScanReport {
        instruments: reports.into_iter().collect::<Result<_, _>>()?,
    })
}

const INDICATOR_COLUMNS: [&str; 8] = [
    "Close",
    "Gain",
    "Loss",
    "Average Gain",
    "Average Loss",
    "RS",
    "RSI",
    "Action",
];

/// Writes the latest indicator values into the instrument table's rows.
///
/// Scored instruments get their values; instruments in the report that did not
/// score have their indicator cells cleared so an older run's values do not
/// linger. Returns the scored symbols that had no row in the table.
pub fn merge_into_table(table: &mut CsvTable, symbol_column: &str, report: &ScanReport) -> Result<Vec<String>> {
    let symbol_idx = table
        .column_index(symbol_column)
        .with_context(|| format!("instrument table has no '{}' column", symbol_column))?;
    let cols: Vec<usize> = INDICATOR_COLUMNS.iter().map(|c| table.ensure_column(c)).collect();

    let mut missing = Vec::new();
    for instrument in &report.instruments {
        let symbol = instrument.symbol.as_str();
        let scored = matches!(instrument.outcome, InstrumentOutcome::Scored { .. });
        let Some(row) = table
            .rows
            .iter()
            .position(|r| r.get(symbol_idx).map(|s| s.trim()) == Some(symbol))
        else {
            if scored {
                missing.push(symbol.to_string());
            }
            continue;
        };

        let values: [String; 8] = match &instrument.outcome {
            InstrumentOutcome::Scored { latest, action } => {
                ScanRow::new(symbol, latest, *action).indicator_cells()
            }
            _ => Default::default(),
        };
        for (&col, value) in cols.iter().zip(values) {
            table.set_cell(row, col, value);
        }
    }
    Ok(missing)
}

/// Loads the instrument list, scans it and persists the results.
///
/// 1. Read the symbols from the instrument table.
/// 2. Scan them (see [`scan`]).
/// 3. Rewrite the sink, header-only when nothing scored.
/// 4. Merge the latest values back into the instrument table.
pub async fn run<S: MarketDataSource>(
    storage: &AsyncStorageManager,
    source: &S,
    config: &RsiConfig,
    market: &MarketConfig,
    today: NaiveDate,
) -> Result<ScanReport> {
    let mut table = storage.load_table(&market.instruments_file).await?;
    let symbols: Vec<String> = table
        .column(&market.symbol_column)
        .with_context(|| format!("{} has no '{}' column", market.instruments_file, market.symbol_column))?
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    info!(instruments = symbols.len(), "starting RSI scan");

    let report = scan(
        source,
        &symbols,
        config,
        &market.symbol_suffix,
        market.max_concurrent_requests,
        today,
    )
    .await?;

    let rows: Vec<ScanRow> = report
        .scored()
        .map(|(symbol, latest, action)| ScanRow::new(symbol, latest, action))
        .collect();
    storage.save_csv(&config.output_file, &SCAN_COLUMNS, &rows).await?;

    if config.update_instruments {
        for symbol in merge_into_table(&mut table, &market.symbol_column, &report)? {
            warn!(%symbol, "Symbol not found in existing data");
        }
        storage.save_table(&market.instruments_file, &table).await?;
    }

    info!(
        scored = rows.len(),
        no_data = report.no_data_count(),
        failed = report.failed_count(),
        "RSI scan finished"
    );
    Ok(report)
}
