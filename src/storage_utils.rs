use anyhow::Context;
use chrono::NaiveDate;
use rust_xlsxwriter::{Format, Workbook};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::indicators::{RSI_PERIOD, RsiBand};

// CONFIGURATION STRUCTS
// Every field has a default so a partial config.json still loads.

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ArchiveConfig {
    pub url_template: String, // "{date}" is replaced with ddmmyyyy
    pub date: Option<NaiveDate>,
    pub output: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            url_template: "https://nsearchives.nseindia.com/content/CM_52_wk_High_low_{date}.csv"
                .to_string(),
            date: None,
            output: "52.csv".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ScreenerConfig {
    pub series: String,
    pub row_limit: Option<usize>,
    pub min_close: f64,
    pub min_volume: f64,
    pub look_lower: f64, // inclusive percentage band
    pub look_upper: f64,
    pub status_file: String,
    pub need_to_look_file: String,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            series: "EQ".to_string(),
            row_limit: None,
            min_close: 60.0,
            min_volume: 60_000.0,
            look_lower: -10.0,
            look_upper: -2.0,
            status_file: "52weeks_status.csv".to_string(),
            need_to_look_file: "need_to_look_stocks.xlsx".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RsiConfig {
    pub period: usize,
    pub lookback_days: u64,
    pub band: RsiBand,
    pub output_file: String,
    pub update_instruments: bool,
}

impl Default for RsiConfig {
    fn default() -> Self {
        Self {
            period: RSI_PERIOD,
            lookback_days: 1120,
            band: RsiBand::default(),
            output_file: "rsi_scan.csv".to_string(),
            update_instruments: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HighLowConfig {
    pub max_difference: f64,
    pub output_file: String,
}

impl Default for HighLowConfig {
    fn default() -> Self {
        Self {
            max_difference: 60.0,
            output_file: "52_week_high_low_stocks.csv".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MarketConfig {
    pub base_url: String,
    pub symbol_suffix: String, // appended to exchange symbols, e.g. ".NS"
    pub max_concurrent_requests: usize,
    pub instruments_file: String,
    pub symbol_column: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            symbol_suffix: ".NS".to_string(),
            max_concurrent_requests: 1,
            instruments_file: "nse_stocks.csv".to_string(),
            symbol_column: "Symbol".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub archive: ArchiveConfig,
    pub screener: ScreenerConfig,
    pub rsi: RsiConfig,
    pub high_low: HighLowConfig,
    pub market: MarketConfig,
}

// UNTYPED TABLES

/// A CSV table whose columns are not known up front.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Returns the index of `name`, appending an empty column if needed.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.resize(self.headers.len(), String::new());
        }
        self.headers.len() - 1
    }

    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|r| r.get(idx).map(String::as_str).unwrap_or(""))
                .collect(),
        )
    }

    pub fn set_cell(&mut self, row: usize, col: usize, value: String) {
        if let Some(r) = self.rows.get_mut(row) {
            if r.len() <= col {
                r.resize(col + 1, String::new());
            }
            r[col] = value;
        }
    }
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path of the storage directory (e.g. ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// **Constructor: new_relative**
    /// Roots the storage directory next to the running binary, so `config.json`
    /// and the reports travel with the executable.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        // 1. Locate the running executable
        let exe_path = std::env::current_exe()?;

        // 2. Resolve its directory and append the relative path (e.g. "storage")
        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    /// **Constructor: new**
    /// Uses `base_dir` as given (the `--storage` flag). The directory is created
    /// up front so the save functions never have to check for it.
    pub async fn new<P: Into<PathBuf>>(base_dir: P) -> anyhow::Result<Self> {
        let base_dir = base_dir.into();
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir)
                .await
                .with_context(|| format!("creating storage dir {:?}", base_dir))?;
        }
        Ok(Self { base_dir })
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.base_dir.join(file_name)
    }

    pub fn exists(&self, file_name: &str) -> bool {
        self.path(file_name).exists()
    }

    /// **Atomic Write**
    /// Every save goes through here. A crash mid-write leaves the previous
    /// file intact.
    pub async fn write_atomic(&self, file_name: &str, bytes: Vec<u8>) -> anyhow::Result<()> {
        let final_path = self.path(file_name);
        let tmp_path = self.path(&format!("{}.tmp", file_name));

        // 1. Write the bytes to a `.tmp` sibling
        fs::write(&tmp_path, bytes)
            .await
            .with_context(|| format!("writing {:?}", tmp_path))?;

        // 2. Rename it over the final name
        fs::rename(&tmp_path, &final_path)
            .await
            .with_context(|| format!("renaming into {:?}", final_path))?;

        debug!(path = ?final_path, "saved");
        Ok(())
    }

    /// Reads a whole file into memory.
    pub async fn read(&self, file_name: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.path(file_name);
        fs::read(&path)
            .await
            .with_context(|| format!("reading {:?}", path))
    }

    // JSON

    /// **Generic JSON Save**
    /// Pretty-printed so `config.json` stays hand-editable.
    pub async fn save_json<T: Serialize>(&self, name: &str, data: &T) -> anyhow::Result<()> {
        let json_bytes = serde_json::to_vec_pretty(data)?;
        self.write_atomic(&format!("{}.json", name), json_bytes).await
    }

    /// **Generic JSON Load**
    /// Reads `{name}.json` into any `DeserializeOwned` type.
    pub async fn load_json<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let content = self.read(&format!("{}.json", name)).await?;
        let data = serde_json::from_slice(&content)
            .with_context(|| format!("parsing {}.json", name))?;
        Ok(data)
    }

    /// **Config Loader**
    /// Loads `config.json`, writing the defaults out first if it is missing.
    pub async fn load_config(&self) -> anyhow::Result<AppConfig> {
        if !self.exists("config.json") {
            let config = AppConfig::default();
            self.save_json("config", &config).await?;
            info!(path = ?self.path("config.json"), "wrote default config");
            return Ok(config);
        }
        self.load_json("config").await
    }

    // CSV

    /// **Generic CSV Save**
    /// Writes `headers` followed by one record per row. The file is rewritten
    /// even when `rows` is empty, so a run that produced nothing never leaves
    /// an older result behind.
    pub async fn save_csv<T: Serialize>(
        &self,
        file_name: &str,
        headers: &[&str],
        rows: &[T],
    ) -> anyhow::Result<()> {
        // 1. Header record written by hand; serde would only emit it with a first row
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(headers)?;

        // 2. Rows as plain records
        for row in rows {
            writer.serialize(row)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("flushing csv for {}: {}", file_name, e.error()))?;
        self.write_atomic(file_name, bytes).await
    }

    /// **Generic CSV Load**
    /// Header-keyed rows into any `DeserializeOwned` type.
    pub async fn load_csv<T: DeserializeOwned>(&self, file_name: &str) -> anyhow::Result<Vec<T>> {
        let content = self.read(file_name).await?;
        let mut reader = csv::Reader::from_reader(content.as_slice());
        let mut rows = Vec::new();
        for record in reader.deserialize::<T>() {
            rows.push(record.with_context(|| format!("parsing {}", file_name))?);
        }
        Ok(rows)
    }

    /// **Untyped CSV Load**
    /// For tables whose columns belong to someone else (the instrument list).
    pub async fn load_table(&self, file_name: &str) -> anyhow::Result<CsvTable> {
        let content = self.read(file_name).await?;
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(content.as_slice());

        let headers = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("parsing {}", file_name))?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(CsvTable { headers, rows })
    }

    /// **Untyped CSV Save**
    /// Writes the table back with every column it was loaded with.
    pub async fn save_table(&self, file_name: &str, table: &CsvTable) -> anyhow::Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(Vec::new());
        writer.write_record(&table.headers)?;
        for row in &table.rows {
            writer.write_record(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("flushing csv for {}: {}", file_name, e.error()))?;
        self.write_atomic(file_name, bytes).await
    }

    // XLSX

    /// **Workbook Save**
    /// Single sheet, bold header row. Numeric cells stay numeric so the sheet
    /// sorts and filters like the CSV does.
    pub async fn save_xlsx(
        &self,
        file_name: &str,
        headers: &[&str],
        rows: &[Vec<Cell>],
    ) -> anyhow::Result<()> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();
        let sheet = workbook.add_worksheet();

        for (col, header) in headers.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *header, &bold)?;
        }
        for (r, row) in rows.iter().enumerate() {
            let r = (r + 1) as u32;
            for (col, cell) in row.iter().enumerate() {
                let col = col as u16;
                match cell {
                    Cell::Text(s) => {
                        sheet.write_string(r, col, s.as_str())?;
                    }
                    Cell::Number(n) => {
                        sheet.write_number(r, col, *n)?;
                    }
                    Cell::Empty => {}
                }
            }
        }

        let bytes = workbook.save_to_buffer()?;
        self.write_atomic(file_name, bytes).await
    }
}

/// Spreadsheet cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        value.map(Cell::Number).unwrap_or(Cell::Empty)
    }
}
