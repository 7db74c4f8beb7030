//! Download and cleanup of the exchange's daily 52-week high/low report.

use crate::storage_utils::{ArchiveConfig, AsyncStorageManager};
use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use tracing::info;

pub const COLUMNS: [&str; 6] = [
    "SYMBOL",
    "SERIES",
    "Adjusted 52_Week_High",
    "52_Week_High_Date",
    "Adjusted 52_Week_Low",
    "52_Week_Low_Date",
];

/// One row of the cleaned report.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Week52Record {
    #[serde(rename = "SYMBOL")]
    pub symbol: String,
    #[serde(rename = "SERIES")]
    pub series: String,
    #[serde(
        rename = "Adjusted 52_Week_High",
        deserialize_with = "deserialize_f64_lenient",
        serialize_with = "serialize_f64_blank"
    )]
    pub adjusted_high: Option<f64>,
    #[serde(rename = "52_Week_High_Date")]
    pub high_date: String,
    #[serde(
        rename = "Adjusted 52_Week_Low",
        deserialize_with = "deserialize_f64_lenient",
        serialize_with = "serialize_f64_blank"
    )]
    pub adjusted_low: Option<f64>,
    #[serde(rename = "52_Week_Low_Date")]
    pub low_date: String,
}

// --- Lenient numeric cells ("-", blanks, quoted numbers) ---

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        let v = v.trim();
        if v.is_empty() || v == "-" {
            return Ok(None);
        }
        Ok(v.replace(',', "").parse::<f64>().ok())
    }

    fn visit_bool<E>(self, _v: bool) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

pub(crate) fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}

fn serialize_f64_blank<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_f64(*v),
        None => serializer.serialize_str("-"),
    }
}

// --- Cleanup ---

/// Removes the quoted preamble (disclaimer and "Effective for" lines) that
/// precedes the header row.
pub fn strip_disclaimer(raw: &str) -> Result<String> {
    // anchored to line starts; the preamble lines are fully quoted
    let preamble = Regex::new(r#"(?m)^"(?:Disclaimer|Effective for)[^\n]*"\r?\n"#)?;
    Ok(preamble.replace_all(raw, "").into_owned())
}

/// Parses the cleaned report, renaming columns by position.
pub fn parse_records(cleaned: &str) -> Result<Vec<Week52Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(cleaned.as_bytes());

    let found = reader.headers()?.len();
    if found < COLUMNS.len() {
        bail!("expected {} columns in 52-week report, found {}", COLUMNS.len(), found);
    }
    reader.set_headers(csv::StringRecord::from(COLUMNS.to_vec()));

    let mut records = Vec::new();
    for (line, row) in reader.deserialize::<Week52Record>().enumerate() {
        let record = row.with_context(|| format!("52-week report row {}", line + 2))?;
        records.push(record);
    }
    Ok(records)
}

pub fn archive_url(template: &str, date: NaiveDate) -> String {
    template.replace("{date}", &date.format("%d%m%Y").to_string())
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        ),
    );
    headers
}

/// Downloads the report for `date`, cleans it and stores it as CSV.
pub async fn fetch_archive(
    storage: &AsyncStorageManager,
    config: &ArchiveConfig,
    date: NaiveDate,
) -> Result<Vec<Week52Record>> {
    let url = archive_url(&config.url_template, date);
    info!(%url, "downloading 52-week report");

    let client = reqwest::Client::builder()
        .default_headers(browser_headers())
        .build()?;
    let response = client.get(&url).send().await?;

    let status = response.status();
    if !status.is_success() {
        bail!("Failed to retrieve data. Status code: {}", status.as_u16());
    }

    let cleaned = strip_disclaimer(&response.text().await?)?;
    let records = parse_records(&cleaned)?;

    storage.save_csv(&config.output, &COLUMNS, &records).await?;
    info!(rows = records.len(), path = ?storage.path(&config.output), "52-week report saved");
    Ok(records)
}
