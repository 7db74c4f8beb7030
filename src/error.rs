//! Error types for the library layer.
//!
//! The drivers and the pipeline work in `anyhow::Result`; these typed errors
//! are what the calculator, the series constructor and the market-data client
//! hand back so callers can tell "no data" apart from a broken contract.

use chrono::NaiveDate;
use thiserror::Error;

/// Failures of the indicator calculator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndicatorError {
    /// The series is shorter than the seed window.
    #[error("insufficient data: required {required} sessions, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("invalid period {period}: {reason}")]
    InvalidPeriod { period: usize, reason: &'static str },
}

/// Violations of the session-ordering contract.
///
/// The market-data source promises strictly ascending dates. Anything else is
/// a collaborator bug and callers abort instead of skipping the instrument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeriesError {
    #[error("sessions not strictly ascending at index {index}: {previous} then {current}")]
    NotAscending {
        index: usize,
        previous: NaiveDate,
        current: NaiveDate,
    },
}

/// Conditions that stop an RSI scan as a whole rather than one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// A source handed back unordered sessions.
    #[error(transparent)]
    Series(#[from] SeriesError),

    /// The configured period cannot seed an RSI for any instrument.
    #[error("invalid RSI configuration: {0}")]
    Config(#[from] IndicatorError),
}

/// Failures talking to the market-data source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by market-data source")]
    RateLimited,

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),
}
