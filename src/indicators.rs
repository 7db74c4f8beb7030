use crate::error::IndicatorError;
use crate::series::SessionSeries;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const RSI_PERIOD: usize = 14;

/// Derived values for one session. `None` means "not applicable".
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorRow {
    pub date: NaiveDate,
    pub close: f64,
    pub gain: Option<f64>,
    pub loss: Option<f64>,
    pub average_gain: Option<f64>,
    pub average_loss: Option<f64>,
    /// `None` whenever the average loss is zero.
    pub rs: Option<f64>,
    pub rsi: Option<f64>,
}

/// RSI rows over a series using the standard 14 session window.
pub fn compute_indicator(series: &SessionSeries) -> Result<Vec<IndicatorRow>, IndicatorError> {
    compute_indicator_with_period(series, RSI_PERIOD)
}

/// RSI rows over a series, one per session, front-aligned.
///
/// The averages are seeded at index `period - 1` with the arithmetic mean of
/// the first `period` gains and losses (session 0 contributes nothing to the
/// sum but still counts in the divisor). After that Wilder's recurrence
/// `avg[i] = (avg[i-1] * (period - 1) + value[i]) / period` is applied.
///
/// A zero average loss saturates the RSI at 100 and leaves RS missing.
pub fn compute_indicator_with_period(
    series: &SessionSeries,
    period: usize,
) -> Result<Vec<IndicatorRow>, IndicatorError> {
    validate_period(period)?;

    let sessions = series.sessions();
    if sessions.len() < period {
        return Err(IndicatorError::InsufficientData {
            required: period,
            actual: sessions.len(),
        });
    }

    let period_f = period as f64;
    let mut rows = Vec::with_capacity(sessions.len());
    let mut sum_gain = 0.0;
    let mut sum_loss = 0.0;
    let mut averages: Option<(f64, f64)> = None;

    for (i, session) in sessions.iter().enumerate() {
        let (gain, loss) = match i.checked_sub(1).map(|p| session.close - sessions[p].close) {
            Some(delta) if delta > 0.0 => (Some(delta), Some(0.0)),
            Some(delta) if delta < 0.0 => (Some(0.0), Some(-delta)),
            Some(_) => (Some(0.0), Some(0.0)),
            None => (None, None),
        };

        let g = gain.unwrap_or(0.0);
        let l = loss.unwrap_or(0.0);

        if i + 1 < period {
            sum_gain += g;
            sum_loss += l;
        } else if let Some((prev_gain, prev_loss)) = averages {
            averages = Some((
                (prev_gain * (period_f - 1.0) + g) / period_f,
                (prev_loss * (period_f - 1.0) + l) / period_f,
            ));
        } else {
            sum_gain += g;
            sum_loss += l;
            averages = Some((sum_gain / period_f, sum_loss / period_f));
        }

        let (rs, rsi) = match averages {
            Some((avg_gain, avg_loss)) => relative_strength(avg_gain, avg_loss),
            None => (None, None),
        };

        rows.push(IndicatorRow {
            date: session.date,
            close: session.close,
            gain,
            loss,
            average_gain: averages.map(|(g, _)| g),
            average_loss: averages.map(|(_, l)| l),
            rs,
            rsi,
        });
    }

    Ok(rows)
}

/// A period below 2 leaves nothing to smooth.
pub fn validate_period(period: usize) -> Result<(), IndicatorError> {
    if period < 2 {
        return Err(IndicatorError::InvalidPeriod {
            period,
            reason: "period must be at least 2",
        });
    }
    Ok(())
}

fn relative_strength(avg_gain: f64, avg_loss: f64) -> (Option<f64>, Option<f64>) {
    if avg_loss == 0.0 {
        return (None, Some(100.0));
    }
    let rs = avg_gain / avg_loss;
    let rsi = (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0);
    (Some(rs), Some(rsi))
}

/// Classification of an instrument from its latest row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "Open the eyes")]
    OpenTheEyes,
    #[serde(rename = "Wait")]
    Wait,
}

impl Action {
    pub fn label(self) -> &'static str {
        match self {
            Action::OpenTheEyes => "Open the eyes",
            Action::Wait => "Wait",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Open interval on the RSI that marks an instrument as worth a look.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsiBand {
    pub lower: f64,
    pub upper: f64,
}

impl Default for RsiBand {
    fn default() -> Self {
        Self {
            lower: 29.0,
            upper: 35.0,
        }
    }
}

impl RsiBand {
    /// Compares the RSI rounded to 3 decimals against the band.
    pub fn classify(&self, row: &IndicatorRow) -> Action {
        match row.rsi.map(round3) {
            Some(rsi) if rsi > self.lower && rsi < self.upper => Action::OpenTheEyes,
            _ => Action::Wait,
        }
    }
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
