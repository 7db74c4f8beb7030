use crate::error::SeriesError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One trading day for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub date: NaiveDate,
    pub close: f64,
}

/// Full daily bar as returned by the market-data source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
    pub volume: Option<f64>,
}

/// Sessions ordered strictly by ascending date.
///
/// Holiday gaps are not reindexed. The ordering is checked once here so the
/// calculator can rely on it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSeries {
    sessions: Vec<Session>,
}

impl SessionSeries {
    pub fn new(sessions: Vec<Session>) -> Result<Self, SeriesError> {
        for (index, pair) in sessions.windows(2).enumerate() {
            if pair[1].date <= pair[0].date {
                return Err(SeriesError::NotAscending {
                    index: index + 1,
                    previous: pair[0].date,
                    current: pair[1].date,
                });
            }
        }
        Ok(Self { sessions })
    }

    pub fn from_bars(bars: &[DailyBar]) -> Result<Self, SeriesError> {
        Self::new(
            bars.iter()
                .map(|b| Session {
                    date: b.date,
                    close: b.close,
                })
                .collect(),
        )
    }

    /// Appends a session, keeping the ordering invariant.
    pub fn push(&mut self, session: Session) -> Result<(), SeriesError> {
        if let Some(last) = self.sessions.last() {
            if session.date <= last.date {
                return Err(SeriesError::NotAscending {
                    index: self.sessions.len(),
                    previous: last.date,
                    current: session.date,
                });
            }
        }
        self.sessions.push(session);
        Ok(())
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn last(&self) -> Option<&Session> {
        self.sessions.last()
    }
}
