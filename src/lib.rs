//! Screens exchange-listed equities: the daily 52-week high/low report,
//! quote enrichment, a Wilder RSI scan and a trailing-year high/low summary.

pub mod analysis;
pub mod comfy_table;
pub mod error;
pub mod high_low;
pub mod indicators;
pub mod nse_archive;
pub mod quotes;
pub mod rsi_scanner;
pub mod series;
pub mod storage_utils;
pub mod week52_screener;
