//! The screening pipeline: the exchange's 52-week report, the quote-enriched
//! screen over it, the RSI scan over the instrument list and the trailing-year
//! high/low summary, each runnable alone or all in order.

use crate::error::ScanError;
use crate::quotes::YahooFinance;
use crate::storage_utils::{AppConfig, AsyncStorageManager};
use crate::{comfy_table, high_low, nse_archive, rsi_scanner, week52_screener};
use anyhow::Result;
use chrono::{Local, NaiveDate};
use tracing::{error, info};

/// Everything a step needs: where files live, the loaded config, the quote
/// source and the calendar day the run is for.
pub struct Pipeline {
    pub storage: AsyncStorageManager,
    pub config: AppConfig,
    pub source: YahooFinance,
    pub today: NaiveDate,
}

impl Pipeline {
    /// **Constructor**
    /// Loads `config.json` (writing the defaults on first run) and builds the
    /// HTTP client once for every step.
    pub async fn new(storage: AsyncStorageManager) -> Result<Self> {
        let config = storage.load_config().await?;
        let source = YahooFinance::new(config.market.base_url.clone())?;
        Ok(Self {
            storage,
            config,
            source,
            today: Local::now().date_naive(),
        })
    }

    /// **Step 1: 52-week report**
    /// Downloads the report for the configured date (today by default) and
    /// stores the cleaned CSV.
    pub async fn fetch_archive(&self) -> Result<()> {
        let date = self.config.archive.date.unwrap_or(self.today);
        nse_archive::fetch_archive(&self.storage, &self.config.archive, date).await?;
        Ok(())
    }

    /// **Step 2: Screen**
    /// Enriches the stored report with quotes and writes the status CSV and the
    /// "need to look" workbook.
    pub async fn screen(&self) -> Result<()> {
        week52_screener::run(
            &self.storage,
            &self.source,
            &self.config.screener,
            &self.config.archive.output,
            &self.config.market.symbol_suffix,
            self.config.market.max_concurrent_requests,
            self.today,
        )
        .await?;
        Ok(())
    }

    /// **Step 3: RSI scan**
    /// Scores the instrument list and prints the report table.
    pub async fn rsi(&self) -> Result<()> {
        let report = rsi_scanner::run(
            &self.storage,
            &self.source,
            &self.config.rsi,
            &self.config.market,
            self.today,
        )
        .await?;
        comfy_table::print(&report);
        Ok(())
    }

    /// **Step 4: High/low**
    /// Trailing-year extremes per instrument.
    pub async fn high_low(&self) -> Result<()> {
        high_low::run(
            &self.storage,
            &self.source,
            &self.config.high_low,
            &self.config.market,
            self.today,
        )
        .await?;
        Ok(())
    }

    /// Runs every step in order:
    /// 1. Fetch the 52-week report.
    /// 2. Screen it, if a report is in storage.
    /// 3. RSI scan.
    /// 4. Trailing-year high/low.
    ///
    /// A failing step is logged and the next one still runs. A session-ordering
    /// violation from the quote source is returned instead, since every later
    /// step reads the same source.
    pub async fn run_all(&self) -> Result<()> {
        info!("--- Step 1: Fetching 52-week report ---");
        if let Err(e) = self.fetch_archive().await {
            error!(error = %e, "Error fetching 52-week report");
        }

        info!("--- Step 2: Screening 52-week highs ---");
        if self.storage.exists(&self.config.archive.output) {
            if let Err(e) = self.screen().await {
                error!(error = %e, "Error screening 52-week report");
            }
        } else {
            info!("no 52-week report in storage, skipping screener");
        }

        info!("--- Step 3: RSI scan ---");
        if let Err(e) = self.rsi().await {
            if matches!(e.downcast_ref::<ScanError>(), Some(ScanError::Series(_))) {
                return Err(e);
            }
            error!(error = %e, "Error running RSI scan");
        }

        info!("--- Step 4: Trailing-year high/low ---");
        if let Err(e) = self.high_low().await {
            error!(error = %e, "Error computing high/low");
        }

        Ok(())
    }
}
