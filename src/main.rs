use clap::{Parser, Subcommand};
use nse_screener::analysis::Pipeline;
use nse_screener::storage_utils::AsyncStorageManager;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nse-screener", version, about = "52-week and RSI screens over exchange-listed equities")]
struct Args {
    /// Storage directory (defaults to `storage/` next to the binary)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Download and clean the daily 52-week high/low report
    FetchArchive,
    /// Screen the stored report against live quotes
    Screen,
    /// RSI scan over the instrument list
    Rsi,
    /// Trailing-year high/low summary over the instrument list
    HighLow,
    /// Every step in order
    All,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let storage = match args.storage {
        Some(dir) => AsyncStorageManager::new(dir).await?,
        None => AsyncStorageManager::new_relative("storage").await?,
    };
    let pipeline = Pipeline::new(storage).await?;

    match args.command.unwrap_or(Command::All) {
        Command::FetchArchive => pipeline.fetch_archive().await,
        Command::Screen => pipeline.screen().await,
        Command::Rsi => pipeline.rsi().await,
        Command::HighLow => pipeline.high_low().await,
        Command::All => pipeline.run_all().await,
    }
}
