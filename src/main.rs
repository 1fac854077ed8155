//! signal-trader - Single-position signal executor
//!
//! Turns buy/sell alerts into balance-sized market orders and rides each
//! position to its take-profit or stop-loss.

use anyhow::Result;
use signal_trader::adapters::cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (secrets go here, not in the config file)
    dotenvy::dotenv().ok();

    let app = cli::init();
    cli::execute(app).await
}
