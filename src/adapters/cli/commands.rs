//! CLI Command Handlers
//!
//! Implementation of all CLI commands for the signal executor.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde_json::json;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::adapters::intake::SignalIntake;
use crate::adapters::paper::PaperExchange;
use crate::application::{CloseOutcome, ControllerConfig, PositionController};
use crate::config::{load_config, Config};
use crate::domain::{BalanceSnapshot, ControllerState, ExitReason, IncrementRule, OrderSizer};

/// signal-trader - Single-position signal executor
#[derive(Parser, Debug)]
#[command(
    name = "signal-trader",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "Single-position signal executor",
    long_about = "signal-trader turns buy/sell alerts into balance-sized market orders, \
                  holds at most one position, and closes it on take-profit, stop-loss, \
                  an opposite alert, or the watch timeout."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Feed alerts from stdin to the executor
    Run(RunCmd),

    /// Compute an entry size offline
    Size(SizeCmd),

    /// Load and validate a configuration file
    CheckConfig(CheckConfigCmd),
}

/// Start the executor
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/paper.toml")]
    pub config: PathBuf,

    /// Run against the simulated venue (required; no live venue is built in)
    #[arg(short, long)]
    pub paper: bool,
}

/// Offline sizing
#[derive(Parser, Debug)]
pub struct SizeCmd {
    /// Available balance
    #[arg(value_name = "BALANCE")]
    pub balance: Decimal,

    /// Share of balance kept back
    #[arg(long, value_name = "FRACTION", default_value = "0.15")]
    pub reserve: Decimal,

    /// Increment the size is floored to
    #[arg(long, value_name = "STEP", default_value = "0.001")]
    pub step: Decimal,

    /// Minimum tradable size
    #[arg(long, value_name = "MIN", default_value = "0")]
    pub min: Decimal,
}

/// Validate configuration
#[derive(Parser, Debug)]
pub struct CheckConfigCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/paper.toml")]
    pub config: PathBuf,
}

/// Execute the CLI command
pub async fn execute(app: CliApp) -> Result<()> {
    match app.command {
        Command::Run(cmd) => {
            let config = load(&cmd.config)?;
            init_logging(app.verbose, app.debug, Some(&config.logging.level))?;
            run_command(cmd, config).await
        }
        Command::Size(cmd) => {
            init_logging(app.verbose, app.debug, None)?;
            size_command(cmd)
        }
        Command::CheckConfig(cmd) => {
            init_logging(app.verbose, app.debug, None)?;
            check_config_command(cmd)
        }
    }
}

/// Initialize logging system.
///
/// Logs go to stderr; stdout carries command output.
fn init_logging(verbose: bool, debug: bool, configured: Option<&str>) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        configured.unwrap_or("warn")
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

fn load(path: &Path) -> Result<Config> {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
    load_config(&expanded).with_context(|| format!("Failed to load config from {}", expanded))
}

/// Handle run command
async fn run_command(cmd: RunCmd, config: Config) -> Result<()> {
    if !cmd.paper {
        bail!(
            "No live venue adapter is configured.\n\n\
             Run against the simulated venue with:\n  \
             signal-trader run --paper --config {}",
            cmd.config.display()
        );
    }

    tracing::info!("Starting signal-trader on {}", config.market.symbol);
    tracing::warn!("PAPER TRADING MODE - no real orders");

    let exchange = Arc::new(PaperExchange::new(config.symbol(), &config.paper));
    let controller = PositionController::new(ControllerConfig::from(&config), exchange.clone())
        .context("Failed to create position controller")?;
    let intake = SignalIntake::new(Arc::clone(&controller), config.signal.get_auth_token());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => {
                    let handled = handle_line(&intake, &exchange, &config, line.trim());
                    let (result, interrupted) = finish_before_exit(handled, async {
                        let _ = tokio::signal::ctrl_c().await;
                    })
                    .await;
                    result?;
                    if interrupted {
                        break;
                    }
                }
                None => {
                    tracing::info!("Input closed, waiting for the position to settle");
                    wait_for_idle(&controller).await;
                    break;
                }
            }
        }
    }

    controller.shutdown().await;
    print_status(&controller, &exchange, &config)?;
    tracing::info!("signal-trader stopped");
    Ok(())
}

/// Drive an in-flight request to completion, noting whether `shutdown` fired meanwhile.
///
/// An open or close is never abandoned halfway, since that could leave a fill
/// on the venue the controller no longer tracks.
async fn finish_before_exit<T>(
    work: impl Future<Output = T>,
    shutdown: impl Future<Output = ()>,
) -> (T, bool) {
    tokio::pin!(work);
    tokio::select! {
        output = &mut work => (output, false),
        _ = shutdown => {
            tracing::info!("Shutdown signal received, finishing the current request");
            (work.await, true)
        }
    }
}

/// One stdin line: a JSON alert, or the bare words `status` / `close`
async fn handle_line(
    intake: &SignalIntake,
    exchange: &PaperExchange,
    config: &Config,
    line: &str,
) -> Result<()> {
    match line {
        "" => {}
        "status" => print_status(intake.controller(), exchange, config)?,
        "close" => {
            let body = match intake.controller().close_position(ExitReason::Manual).await {
                Ok(CloseOutcome::Closed(closed)) => json!({
                    "status": "closed",
                    "reason": closed.reason.to_string(),
                    "exit_price": closed.exit_price.to_string(),
                    "size": closed.closed_size.to_string(),
                    "pnl_pct": closed.pnl_pct().round_dp(4).to_string(),
                }),
                Ok(CloseOutcome::NotOpen) => json!({ "status": "not_open" }),
                Err(e) => json!({ "status": "error", "message": e.to_string() }),
            };
            println!("{}", body);
        }
        payload => {
            let response = intake.handle(payload).await;
            println!("{}", serde_json::to_string(&response)?);
        }
    }
    Ok(())
}

fn print_status(
    controller: &PositionController,
    exchange: &PaperExchange,
    config: &Config,
) -> Result<()> {
    let snapshot = controller.state();
    let mut balances = serde_json::Map::new();
    for currency in [&config.market.base_currency, &config.market.quote_currency] {
        balances.insert(currency.clone(), json!(exchange.balance(currency).to_string()));
    }
    let status = json!({
        "state": snapshot.state.to_string(),
        "position": snapshot.position,
        "last_price": exchange.last_price().to_string(),
        "balances": balances,
    });
    println!("{}", serde_json::to_string(&status)?);
    Ok(())
}

async fn wait_for_idle(controller: &PositionController) {
    loop {
        if controller.state().state == ControllerState::Idle {
            return;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }
    }
}

/// Handle size command
fn size_command(cmd: SizeCmd) -> Result<()> {
    let sizer = OrderSizer::new(cmd.reserve).context("Invalid reserve fraction")?;
    let rule = IncrementRule::new(cmd.step, cmd.min);

    println!("Balance:  {}", cmd.balance);
    println!("Reserve:  {}", cmd.reserve);
    println!("Usable:   {}", sizer.usable(cmd.balance));

    match sizer.size(&BalanceSnapshot::new("balance", cmd.balance), &rule) {
        Ok(size) => println!("Size:     {}", size),
        Err(e) => println!("Size:     untradable ({})", e),
    }

    Ok(())
}

/// Handle check-config command
fn check_config_command(cmd: CheckConfigCmd) -> Result<()> {
    let config = load(&cmd.config)?;

    println!("Config OK: {}", cmd.config.display());
    println!("  Symbol:        {}", config.market.symbol);
    println!("  Reserve:       {}", config.trading.reserve_fraction);
    println!(
        "  Targets:       +{}% / -{}%",
        config.trading.take_profit_pct, config.trading.stop_loss_pct
    );
    println!(
        "  Monitor:       every {}s, up to {}s, {} feed failures",
        config.monitor.poll_interval_secs,
        config.monitor.max_watch_secs,
        config.monitor.max_feed_failures
    );
    println!(
        "  Retry:         {} attempts, {}s apart",
        config.retry.max_attempts, config.retry.delay_secs
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_run() {
        let app = CliApp::parse_from(["signal-trader", "run", "--paper", "-c", "my.toml"]);
        match app.command {
            Command::Run(cmd) => {
                assert!(cmd.paper);
                assert_eq!(cmd.config, PathBuf::from("my.toml"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_size_defaults() {
        let app = CliApp::parse_from(["signal-trader", "size", "100", "--debug"]);
        assert!(app.debug);
        match app.command {
            Command::Size(cmd) => {
                assert_eq!(cmd.balance, dec!(100));
                assert_eq!(cmd.reserve, dec!(0.15));
                assert_eq!(cmd.step, dec!(0.001));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_request() {
        let work = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "done"
        };
        let shutdown = tokio::time::sleep(Duration::from_secs(1));

        let (output, interrupted) = finish_before_exit(work, shutdown).await;

        assert_eq!(output, "done");
        assert!(interrupted);
    }

    #[tokio::test]
    async fn test_request_without_shutdown() {
        let (output, interrupted) = finish_before_exit(async { 7 }, std::future::pending()).await;

        assert_eq!(output, 7);
        assert!(!interrupted);
    }

    #[test]
    fn test_parse_check_config() {
        let app = CliApp::parse_from(["signal-trader", "check-config"]);
        assert!(matches!(app.command, Command::CheckConfig(_)));
    }
}
