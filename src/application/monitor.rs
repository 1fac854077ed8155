//! Price Monitor
//!
//! Background watch over the single open position. Polls the venue price at a
//! fixed interval and reports the first exit condition it sees: take-profit,
//! stop-loss, the overall watch bound, or a price feed that keeps failing.
//! Cancellation is observed at every await point, so a monitor never outlives
//! the position it was started for.

use std::sync::{Arc, Weak};
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::controller::{CloseOutcome, PositionController};
use super::retry::RetryPolicy;
use crate::domain::{ExitReason, Position};
use crate::ports::{ExchangeAdapter, Symbol};

/// Monitor configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorConfig {
    /// Time between price polls
    pub poll_interval: Duration,
    /// Force a close after watching this long
    pub max_watch: Duration,
    /// Consecutive failed price fetches (each already retried) before forcing a close
    pub max_feed_failures: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_watch: Duration::from_secs(30 * 60),
            max_feed_failures: 3,
        }
    }
}

/// How a watch ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MonitorVerdict {
    /// An exit condition fired
    Exit {
        reason: ExitReason,
        price: Option<Decimal>,
    },
    /// The controller stopped the watch
    Cancelled,
}

/// A single watch over one position
pub struct PriceMonitor {
    id: u64,
    symbol: Symbol,
    position: Position,
    config: MonitorConfig,
    retry: RetryPolicy,
    exchange: Arc<dyn ExchangeAdapter>,
    cancel: CancellationToken,
}

impl PriceMonitor {
    pub fn new(
        id: u64,
        symbol: Symbol,
        position: Position,
        config: MonitorConfig,
        retry: RetryPolicy,
        exchange: Arc<dyn ExchangeAdapter>,
    ) -> Self {
        Self {
            id,
            symbol,
            position,
            config,
            retry,
            exchange,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Poll until an exit condition fires or the watch is cancelled
    pub async fn watch(&self) -> MonitorVerdict {
        let deadline = Instant::now() + self.config.max_watch;
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        tracing::info!(
            monitor = self.id,
            side = %self.position.side,
            take_profit = %self.position.take_profit_price,
            stop_loss = %self.position.stop_loss_price,
            "Price monitor started for {}",
            self.symbol
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return MonitorVerdict::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return self.timeout(),
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return MonitorVerdict::Cancelled,
                _ = tokio::time::sleep_until(deadline) => return self.timeout(),
                result = self.retry.run("get_price", || self.exchange.get_price(&self.symbol)) => result,
            };

            match fetched {
                Ok(price) => {
                    failures = 0;
                    if let Some(reason) = self.position.exit_trigger(price) {
                        tracing::info!(
                            monitor = self.id,
                            "{} triggered at {} (pnl {:.3}%)",
                            reason,
                            price,
                            self.position.pnl_pct(price)
                        );
                        return MonitorVerdict::Exit {
                            reason,
                            price: Some(price),
                        };
                    }
                    tracing::debug!(monitor = self.id, "{} @ {}", self.symbol, price);
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        monitor = self.id,
                        "Price feed failure {}/{}: {}",
                        failures,
                        self.config.max_feed_failures,
                        e
                    );
                    if failures >= self.config.max_feed_failures {
                        tracing::error!(monitor = self.id, "Price feed lost, forcing close");
                        return MonitorVerdict::Exit {
                            reason: ExitReason::FeedFailure,
                            price: None,
                        };
                    }
                }
            }
        }
    }

    fn timeout(&self) -> MonitorVerdict {
        tracing::warn!(
            monitor = self.id,
            "Watch bound of {:?} reached, forcing close",
            self.config.max_watch
        );
        MonitorVerdict::Exit {
            reason: ExitReason::Timeout,
            price: None,
        }
    }

    /// Run the watch on its own task and report an exit back to the controller.
    ///
    /// The controller is held weakly so the task never keeps it alive.
    pub fn spawn(self, controller: Weak<PositionController>) -> MonitorHandle {
        let id = self.id;
        let cancel = self.cancel.clone();

        let join = tokio::spawn(async move {
            let verdict = self.watch().await;
            let MonitorVerdict::Exit { reason, .. } = verdict else {
                tracing::debug!(monitor = id, "Price monitor cancelled");
                return;
            };

            let Some(controller) = controller.upgrade() else {
                tracing::warn!(monitor = id, "Controller dropped before {} close", reason);
                return;
            };

            match controller.close_for_monitor(id, reason).await {
                Ok(CloseOutcome::Closed(closed)) => tracing::info!(
                    monitor = id,
                    "Position closed on {} at {} (pnl {:.3}%)",
                    reason,
                    closed.exit_price,
                    closed.pnl_pct()
                ),
                Ok(CloseOutcome::NotOpen) => {
                    tracing::debug!(monitor = id, "Position already left open state")
                }
                Err(e) => tracing::error!(monitor = id, "Close on {} failed: {}", reason, e),
            }
        });

        MonitorHandle { id, cancel, join }
    }
}

/// Owned handle to a running monitor task
#[derive(Debug)]
pub struct MonitorHandle {
    id: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Ask the task to stop without waiting for it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the task and wait until it has exited
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            if e.is_panic() {
                tracing::error!(monitor = self.id, "Price monitor panicked: {}", e);
            }
        }
    }
}
