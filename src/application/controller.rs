//! Position Controller
//!
//! Owns the single live position and every transition of its lifecycle:
//!
//! ```text
//! Idle --signal, entry filled--> Open --opposite signal | monitor exit | manual--> Closing --> Idle
//! ```
//!
//! All mutable state sits behind one mutex that is only held for the
//! transitions themselves, never across venue calls. The transitional states
//! `Opening` and `Closing` are what give single-flight admission: while either
//! is set, new signals are turned away as busy and close requests are no-ops.
//! Every failure path settles back to `Idle`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use super::monitor::{MonitorConfig, MonitorHandle, PriceMonitor};
use super::retry::{RetryError, RetryPolicy};
use crate::domain::{
    BalanceSnapshot, ClosedPosition, ControllerState, ExitReason, OrderSizer, Position,
    PositionError, Side, SizingError, DEFAULT_RESERVE_FRACTION,
};
use crate::ports::{ExchangeAdapter, QuantitySpec, Symbol};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Sizing failed: {0}")]
    Sizing(#[from] SizingError),

    #[error("Exchange call failed: {0}")]
    Adapter(#[from] RetryError),

    #[error("Unusable fill: {0}")]
    InvalidFill(#[from] PositionError),
}

impl ControllerError {
    /// True when a venue call ran out of retries
    pub fn is_adapter_unavailable(&self) -> bool {
        matches!(self, ControllerError::Adapter(RetryError::AdapterUnavailable { .. }))
    }
}

/// Controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub symbol: Symbol,
    /// Share of balance withheld from every entry
    pub reserve_fraction: Decimal,
    /// Take-profit distance from entry, in percent
    pub take_profit_pct: Decimal,
    /// Stop-loss distance from entry, in percent
    pub stop_loss_pct: Decimal,
    pub retry: RetryPolicy,
    pub monitor: MonitorConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            symbol: Symbol::new("BTC", "USDT"),
            reserve_fraction: DEFAULT_RESERVE_FRACTION,
            take_profit_pct: Decimal::new(2, 1),
            stop_loss_pct: Decimal::new(5, 1),
            retry: RetryPolicy::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

/// Why a signal was turned away
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BusyReason {
    /// Another open or close is in flight
    InFlight(ControllerState),
    /// A position on the same side is already open
    AlreadyOpen(Side),
}

impl std::fmt::Display for BusyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusyReason::InFlight(state) => write!(f, "controller is {}", state),
            BusyReason::AlreadyOpen(side) => write!(f, "{} position already open", side),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SignalOutcome {
    Accepted(Position),
    Busy(BusyReason),
}

#[derive(Debug, Clone)]
pub enum CloseOutcome {
    Closed(ClosedPosition),
    NotOpen,
}

/// Read-only view of the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub state: ControllerState,
    pub position: Option<Position>,
}

struct Inner {
    state: ControllerState,
    position: Option<Position>,
    monitor: Option<MonitorHandle>,
}

/// Single-position lifecycle coordinator
pub struct PositionController {
    config: ControllerConfig,
    sizer: OrderSizer,
    exchange: Arc<dyn ExchangeAdapter>,
    inner: Mutex<Inner>,
    next_monitor_id: AtomicU64,
    this: Weak<PositionController>,
}

impl PositionController {
    pub fn new(
        config: ControllerConfig,
        exchange: Arc<dyn ExchangeAdapter>,
    ) -> Result<Arc<Self>, ControllerError> {
        let sizer = OrderSizer::new(config.reserve_fraction)?;

        Ok(Arc::new_cyclic(|this| Self {
            config,
            sizer,
            exchange,
            inner: Mutex::new(Inner {
                state: ControllerState::Idle,
                position: None,
                monitor: None,
            }),
            next_monitor_id: AtomicU64::new(0),
            this: this.clone(),
        }))
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Current state and position
    pub fn state(&self) -> ControllerSnapshot {
        let inner = self.lock();
        ControllerSnapshot {
            state: inner.state,
            position: inner.position.clone(),
        }
    }

    /// True while a price monitor task is attached to the position
    pub fn monitor_running(&self) -> bool {
        let inner = self.lock();
        inner.monitor.as_ref().is_some_and(|m| !m.is_finished())
    }

    /// Admit a signal.
    ///
    /// Busy while a transition is in flight or a same-side position is open.
    /// An opposite-side position is closed first, then the new one is opened,
    /// all under the same transition so nothing can interleave.
    pub async fn submit_signal(&self, side: Side) -> Result<SignalOutcome, ControllerError> {
        let previous = {
            let mut inner = self.lock();
            match inner.state {
                ControllerState::Opening | ControllerState::Closing => {
                    tracing::warn!("Rejecting {} signal: controller is {}", side, inner.state);
                    return Ok(SignalOutcome::Busy(BusyReason::InFlight(inner.state)));
                }
                ControllerState::Open => match inner.position.clone() {
                    Some(position) if position.side == side => {
                        tracing::warn!("Rejecting {} signal: position already open", side);
                        return Ok(SignalOutcome::Busy(BusyReason::AlreadyOpen(side)));
                    }
                    Some(position) => {
                        inner.state = ControllerState::Closing;
                        Some((position, inner.monitor.take()))
                    }
                    None => {
                        tracing::error!("Open state without a position, treating as idle");
                        inner.state = ControllerState::Opening;
                        None
                    }
                },
                ControllerState::Idle => {
                    inner.state = ControllerState::Opening;
                    None
                }
            }
        };
        let transition = Transition::begin(self);

        if let Some((position, monitor)) = previous {
            tracing::info!("Reversing {} position into {}", position.side, side);
            if let Some(monitor) = monitor {
                monitor.stop().await;
            }
            match self.execute_close(&position, ExitReason::OppositeSignal).await {
                Ok(closed) => {
                    log_closed(&closed);
                    transition.reopen();
                }
                Err(e) => {
                    tracing::error!("Reversal close failed, back to idle: {}", e);
                    transition.settle_idle();
                    return Err(e);
                }
            }
        }

        match self.execute_open(side).await {
            Ok(position) => {
                transition.settle_open(position.clone());
                Ok(SignalOutcome::Accepted(position))
            }
            Err(e) => {
                tracing::error!("{} entry failed, back to idle: {}", side, e);
                transition.settle_idle();
                Err(e)
            }
        }
    }

    /// Close the open position.
    ///
    /// `NotOpen` without touching the venue unless the state is `Open`, so a
    /// repeated or racing close never places a second order.
    pub async fn close_position(&self, reason: ExitReason) -> Result<CloseOutcome, ControllerError> {
        let Some((position, monitor)) = self.begin_close(None) else {
            tracing::info!("Close ({}) ignored: no open position", reason);
            return Ok(CloseOutcome::NotOpen);
        };
        let transition = Transition::begin(self);

        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
        self.finish_close(transition, &position, reason).await
    }

    /// Close requested by the monitor task itself.
    ///
    /// Stale monitors (not the one attached to the current position) get `NotOpen`.
    /// The handle is dropped rather than awaited, since the caller is that task.
    pub(crate) async fn close_for_monitor(
        &self,
        monitor_id: u64,
        reason: ExitReason,
    ) -> Result<CloseOutcome, ControllerError> {
        let Some((position, monitor)) = self.begin_close(Some(monitor_id)) else {
            return Ok(CloseOutcome::NotOpen);
        };
        let transition = Transition::begin(self);
        drop(monitor);

        self.finish_close(transition, &position, reason).await
    }

    /// Detach the monitor before process exit. The position stays open on the venue.
    pub async fn shutdown(&self) {
        let monitor = self.lock().monitor.take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
            tracing::warn!("Price monitor stopped with a position still open");
        }
    }

    fn begin_close(&self, monitor_id: Option<u64>) -> Option<(Position, Option<MonitorHandle>)> {
        let mut inner = self.lock();
        if inner.state != ControllerState::Open {
            return None;
        }
        if let Some(id) = monitor_id {
            if inner.monitor.as_ref().map(MonitorHandle::id) != Some(id) {
                return None;
            }
        }
        let position = inner.position.clone()?;
        inner.state = ControllerState::Closing;
        Some((position, inner.monitor.take()))
    }

    async fn finish_close(
        &self,
        transition: Transition<'_>,
        position: &Position,
        reason: ExitReason,
    ) -> Result<CloseOutcome, ControllerError> {
        let result = self.execute_close(position, reason).await;
        transition.settle_idle();

        match result {
            Ok(closed) => {
                log_closed(&closed);
                Ok(CloseOutcome::Closed(closed))
            }
            Err(e) => {
                tracing::error!(
                    "Closing {} position failed, controller released: {}",
                    position.side,
                    e
                );
                Err(e)
            }
        }
    }

    async fn execute_open(&self, side: Side) -> Result<Position, ControllerError> {
        let symbol = &self.config.symbol;
        let retry = self.config.retry;

        let rules = retry
            .run("get_increment_rules", || self.exchange.get_increment_rules(symbol))
            .await?;

        let (currency, rule) = match side {
            Side::Buy => (&symbol.quote, rules.quote),
            Side::Sell => (&symbol.base, rules.base),
        };
        let available = retry
            .run("get_available_balance", || self.exchange.get_available_balance(currency))
            .await?;
        let quantity = self.sizer.size(&BalanceSnapshot::new(currency.clone(), available), &rule)?;

        let spec = match side {
            Side::Buy => QuantitySpec::Funds(quantity),
            Side::Sell => QuantitySpec::Size(quantity),
        };
        tracing::info!("Placing {} entry on {} ({})", side, symbol, spec);

        let receipt = retry
            .run("place_market_order", || {
                self.exchange.place_market_order(symbol, side, spec)
            })
            .await?;

        // Nothing below may call the venue again: the fill is already on the books
        let entry_price = if receipt.average_price > Decimal::ZERO {
            receipt.average_price
        } else if receipt.filled_size > Decimal::ZERO {
            receipt.filled_funds / receipt.filled_size
        } else {
            Decimal::ZERO
        };

        let position = Position::open(
            side,
            entry_price,
            receipt.filled_size,
            self.config.take_profit_pct,
            self.config.stop_loss_pct,
        )
        .map_err(|e| {
            tracing::error!(
                order_id = %receipt.order_id,
                "Untracked {} fill of {} ({} {}) left on the venue: {}",
                side,
                receipt.filled_size,
                receipt.filled_funds,
                symbol.quote,
                e
            );
            e
        })?;

        tracing::info!(
            order_id = %receipt.order_id,
            "Opened {} {} @ {} (tp {}, sl {})",
            side,
            position.size,
            position.entry_price,
            position.take_profit_price,
            position.stop_loss_price
        );

        Ok(position)
    }

    async fn execute_close(
        &self,
        position: &Position,
        reason: ExitReason,
    ) -> Result<ClosedPosition, ControllerError> {
        let symbol = &self.config.symbol;
        let retry = self.config.retry;

        let rules = retry
            .run("get_increment_rules", || self.exchange.get_increment_rules(symbol))
            .await?;

        // Re-validate against fresh venue balances instead of trusting the fill record
        let quantity = match position.side {
            Side::Buy => {
                let available = retry
                    .run("get_available_balance", || {
                        self.exchange.get_available_balance(&symbol.base)
                    })
                    .await?;
                let balance = BalanceSnapshot::new(symbol.base.clone(), available);
                QuantitySpec::Size(self.sizer.closing_size(position.size, &balance, &rules.base)?)
            }
            Side::Sell => {
                let available = retry
                    .run("get_available_balance", || {
                        self.exchange.get_available_balance(&symbol.quote)
                    })
                    .await?;
                let price = retry.run("get_price", || self.exchange.get_price(symbol)).await?;
                let balance = BalanceSnapshot::new(symbol.quote.clone(), available);
                self.sizer
                    .buy_back(position.size, price, &balance, &rules.base, &rules.quote)?
                    .into()
            }
        };

        let side = position.side.opposite();
        tracing::info!(
            "Closing {} position on {}: {} {} {}",
            position.side,
            reason,
            side,
            quantity,
            symbol
        );

        let receipt = retry
            .run("place_market_order", || {
                self.exchange.place_market_order(symbol, side, quantity)
            })
            .await?;

        if receipt.filled_size < position.size {
            tracing::warn!(
                order_id = %receipt.order_id,
                "Closed {} of {} {}, remainder left on the venue",
                receipt.filled_size,
                position.size,
                symbol.base
            );
        }

        Ok(ClosedPosition {
            position: position.clone(),
            reason,
            exit_price: receipt.average_price,
            closed_size: receipt.filled_size,
            closed_at: Utc::now(),
        })
    }

    /// Attach a fresh monitor to a newly opened position. Caller holds the lock.
    fn spawn_monitor(&self, position: Position) -> MonitorHandle {
        let id = self.next_monitor_id.fetch_add(1, Ordering::Relaxed) + 1;
        PriceMonitor::new(
            id,
            self.config.symbol.clone(),
            position,
            self.config.monitor,
            self.config.retry,
            Arc::clone(&self.exchange),
        )
        .spawn(self.this.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PositionController {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(monitor) = inner.monitor.take() {
            monitor.cancel();
        }
    }
}

fn log_closed(closed: &ClosedPosition) {
    tracing::info!(
        "Closed {} {} @ {} on {} (entry {}, pnl {:.3}%)",
        closed.position.side,
        closed.closed_size,
        closed.exit_price,
        closed.reason,
        closed.position.entry_price,
        closed.pnl_pct()
    );
}

/// An in-flight `Opening`/`Closing` transition.
///
/// Settling it records the resulting state. If it is dropped unsettled (the
/// caller's future was cancelled, or a panic unwound through it) the controller
/// is reset to `Idle` so it can never be stranded mid-transition.
struct Transition<'a> {
    controller: &'a PositionController,
    settled: bool,
}

impl<'a> Transition<'a> {
    fn begin(controller: &'a PositionController) -> Self {
        Self {
            controller,
            settled: false,
        }
    }

    /// Reversal: the old position is gone, the new one is being opened
    fn reopen(&self) {
        let mut inner = self.controller.lock();
        inner.state = ControllerState::Opening;
        inner.position = None;
    }

    fn settle_idle(mut self) {
        self.settled = true;
        let mut inner = self.controller.lock();
        inner.state = ControllerState::Idle;
        inner.position = None;
    }

    fn settle_open(mut self, position: Position) {
        self.settled = true;
        let mut inner = self.controller.lock();
        // spawned under the lock so an immediate exit cannot race the install
        let monitor = self.controller.spawn_monitor(position.clone());
        inner.state = ControllerState::Open;
        inner.position = Some(position);
        inner.monitor = Some(monitor);
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut inner = self.controller.lock();
        tracing::warn!("Abandoned {} transition, resetting to idle", inner.state);
        inner.state = ControllerState::Idle;
        inner.position = None;
        if let Some(monitor) = inner.monitor.take() {
            monitor.cancel();
        }
    }
}
