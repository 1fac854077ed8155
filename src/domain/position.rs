use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Direction of an order or position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that flattens a position opened on this side
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

impl FromStr for Side {
    type Err = PositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(PositionError::UnknownSide(other.to_string())),
        }
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    /// Monitor watch bound elapsed
    Timeout,
    /// An opposite-side signal reversed the position
    OppositeSignal,
    /// Price feed kept failing past the tolerated count
    FeedFailure,
    Manual,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExitReason::TakeProfit => "take-profit",
            ExitReason::StopLoss => "stop-loss",
            ExitReason::Timeout => "timeout",
            ExitReason::OppositeSignal => "opposite-signal",
            ExitReason::FeedFailure => "feed-failure",
            ExitReason::Manual => "manual",
        };
        write!(f, "{}", label)
    }
}

/// Lifecycle state of the position controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    Idle,
    Opening,
    Open,
    Closing,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::Idle => write!(f, "idle"),
            ControllerState::Opening => write!(f, "opening"),
            ControllerState::Open => write!(f, "open"),
            ControllerState::Closing => write!(f, "closing"),
        }
    }
}

/// The single live position managed by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,
    pub entry_price: Decimal,
    /// Base-asset quantity held (buy) or sold (sell)
    pub size: Decimal,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq)]
pub enum PositionError {
    #[error("Unknown side: {0}")]
    UnknownSide(String),
    #[error("Invalid size: {0}")]
    InvalidSize(Decimal),
    #[error("Invalid entry price: {0}")]
    InvalidEntryPrice(Decimal),
    #[error("Invalid exit percentage: {0}")]
    InvalidPercentage(Decimal),
    #[error("Take-profit {take_profit} / stop-loss {stop_loss} are on the wrong side of entry {entry}")]
    InvalidTargets {
        entry: Decimal,
        take_profit: Decimal,
        stop_loss: Decimal,
    },
}

impl Position {
    /// Open a position with exit thresholds derived from percentages of the entry price.
    pub fn open(
        side: Side,
        entry_price: Decimal,
        size: Decimal,
        take_profit_pct: Decimal,
        stop_loss_pct: Decimal,
    ) -> Result<Self, PositionError> {
        // a sell target at or below zero could never trigger
        if take_profit_pct <= Decimal::ZERO || take_profit_pct >= Decimal::ONE_HUNDRED {
            return Err(PositionError::InvalidPercentage(take_profit_pct));
        }
        if stop_loss_pct <= Decimal::ZERO || stop_loss_pct >= Decimal::ONE_HUNDRED {
            return Err(PositionError::InvalidPercentage(stop_loss_pct));
        }

        let tp = take_profit_pct / Decimal::ONE_HUNDRED;
        let sl = stop_loss_pct / Decimal::ONE_HUNDRED;
        let (take_profit_price, stop_loss_price) = match side {
            Side::Buy => (
                entry_price * (Decimal::ONE + tp),
                entry_price * (Decimal::ONE - sl),
            ),
            Side::Sell => (
                entry_price * (Decimal::ONE - tp),
                entry_price * (Decimal::ONE + sl),
            ),
        };

        Self::with_targets(side, entry_price, size, take_profit_price, stop_loss_price)
    }

    /// Open a position with explicit exit thresholds.
    pub fn with_targets(
        side: Side,
        entry_price: Decimal,
        size: Decimal,
        take_profit_price: Decimal,
        stop_loss_price: Decimal,
    ) -> Result<Self, PositionError> {
        if size <= Decimal::ZERO {
            return Err(PositionError::InvalidSize(size));
        }
        if entry_price <= Decimal::ZERO {
            return Err(PositionError::InvalidEntryPrice(entry_price));
        }

        let ordered = match side {
            Side::Buy => stop_loss_price < entry_price && entry_price < take_profit_price,
            Side::Sell => take_profit_price < entry_price && entry_price < stop_loss_price,
        };
        if !ordered {
            return Err(PositionError::InvalidTargets {
                entry: entry_price,
                take_profit: take_profit_price,
                stop_loss: stop_loss_price,
            });
        }

        Ok(Self {
            side,
            entry_price,
            size,
            take_profit_price,
            stop_loss_price,
            opened_at: Utc::now(),
        })
    }

    /// Evaluate one price observation against the exit thresholds.
    pub fn exit_trigger(&self, price: Decimal) -> Option<ExitReason> {
        match self.side {
            Side::Buy if price >= self.take_profit_price => Some(ExitReason::TakeProfit),
            Side::Buy if price <= self.stop_loss_price => Some(ExitReason::StopLoss),
            Side::Sell if price <= self.take_profit_price => Some(ExitReason::TakeProfit),
            Side::Sell if price >= self.stop_loss_price => Some(ExitReason::StopLoss),
            _ => None,
        }
    }

    /// Unrealized PnL percentage at the given price, signed for the position side
    pub fn pnl_pct(&self, price: Decimal) -> Decimal {
        let change = (price - self.entry_price) / self.entry_price * Decimal::ONE_HUNDRED;
        match self.side {
            Side::Buy => change,
            Side::Sell => -change,
        }
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.opened_at
    }
}

/// A position after its closing order filled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub position: Position,
    pub reason: ExitReason,
    pub exit_price: Decimal,
    pub closed_size: Decimal,
    pub closed_at: DateTime<Utc>,
}

impl ClosedPosition {
    pub fn pnl_pct(&self) -> Decimal {
        self.position.pnl_pct(self.exit_price)
    }
}
