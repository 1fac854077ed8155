//! Domain Layer - Core types for the signal executor
//!
//! Pure types and rules with no I/O. All venue interaction happens
//! through the ports layer.
//!
//! - `position`: sides, the live position, exit evaluation, controller states
//! - `signal`: inbound alert parsing and token verification
//! - `sizing`: reserve-and-floor order sizing against increment rules

pub mod position;
pub mod signal;
pub mod sizing;

pub use position::{ClosedPosition, ControllerState, ExitReason, Position, PositionError, Side};
pub use signal::{Signal, SignalError};
pub use sizing::{
    BalanceSnapshot, BuyBack, IncrementRule, OrderSizer, SizingError, DEFAULT_RESERVE_FRACTION,
};
