//! Application Layer - Position lifecycle and its background tasks
//!
//! - `controller`: the single-position state machine
//! - `monitor`: per-position price watch
//! - `retry`: bounded retry around every venue call

pub mod controller;
pub mod monitor;
pub mod retry;

pub use controller::{
    BusyReason, CloseOutcome, ControllerConfig, ControllerError, ControllerSnapshot,
    PositionController, SignalOutcome,
};
pub use monitor::{MonitorConfig, MonitorHandle, MonitorVerdict, PriceMonitor};
pub use retry::{RetryError, RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
