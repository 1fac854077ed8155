//! signal-trader - Single-position signal executor library
//!
//! Receives buy/sell alerts, sizes a market order from the available balance,
//! holds at most one position at a time, and closes it on take-profit,
//! stop-loss, an opposite alert, or the watch timeout.
//!
//! # Modules
//!
//! - `domain`: Core types (Position, Signal, OrderSizer)
//! - `ports`: Exchange abstraction (ExchangeAdapter) and a scripted test venue
//! - `application`: PositionController, PriceMonitor, RetryPolicy
//! - `adapters`: Signal intake, paper venue, CLI
//! - `config`: Configuration loading and validation

pub mod domain;
pub mod ports;
pub mod application;
pub mod adapters;
pub mod config;
