//! Adapters Layer - External System Implementations
//!
//! - Intake: alert payload handling in front of the controller
//! - Paper: simulated venue implementing the exchange port
//! - CLI: Command-line interface handlers

pub mod cli;
pub mod intake;
pub mod paper;

pub use cli::CliApp;
pub use intake::{IntakeResponse, SignalIntake};
pub use paper::{PaperConfig, PaperExchange};
