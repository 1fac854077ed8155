//! Ports Layer - Trait definitions for external dependencies
//!
//! The venue is reached only through [`ExchangeAdapter`]; the controller and
//! price monitor never see a specific exchange's wire format.

pub mod exchange;
pub mod mocks;

pub use exchange::{
    ExchangeAdapter, ExchangeError, OrderReceipt, QuantitySpec, Symbol, SymbolRules,
};
pub use mocks::{PlacedOrder, ScriptedExchange};
