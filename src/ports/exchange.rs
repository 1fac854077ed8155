use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::{BuyBack, IncrementRule, Side};

/// Exchange error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Venue unavailable: {0}")]
    Unavailable(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
}

impl ExchangeError {
    /// Transient failures are worth retrying; the rest will fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Network(_) | ExchangeError::RateLimited | ExchangeError::Unavailable(_)
        )
    }
}

/// A tradable pair, e.g. `BTC-USDT`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub base: String,
    pub quote: String,
}

impl Symbol {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            name: format!("{}-{}", base, quote),
            base: base.to_string(),
            quote: quote.to_string(),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Increment rules for both legs of a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRules {
    /// Quantity step and minimum order size in base units
    pub base: IncrementRule,
    /// Funds step and minimum funds in quote units
    pub quote: IncrementRule,
}

/// How a market order is sized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantitySpec {
    /// Spend this much quote currency
    Funds(Decimal),
    /// Trade this much base currency
    Size(Decimal),
}

impl fmt::Display for QuantitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantitySpec::Funds(v) => write!(f, "funds={}", v),
            QuantitySpec::Size(v) => write!(f, "size={}", v),
        }
    }
}

impl From<BuyBack> for QuantitySpec {
    fn from(order: BuyBack) -> Self {
        match order {
            BuyBack::Size(size) => QuantitySpec::Size(size),
            BuyBack::Funds(funds) => QuantitySpec::Funds(funds),
        }
    }
}

/// Fill report for a market order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub side: Side,
    /// Base quantity filled
    pub filled_size: Decimal,
    /// Quote amount exchanged, fees excluded
    pub filled_funds: Decimal,
    pub average_price: Decimal,
}

/// Venue capability set used by the controller and monitor.
///
/// Implementations own their wire format; callers only see these four calls.
/// A balance of zero for an unknown currency is a legitimate answer, not an error.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Last traded price for the symbol
    async fn get_price(&self, symbol: &Symbol) -> Result<Decimal, ExchangeError>;

    /// Spendable balance of a currency
    async fn get_available_balance(&self, currency: &str) -> Result<Decimal, ExchangeError>;

    /// Quantity and funds increments for the symbol
    async fn get_increment_rules(&self, symbol: &Symbol) -> Result<SymbolRules, ExchangeError>;

    /// Place a market order and wait for its fill
    async fn place_market_order(
        &self,
        symbol: &Symbol,
        side: Side,
        quantity: QuantitySpec,
    ) -> Result<OrderReceipt, ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ExchangeError::Network("reset".into()).is_transient());
        assert!(ExchangeError::RateLimited.is_transient());
        assert!(ExchangeError::Unavailable("maintenance".into()).is_transient());
        assert!(!ExchangeError::Rejected("size too small".into()).is_transient());
        assert!(!ExchangeError::UnknownSymbol("FOO-BAR".into()).is_transient());
    }

    #[test]
    fn test_symbol_name() {
        let symbol = Symbol::new("BTC", "USDT");
        assert_eq!(symbol.name, "BTC-USDT");
        assert_eq!(symbol.to_string(), "BTC-USDT");
    }
}
