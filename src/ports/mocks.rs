use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};

use super::exchange::{
    ExchangeAdapter, ExchangeError, OrderReceipt, QuantitySpec, Symbol, SymbolRules,
};
use crate::domain::{IncrementRule, Side};

/// An order the scripted venue accepted
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub side: Side,
    pub quantity: QuantitySpec,
    pub price: Decimal,
}

#[derive(Debug)]
struct ScriptState {
    price: Decimal,
    script: VecDeque<Decimal>,
    balances: HashMap<String, Decimal>,
    rules: SymbolRules,
    failures: HashMap<String, (u32, ExchangeError)>,
    orders: Vec<PlacedOrder>,
    calls: Vec<String>,
}

/// Scripted exchange that records calls and allows controlled responses.
///
/// Prices are served from a queue; once the queue drains the last price repeats.
/// Orders fill at the most recently served price and move balances.
#[derive(Debug, Clone)]
pub struct ScriptedExchange {
    state: Arc<Mutex<ScriptState>>,
    order_delay: Option<Duration>,
}

impl Default for ScriptedExchange {
    fn default() -> Self {
        Self::new(Decimal::ONE)
    }
}

impl ScriptedExchange {
    pub fn new(price: Decimal) -> Self {
        let rules = SymbolRules {
            base: IncrementRule::new(Decimal::new(1, 3), Decimal::new(1, 3)),
            quote: IncrementRule::new(Decimal::new(1, 2), Decimal::ONE),
        };
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                price,
                script: VecDeque::new(),
                balances: HashMap::new(),
                rules,
                failures: HashMap::new(),
                orders: Vec::new(),
                calls: Vec::new(),
            })),
            order_delay: None,
        }
    }

    /// Builder method to seed a balance
    pub fn with_balance(self, currency: &str, amount: Decimal) -> Self {
        self.lock().balances.insert(currency.to_string(), amount);
        self
    }

    /// Builder method to queue prices served by `get_price`
    pub fn with_prices(self, prices: impl IntoIterator<Item = Decimal>) -> Self {
        self.lock().script.extend(prices);
        self
    }

    pub fn with_rules(self, rules: SymbolRules) -> Self {
        self.lock().rules = rules;
        self
    }

    /// Builder method to make every order take a while to fill
    pub fn with_order_delay(mut self, delay: Duration) -> Self {
        self.order_delay = Some(delay);
        self
    }

    /// Fail the next `times` calls of an operation with `error`
    pub fn fail_next(&self, operation: &str, times: u32, error: ExchangeError) {
        self.lock().failures.insert(operation.to_string(), (times, error));
    }

    pub fn push_prices(&self, prices: impl IntoIterator<Item = Decimal>) {
        self.lock().script.extend(prices);
    }

    /// Replace the current price and drop any queued prices
    pub fn set_price(&self, price: Decimal) {
        let mut state = self.lock();
        state.script.clear();
        state.price = price;
    }

    pub fn balance(&self, currency: &str) -> Decimal {
        self.lock().balances.get(currency).copied().unwrap_or_default()
    }

    /// Get all accepted orders
    pub fn orders(&self) -> Vec<PlacedOrder> {
        self.lock().orders.clone()
    }

    /// Get all recorded calls, including failed ones
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.as_str() == operation).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, operation: &str) -> Result<(), ExchangeError> {
        let mut state = self.lock();
        state.calls.push(operation.to_string());
        if let Some((remaining, error)) = state.failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeAdapter for ScriptedExchange {
    async fn get_price(&self, _symbol: &Symbol) -> Result<Decimal, ExchangeError> {
        self.record("get_price")?;
        let mut state = self.lock();
        if let Some(next) = state.script.pop_front() {
            state.price = next;
        }
        Ok(state.price)
    }

    async fn get_available_balance(&self, currency: &str) -> Result<Decimal, ExchangeError> {
        self.record("get_available_balance")?;
        Ok(self.balance(currency))
    }

    async fn get_increment_rules(&self, _symbol: &Symbol) -> Result<SymbolRules, ExchangeError> {
        self.record("get_increment_rules")?;
        Ok(self.lock().rules)
    }

    async fn place_market_order(
        &self,
        symbol: &Symbol,
        side: Side,
        quantity: QuantitySpec,
    ) -> Result<OrderReceipt, ExchangeError> {
        if let Some(delay) = self.order_delay {
            tokio::time::sleep(delay).await;
        }
        self.record("place_market_order")?;

        let mut state = self.lock();
        let price = state.price;
        let (size, funds) = match quantity {
            QuantitySpec::Funds(funds) => (
                (funds / price).round_dp_with_strategy(8, RoundingStrategy::ToZero),
                funds,
            ),
            QuantitySpec::Size(size) => (size, size * price),
        };

        let (spend, spend_amount, receive, receive_amount) = match side {
            Side::Buy => (&symbol.quote, funds, &symbol.base, size),
            Side::Sell => (&symbol.base, size, &symbol.quote, funds),
        };
        let available = state.balances.get(spend).copied().unwrap_or_default();
        if available < spend_amount {
            return Err(ExchangeError::Rejected(format!(
                "insufficient {}: {} < {}",
                spend, available, spend_amount
            )));
        }
        state.balances.insert(spend.clone(), available - spend_amount);
        *state.balances.entry(receive.clone()).or_default() += receive_amount;

        state.orders.push(PlacedOrder { side, quantity, price });
        let order_id = format!("scripted-{}", state.orders.len());

        Ok(OrderReceipt {
            order_id,
            side,
            filled_size: size,
            filled_funds: funds,
            average_price: price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_prices_drain_then_repeat() {
        let venue = ScriptedExchange::new(dec!(1)).with_prices([dec!(2), dec!(3)]);
        let symbol = Symbol::new("BTC", "USDT");

        assert_eq!(venue.get_price(&symbol).await.unwrap(), dec!(2));
        assert_eq!(venue.get_price(&symbol).await.unwrap(), dec!(3));
        assert_eq!(venue.get_price(&symbol).await.unwrap(), dec!(3));
        assert_eq!(venue.call_count("get_price"), 3);
    }

    #[tokio::test]
    async fn test_scripted_failures_run_out() {
        let venue = ScriptedExchange::default();
        venue.fail_next("get_available_balance", 2, ExchangeError::RateLimited);

        assert!(venue.get_available_balance("USDT").await.is_err());
        assert!(venue.get_available_balance("USDT").await.is_err());
        assert_eq!(venue.get_available_balance("USDT").await.unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn test_orders_move_balances() {
        let venue = ScriptedExchange::new(dec!(2)).with_balance("USDT", dec!(100));
        let symbol = Symbol::new("BTC", "USDT");

        let receipt = venue
            .place_market_order(&symbol, Side::Buy, QuantitySpec::Funds(dec!(50)))
            .await
            .unwrap();
        assert_eq!(receipt.filled_size, dec!(25));
        assert_eq!(venue.balance("USDT"), dec!(50));
        assert_eq!(venue.balance("BTC"), dec!(25));

        let rejected = venue
            .place_market_order(&symbol, Side::Sell, QuantitySpec::Size(dec!(30)))
            .await;
        assert!(matches!(rejected, Err(ExchangeError::Rejected(_))));
        assert_eq!(venue.orders().len(), 1);
    }
}
