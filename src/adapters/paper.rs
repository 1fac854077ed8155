//! Paper Trading Venue
//!
//! In-memory [`ExchangeAdapter`] for running the controller without a real
//! account. Prices follow a bounded random walk, market orders fill at the
//! current price with simulated slippage, and fills move the simulated balances.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use tracing::info;

use crate::domain::{IncrementRule, Side};
use crate::ports::{ExchangeAdapter, ExchangeError, OrderReceipt, QuantitySpec, Symbol, SymbolRules};

/// Paper venue settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    /// Starting quote currency balance
    pub quote_balance: Decimal,
    /// Starting base currency balance
    pub base_balance: Decimal,
    pub start_price: Decimal,
    /// Largest price move per poll, in basis points
    pub volatility_bps: u32,
    /// Simulated slippage in basis points (buys fill higher, sells lower)
    pub slippage_bps: u16,
    pub base_step: Decimal,
    pub base_min: Decimal,
    pub quote_step: Decimal,
    pub quote_min: Decimal,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            quote_balance: Decimal::from(1000),
            base_balance: Decimal::ZERO,
            start_price: Decimal::from(100),
            volatility_bps: 5,
            slippage_bps: 0,
            base_step: Decimal::new(1, 3),
            base_min: Decimal::new(1, 3),
            quote_step: Decimal::new(1, 2),
            quote_min: Decimal::ONE,
            seed: None,
        }
    }
}

struct PaperState {
    price: Decimal,
    balances: HashMap<String, Decimal>,
    rng: StdRng,
    order_count: u64,
}

/// Simulated single-symbol venue
pub struct PaperExchange {
    symbol: Symbol,
    rules: SymbolRules,
    volatility_bps: i64,
    slippage: Decimal,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(symbol: Symbol, config: &PaperConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut balances = HashMap::new();
        balances.insert(symbol.quote.clone(), config.quote_balance);
        balances.insert(symbol.base.clone(), config.base_balance);

        Self {
            rules: SymbolRules {
                base: IncrementRule::new(config.base_step, config.base_min),
                quote: IncrementRule::new(config.quote_step, config.quote_min),
            },
            symbol,
            volatility_bps: i64::from(config.volatility_bps),
            slippage: Decimal::new(i64::from(config.slippage_bps), 4),
            state: Mutex::new(PaperState {
                price: config.start_price,
                balances,
                rng,
                order_count: 0,
            }),
        }
    }

    /// Current simulated balance of a currency
    pub fn balance(&self, currency: &str) -> Decimal {
        self.lock().balances.get(currency).copied().unwrap_or_default()
    }

    pub fn last_price(&self) -> Decimal {
        self.lock().price
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_symbol(&self, symbol: &Symbol) -> Result<(), ExchangeError> {
        if *symbol != self.symbol {
            return Err(ExchangeError::UnknownSymbol(symbol.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    async fn get_price(&self, symbol: &Symbol) -> Result<Decimal, ExchangeError> {
        self.check_symbol(symbol)?;
        let mut state = self.lock();

        if self.volatility_bps > 0 {
            let step = state.rng.gen_range(-self.volatility_bps..=self.volatility_bps);
            let moved = (state.price * (Decimal::ONE + Decimal::new(step, 4))).round_dp(8);
            if moved > Decimal::ZERO {
                state.price = moved;
            }
        }
        Ok(state.price)
    }

    async fn get_available_balance(&self, currency: &str) -> Result<Decimal, ExchangeError> {
        Ok(self.balance(currency))
    }

    async fn get_increment_rules(&self, symbol: &Symbol) -> Result<SymbolRules, ExchangeError> {
        self.check_symbol(symbol)?;
        Ok(self.rules)
    }

    async fn place_market_order(
        &self,
        symbol: &Symbol,
        side: Side,
        quantity: QuantitySpec,
    ) -> Result<OrderReceipt, ExchangeError> {
        self.check_symbol(symbol)?;
        let mut state = self.lock();

        let fill_price = match side {
            Side::Buy => state.price * (Decimal::ONE + self.slippage),
            Side::Sell => state.price * (Decimal::ONE - self.slippage),
        };
        let (size, funds) = match quantity {
            QuantitySpec::Funds(funds) => (
                (funds / fill_price).round_dp_with_strategy(8, RoundingStrategy::ToZero),
                funds,
            ),
            QuantitySpec::Size(size) => (size, (size * fill_price).round_dp(8)),
        };
        if size <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!("empty order: {}", quantity)));
        }

        let (spend, spend_amount, receive, receive_amount) = match side {
            Side::Buy => (&symbol.quote, funds, &symbol.base, size),
            Side::Sell => (&symbol.base, size, &symbol.quote, funds),
        };
        let available = state.balances.get(spend).copied().unwrap_or_default();
        if available < spend_amount {
            return Err(ExchangeError::Rejected(format!(
                "insufficient {}: {} available, {} required",
                spend, available, spend_amount
            )));
        }
        state.balances.insert(spend.clone(), available - spend_amount);
        *state.balances.entry(receive.clone()).or_default() += receive_amount;
        state.order_count += 1;

        info!(
            "[PAPER] {} {} {} @ {} = {} {} (slippage: {}bps)",
            side,
            size,
            symbol.base,
            fill_price,
            funds,
            symbol.quote,
            self.slippage * Decimal::from(10_000)
        );

        Ok(OrderReceipt {
            order_id: format!("paper-{}", state.order_count),
            side,
            filled_size: size,
            filled_funds: funds,
            average_price: fill_price,
        })
    }
}
