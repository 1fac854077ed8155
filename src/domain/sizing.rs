//! Order Sizing
//!
//! Turns a freshly fetched balance into an exchange-compliant order quantity.
//! A reserve fraction of the balance is always withheld for fees and slippage,
//! and the remainder is floored to the instrument increment so an order can
//! never ask for more than is actually available.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default share of balance withheld from sizing
pub const DEFAULT_RESERVE_FRACTION: Decimal = Decimal::from_parts(15, 0, 0, false, 2);

/// Minimum tradable step and minimum order size for one side of a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementRule {
    pub step_size: Decimal,
    pub min_size: Decimal,
}

impl IncrementRule {
    pub fn new(step_size: Decimal, min_size: Decimal) -> Self {
        Self { step_size, min_size }
    }

    /// Round down to the nearest multiple of the step
    pub fn floor(&self, value: Decimal) -> Decimal {
        if self.step_size <= Decimal::ZERO {
            return value;
        }
        (value / self.step_size).floor() * self.step_size
    }

    /// True if the quantity meets the venue minimum
    pub fn is_tradable(&self, quantity: Decimal) -> bool {
        quantity > Decimal::ZERO && quantity >= self.min_size
    }
}

/// Available amount of one currency at the moment of a sizing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub currency: String,
    pub available: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl BalanceSnapshot {
    pub fn new(currency: impl Into<String>, available: Decimal) -> Self {
        Self {
            currency: currency.into(),
            available,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SizingError {
    #[error("Insufficient {currency} balance: {available} available, sized {sized} below minimum {minimum}")]
    InsufficientBalance {
        currency: String,
        available: Decimal,
        sized: Decimal,
        minimum: Decimal,
    },
    #[error("Reserve fraction must be in [0, 1), got {0}")]
    InvalidReserve(Decimal),
}

/// Order that buys back a sold position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyBack {
    /// Base quantity, when the quote balance covers all of it
    Size(Decimal),
    /// All usable quote currency, when it does not
    Funds(Decimal),
}

/// Converts balances into order quantities
#[derive(Debug, Clone, Copy)]
pub struct OrderSizer {
    reserve_fraction: Decimal,
}

impl Default for OrderSizer {
    fn default() -> Self {
        Self {
            reserve_fraction: DEFAULT_RESERVE_FRACTION,
        }
    }
}

impl OrderSizer {
    pub fn new(reserve_fraction: Decimal) -> Result<Self, SizingError> {
        if reserve_fraction < Decimal::ZERO || reserve_fraction >= Decimal::ONE {
            return Err(SizingError::InvalidReserve(reserve_fraction));
        }
        Ok(Self { reserve_fraction })
    }

    pub fn reserve_fraction(&self) -> Decimal {
        self.reserve_fraction
    }

    /// Balance left after the reserve is withheld
    pub fn usable(&self, balance: Decimal) -> Decimal {
        if balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        balance * (Decimal::ONE - self.reserve_fraction)
    }

    /// Size an entry order from a balance snapshot.
    ///
    /// The snapshot is quote currency for buys (notional funds) and base currency
    /// for sells (quantity); the rule must be the matching side of the symbol rules.
    pub fn size(&self, balance: &BalanceSnapshot, rule: &IncrementRule) -> Result<Decimal, SizingError> {
        let sized = rule.floor(self.usable(balance.available));

        if !rule.is_tradable(sized) {
            return Err(SizingError::InsufficientBalance {
                currency: balance.currency.clone(),
                available: balance.available,
                sized,
                minimum: rule.min_size,
            });
        }

        tracing::debug!(
            "Sized {} {} from {} available (reserve {})",
            sized,
            balance.currency,
            balance.available,
            self.reserve_fraction
        );

        Ok(sized)
    }

    /// Size a closing order: the held quantity, capped at what the venue reports available.
    ///
    /// No reserve is withheld, since closing must flatten the whole position.
    pub fn closing_size(
        &self,
        held: Decimal,
        balance: &BalanceSnapshot,
        rule: &IncrementRule,
    ) -> Result<Decimal, SizingError> {
        let sized = rule.floor(held.min(balance.available));

        if !rule.is_tradable(sized) {
            return Err(SizingError::InsufficientBalance {
                currency: balance.currency.clone(),
                available: balance.available,
                sized,
                minimum: rule.min_size,
            });
        }

        Ok(sized)
    }

    /// Size the buy that closes a sell position from the current quote balance.
    ///
    /// The held quantity is bought back in full when `price` says the balance
    /// covers it. After an adverse move it no longer does, and the order spends
    /// the whole quote balance instead, floored to the quote increment.
    pub fn buy_back(
        &self,
        held: Decimal,
        price: Decimal,
        quote: &BalanceSnapshot,
        base_rule: &IncrementRule,
        quote_rule: &IncrementRule,
    ) -> Result<BuyBack, SizingError> {
        let size = base_rule.floor(held);
        if price > Decimal::ZERO && size * price <= quote.available {
            if !base_rule.is_tradable(size) {
                return Err(SizingError::InsufficientBalance {
                    currency: quote.currency.clone(),
                    available: quote.available,
                    sized: size,
                    minimum: base_rule.min_size,
                });
            }
            return Ok(BuyBack::Size(size));
        }

        let funds = quote_rule.floor(quote.available.max(Decimal::ZERO));
        if !quote_rule.is_tradable(funds) {
            return Err(SizingError::InsufficientBalance {
                currency: quote.currency.clone(),
                available: quote.available,
                sized: funds,
                minimum: quote_rule.min_size,
            });
        }

        tracing::debug!(
            "Buy-back of {} capped to {} {} at {}",
            held,
            funds,
            quote.currency,
            price
        );

        Ok(BuyBack::Funds(funds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usdt(amount: Decimal) -> BalanceSnapshot {
        BalanceSnapshot::new("USDT", amount)
    }

    #[test]
    fn test_size_floors_to_increment() {
        let sizer = OrderSizer::new(dec!(0.15)).unwrap();
        let rule = IncrementRule::new(dec!(0.001), dec!(0.001));

        let sized = sizer.size(&usdt(dec!(100)), &rule).unwrap();
        assert_eq!(sized, dec!(85.000));
        assert!(sized <= dec!(85.0));
    }

    #[test]
    fn test_size_never_rounds_up() {
        let sizer = OrderSizer::new(dec!(0.1)).unwrap();
        let rule = IncrementRule::new(dec!(0.01), dec!(0.01));

        // 11.1099 * 0.9 = 9.99891 -> nearest would be 10.00
        let sized = sizer.size(&usdt(dec!(11.1099)), &rule).unwrap();
        assert_eq!(sized, dec!(9.99));
    }

    #[test]
    fn test_size_below_minimum_is_insufficient() {
        let sizer = OrderSizer::default();
        let rule = IncrementRule::new(dec!(0.01), dec!(10));

        let result = sizer.size(&usdt(dec!(11)), &rule);
        assert_eq!(
            result,
            Err(SizingError::InsufficientBalance {
                currency: "USDT".to_string(),
                available: dec!(11),
                sized: dec!(9.35),
                minimum: dec!(10),
            })
        );
    }

    #[test]
    fn test_zero_balance_is_insufficient() {
        let sizer = OrderSizer::default();
        let rule = IncrementRule::new(dec!(0.001), dec!(0));

        assert!(matches!(
            sizer.size(&usdt(dec!(0)), &rule),
            Err(SizingError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_invalid_reserve() {
        assert_eq!(OrderSizer::new(dec!(1)).unwrap_err(), SizingError::InvalidReserve(dec!(1)));
        assert_eq!(OrderSizer::new(dec!(-0.1)).unwrap_err(), SizingError::InvalidReserve(dec!(-0.1)));
        assert!(OrderSizer::new(dec!(0)).is_ok());
    }

    #[test]
    fn test_default_reserve_is_fifteen_percent() {
        assert_eq!(OrderSizer::default().reserve_fraction(), dec!(0.15));
    }

    #[test]
    fn test_closing_size_caps_at_available() {
        let sizer = OrderSizer::default();
        let rule = IncrementRule::new(dec!(0.001), dec!(0.001));
        let base = BalanceSnapshot::new("BTC", dec!(0.84995));

        assert_eq!(sizer.closing_size(dec!(0.85), &base, &rule).unwrap(), dec!(0.849));
        assert_eq!(
            sizer.closing_size(dec!(0.5), &base, &rule).unwrap(),
            dec!(0.5)
        );
    }

    #[test]
    fn test_closing_size_with_nothing_held() {
        let sizer = OrderSizer::default();
        let rule = IncrementRule::new(dec!(0.001), dec!(0.001));
        let base = BalanceSnapshot::new("BTC", dec!(0));

        assert!(sizer.closing_size(dec!(0.85), &base, &rule).is_err());
    }

    #[test]
    fn test_buy_back_in_full_when_covered() {
        let sizer = OrderSizer::default();
        let base = IncrementRule::new(dec!(0.001), dec!(0.001));
        let quote = IncrementRule::new(dec!(0.01), dec!(1));

        let order = sizer
            .buy_back(dec!(42.5), dec!(0.998), &usdt(dec!(42.5)), &base, &quote)
            .unwrap();
        assert_eq!(order, BuyBack::Size(dec!(42.5)));
    }

    #[test]
    fn test_buy_back_after_adverse_move_spends_quote() {
        let sizer = OrderSizer::default();
        let base = IncrementRule::new(dec!(0.001), dec!(0.001));
        let quote = IncrementRule::new(dec!(0.01), dec!(1));

        // 42.5 * 1.006 = 42.755 > 42.509
        let order = sizer
            .buy_back(dec!(42.5), dec!(1.006), &usdt(dec!(42.509)), &base, &quote)
            .unwrap();
        assert_eq!(order, BuyBack::Funds(dec!(42.50)));
    }

    #[test]
    fn test_buy_back_without_quote_is_insufficient() {
        let sizer = OrderSizer::default();
        let base = IncrementRule::new(dec!(0.001), dec!(0.001));
        let quote = IncrementRule::new(dec!(0.01), dec!(1));

        let result = sizer.buy_back(dec!(42.5), dec!(1), &usdt(dec!(0.5)), &base, &quote);
        assert!(matches!(result, Err(SizingError::InsufficientBalance { .. })));
    }
}
