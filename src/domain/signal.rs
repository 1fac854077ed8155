use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use super::position::Side;

/// Inbound alert asking for a position on one side.
///
/// Ephemeral: parsed, verified, handed to the controller as a bare [`Side`], then dropped.
/// Alerting sources send `{"action": "buy", "token": "..."}`, so both the field names
/// used here and those aliases are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct Signal {
    #[serde(alias = "action")]
    pub side: Side,
    #[serde(default, alias = "token", alias = "passphrase")]
    pub auth_token: String,
    /// Requested amount. Balance-driven sizing ignores it.
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Malformed signal: {0}")]
    Malformed(String),
    #[error("Signal token rejected")]
    Unauthorized,
}

impl Signal {
    /// Parse a JSON alert payload
    pub fn parse(payload: &str) -> Result<Self, SignalError> {
        let signal: Signal =
            serde_json::from_str(payload).map_err(|e| SignalError::Malformed(e.to_string()))?;

        if let Some(amount) = signal.amount {
            if amount <= Decimal::ZERO {
                return Err(SignalError::Malformed(format!(
                    "amount must be positive, got {}",
                    amount
                )));
            }
        }

        Ok(signal)
    }

    /// Check the shared secret and release the side
    pub fn verify(&self, expected_token: &str) -> Result<Side, SignalError> {
        if expected_token.is_empty()
            || !constant_time_eq(self.auth_token.as_bytes(), expected_token.as_bytes())
        {
            return Err(SignalError::Unauthorized);
        }
        Ok(self.side)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_action_alias() {
        let signal = Signal::parse(r#"{"action": "buy", "token": "s3cret"}"#).unwrap();
        assert_eq!(signal.side, Side::Buy);
        assert_eq!(signal.auth_token, "s3cret");
        assert!(signal.amount.is_none());
    }

    #[test]
    fn test_parse_with_amount() {
        let signal =
            Signal::parse(r#"{"side": "sell", "auth_token": "s3cret", "amount": "12.5"}"#).unwrap();
        assert_eq!(signal.side, Side::Sell);
        assert_eq!(signal.amount, Some(dec!(12.5)));
    }

    #[test]
    fn test_parse_rejects_unknown_side() {
        let result = Signal::parse(r#"{"action": "hold", "token": "s3cret"}"#);
        assert!(matches!(result, Err(SignalError::Malformed(_))));
    }

    #[test]
    fn test_parse_rejects_missing_side_and_garbage() {
        assert!(matches!(
            Signal::parse(r#"{"token": "s3cret"}"#),
            Err(SignalError::Malformed(_))
        ));
        assert!(matches!(Signal::parse("buy now"), Err(SignalError::Malformed(_))));
    }

    #[test]
    fn test_parse_rejects_non_positive_amount() {
        let result = Signal::parse(r#"{"action": "buy", "token": "t", "amount": -1}"#);
        assert!(matches!(result, Err(SignalError::Malformed(_))));
    }

    #[test]
    fn test_verify_token() {
        let signal = Signal::parse(r#"{"action": "sell", "token": "s3cret"}"#).unwrap();
        assert_eq!(signal.verify("s3cret").unwrap(), Side::Sell);
        assert!(matches!(signal.verify("s3cres"), Err(SignalError::Unauthorized)));
        assert!(matches!(signal.verify("s3cret-longer"), Err(SignalError::Unauthorized)));
    }

    #[test]
    fn test_missing_token_never_matches_empty_secret() {
        let signal = Signal::parse(r#"{"action": "buy"}"#).unwrap();
        assert!(matches!(signal.verify(""), Err(SignalError::Unauthorized)));
    }
}
