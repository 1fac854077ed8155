//! Signal Intake
//!
//! Transport-agnostic front door for alerts. A transport (stdin loop, HTTP
//! handler) passes the raw payload in and writes the returned status and JSON
//! body back out.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::application::{PositionController, SignalOutcome};
use crate::domain::{Signal, SignalError};

/// Status code and JSON body for one handled payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntakeResponse {
    pub status: u16,
    pub body: Value,
}

impl IntakeResponse {
    fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct SignalIntake {
    controller: Arc<PositionController>,
    auth_token: String,
}

impl SignalIntake {
    pub fn new(controller: Arc<PositionController>, auth_token: impl Into<String>) -> Self {
        Self {
            controller,
            auth_token: auth_token.into(),
        }
    }

    pub fn controller(&self) -> &Arc<PositionController> {
        &self.controller
    }

    /// Parse, authenticate, and submit one alert payload
    pub async fn handle(&self, payload: &str) -> IntakeResponse {
        let side = match Signal::parse(payload).and_then(|s| s.verify(&self.auth_token)) {
            Ok(side) => side,
            Err(SignalError::Malformed(reason)) => {
                tracing::warn!("Dropping malformed signal: {}", reason);
                return IntakeResponse::new(
                    400,
                    json!({ "status": "error", "message": format!("malformed signal: {}", reason) }),
                );
            }
            Err(SignalError::Unauthorized) => {
                tracing::warn!("Dropping signal with bad token");
                return IntakeResponse::new(
                    403,
                    json!({ "status": "error", "message": "unauthorized" }),
                );
            }
        };

        tracing::info!("Received {} signal", side);

        match self.controller.submit_signal(side).await {
            Ok(SignalOutcome::Accepted(position)) => IntakeResponse::new(
                200,
                json!({
                    "status": "success",
                    "side": position.side,
                    "entry_price": position.entry_price.to_string(),
                    "size": position.size.to_string(),
                    "take_profit": position.take_profit_price.to_string(),
                    "stop_loss": position.stop_loss_price.to_string(),
                }),
            ),
            Ok(SignalOutcome::Busy(reason)) => IntakeResponse::new(
                200,
                json!({ "status": "busy", "message": reason.to_string() }),
            ),
            Err(e) => IntakeResponse::new(
                500,
                json!({ "status": "error", "message": e.to_string() }),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ControllerConfig;
    use crate::ports::{ExchangeError, ScriptedExchange};
    use rust_decimal_macros::dec;

    fn intake(venue: &ScriptedExchange) -> SignalIntake {
        let controller =
            PositionController::new(ControllerConfig::default(), Arc::new(venue.clone())).unwrap();
        SignalIntake::new(controller, "s3cret")
    }

    fn venue() -> ScriptedExchange {
        ScriptedExchange::new(dec!(100)).with_balance("USDT", dec!(1000))
    }

    #[tokio::test]
    async fn test_accepted_signal() {
        let venue = venue();
        let intake = intake(&venue);

        let response = intake.handle(r#"{"action": "buy", "token": "s3cret"}"#).await;

        assert_eq!(response.status, 200);
        assert_eq!(response.body["status"], "success");
        assert_eq!(response.body["side"], "buy");
        assert_eq!(venue.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_busy_signal_is_informational() {
        let venue = venue();
        let intake = intake(&venue);
        intake.handle(r#"{"side": "buy", "auth_token": "s3cret"}"#).await;

        let response = intake.handle(r#"{"side": "buy", "auth_token": "s3cret"}"#).await;

        assert_eq!(response.status, 200);
        assert_eq!(response.body["status"], "busy");
        assert_eq!(venue.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let venue = venue();
        let response = intake(&venue).handle(r#"{"action": "hold"}"#).await;

        assert_eq!(response.status, 400);
        assert!(venue.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bad_token_never_reaches_controller() {
        let venue = venue();
        let response = intake(&venue)
            .handle(r#"{"action": "buy", "token": "guess"}"#)
            .await;

        assert_eq!(response.status, 403);
        assert!(!response.is_success());
        assert!(venue.calls().is_empty());
    }

    #[tokio::test]
    async fn test_controller_error_maps_to_500() {
        let venue = venue();
        venue.fail_next("place_market_order", 1, ExchangeError::Rejected("halted".into()));

        let response = intake(&venue)
            .handle(r#"{"action": "buy", "token": "s3cret"}"#)
            .await;

        assert_eq!(response.status, 500);
        assert_eq!(response.body["status"], "error");
    }
}
