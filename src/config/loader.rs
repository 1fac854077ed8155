//! Configuration Loader
//!
//! Loads and validates the executor configuration from a TOML file.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::adapters::paper::PaperConfig;
use crate::application::{ControllerConfig, MonitorConfig, RetryPolicy};
use crate::ports::Symbol;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub market: MarketSection,
    pub trading: TradingSection,
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub retry: RetrySection,
    pub signal: SignalSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub paper: PaperConfig,
}

/// Traded pair
#[derive(Debug, Clone, Deserialize)]
pub struct MarketSection {
    /// Venue symbol, e.g. "BTC-USDT"
    pub symbol: String,
    pub base_currency: String,
    pub quote_currency: String,
}

/// Sizing and exit targets
#[derive(Debug, Clone, Deserialize)]
pub struct TradingSection {
    /// Share of balance kept back from every entry (0.15 = 15%)
    pub reserve_fraction: Decimal,
    /// Take-profit distance from entry in percent
    pub take_profit_pct: Decimal,
    /// Stop-loss distance from entry in percent
    pub stop_loss_pct: Decimal,
}

/// Price monitor section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub poll_interval_secs: u64,
    /// Force-close a position watched longer than this
    pub max_watch_secs: u64,
    pub max_feed_failures: u32,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            max_watch_secs: 30 * 60,
            max_feed_failures: 3,
        }
    }
}

/// Venue call retry section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_secs: 5,
        }
    }
}

/// Alert authentication section
#[derive(Debug, Clone, Deserialize)]
pub struct SignalSection {
    /// Shared secret expected in every alert (NEVER commit a real one)
    #[serde(default)]
    pub auth_token: String,
}

impl SignalSection {
    /// Get the shared secret with environment variable override
    /// Checks WEBHOOK_TOKEN env var first, falls back to config value
    pub fn get_auth_token(&self) -> String {
        std::env::var("WEBHOOK_TOKEN")
            .ok()
            .filter(|token| !token.is_empty())
            .unwrap_or_else(|| self.auth_token.clone())
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Market
        if self.market.base_currency.is_empty() || self.market.quote_currency.is_empty() {
            return Err(ConfigError::ValidationError(
                "base_currency and quote_currency cannot be empty".to_string(),
            ));
        }

        let expected = format!("{}-{}", self.market.base_currency, self.market.quote_currency);
        if self.market.symbol != expected {
            return Err(ConfigError::ValidationError(format!(
                "symbol must be {}, got {}",
                expected, self.market.symbol
            )));
        }

        // Trading
        if self.trading.reserve_fraction < Decimal::ZERO || self.trading.reserve_fraction >= Decimal::ONE {
            return Err(ConfigError::ValidationError(format!(
                "reserve_fraction must be in [0, 1), got {}",
                self.trading.reserve_fraction
            )));
        }

        let hundred = Decimal::ONE_HUNDRED;
        if self.trading.take_profit_pct <= Decimal::ZERO || self.trading.take_profit_pct >= hundred {
            return Err(ConfigError::ValidationError(format!(
                "take_profit_pct must be 0-100, got {}",
                self.trading.take_profit_pct
            )));
        }

        if self.trading.stop_loss_pct <= Decimal::ZERO || self.trading.stop_loss_pct >= hundred {
            return Err(ConfigError::ValidationError(format!(
                "stop_loss_pct must be 0-100, got {}",
                self.trading.stop_loss_pct
            )));
        }

        // Monitor
        if !(1..=5).contains(&self.monitor.poll_interval_secs) {
            return Err(ConfigError::ValidationError(format!(
                "poll_interval_secs must be 1-5, got {}",
                self.monitor.poll_interval_secs
            )));
        }

        if self.monitor.max_watch_secs < self.monitor.poll_interval_secs {
            return Err(ConfigError::ValidationError(format!(
                "max_watch_secs must be at least poll_interval_secs, got {}",
                self.monitor.max_watch_secs
            )));
        }

        if self.monitor.max_feed_failures == 0 {
            return Err(ConfigError::ValidationError(
                "max_feed_failures must be > 0".to_string(),
            ));
        }

        // Retry
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_attempts must be > 0".to_string(),
            ));
        }

        // Signal
        if self.signal.get_auth_token().is_empty() {
            return Err(ConfigError::ValidationError(
                "auth_token cannot be empty (set [signal].auth_token or WEBHOOK_TOKEN)".to_string(),
            ));
        }

        // Paper
        if self.paper.start_price <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(format!(
                "paper start_price must be > 0, got {}",
                self.paper.start_price
            )));
        }

        Ok(())
    }

    pub fn symbol(&self) -> Symbol {
        Symbol::new(&self.market.base_currency, &self.market.quote_currency)
    }
}

impl From<&Config> for ControllerConfig {
    fn from(config: &Config) -> Self {
        ControllerConfig {
            symbol: config.symbol(),
            reserve_fraction: config.trading.reserve_fraction,
            take_profit_pct: config.trading.take_profit_pct,
            stop_loss_pct: config.trading.stop_loss_pct,
            retry: RetryPolicy::new(
                config.retry.max_attempts,
                Duration::from_secs(config.retry.delay_secs),
            ),
            monitor: MonitorConfig {
                poll_interval: Duration::from_secs(config.monitor.poll_interval_secs),
                max_watch: Duration::from_secs(config.monitor.max_watch_secs),
                max_feed_failures: config.monitor.max_feed_failures,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> String {
        r#"
[market]
symbol = "BTC-USDT"
base_currency = "BTC"
quote_currency = "USDT"

[trading]
reserve_fraction = 0.15
take_profit_pct = 0.2
stop_loss_pct = 0.5

[monitor]
poll_interval_secs = 2
max_watch_secs = 1800
max_feed_failures = 3

[retry]
max_attempts = 3
delay_secs = 5

[signal]
auth_token = "s3cret"

[logging]
level = "info"
"#
        .to_string()
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = write_config(&create_valid_config());

        let config = load_config(file.path()).unwrap();

        assert_eq!(config.market.symbol, "BTC-USDT");
        assert_eq!(config.trading.reserve_fraction, dec!(0.15));
        assert_eq!(config.trading.take_profit_pct, dec!(0.2));
        assert_eq!(config.monitor.poll_interval_secs, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.toml");
        assert!(matches!(result.unwrap_err(), ConfigError::IoError(_)));
    }

    #[test]
    fn test_parse_error() {
        let file = write_config("[market\nsymbol = ");
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_optional_sections_default() {
        let minimal = r#"
[market]
symbol = "ETH-USDC"
base_currency = "ETH"
quote_currency = "USDC"

[trading]
reserve_fraction = 0.1
take_profit_pct = 1.0
stop_loss_pct = 2.0

[signal]
auth_token = "s3cret"
"#;
        let file = write_config(minimal);

        let config = load_config(file.path()).unwrap();

        assert_eq!(config.monitor.max_watch_secs, 1800);
        assert_eq!(config.retry.delay_secs, 5);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.paper.start_price, dec!(100));
    }

    #[test]
    fn test_invalid_reserve_fraction() {
        let invalid = create_valid_config().replace("reserve_fraction = 0.15", "reserve_fraction = 1.0");
        let file = write_config(&invalid);

        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_take_profit_of_hundred_rejected() {
        let invalid = create_valid_config().replace("take_profit_pct = 0.2", "take_profit_pct = 100");
        let file = write_config(&invalid);

        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_invalid_poll_interval() {
        let invalid = create_valid_config().replace("poll_interval_secs = 2", "poll_interval_secs = 10");
        let file = write_config(&invalid);

        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_symbol_must_match_currencies() {
        let invalid = create_valid_config().replace("symbol = \"BTC-USDT\"", "symbol = \"ETH-USDT\"");
        let file = write_config(&invalid);

        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let invalid = create_valid_config().replace("max_attempts = 3", "max_attempts = 0");
        let file = write_config(&invalid);

        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_config_to_controller_config() {
        let file = write_config(&create_valid_config());
        let config = load_config(file.path()).unwrap();

        let controller = ControllerConfig::from(&config);

        assert_eq!(controller.symbol, Symbol::new("BTC", "USDT"));
        assert_eq!(controller.stop_loss_pct, dec!(0.5));
        assert_eq!(controller.retry.max_attempts, 3);
        assert_eq!(controller.retry.delay, Duration::from_secs(5));
        assert_eq!(controller.monitor.poll_interval, Duration::from_secs(2));
        assert_eq!(controller.monitor.max_watch, Duration::from_secs(1800));
    }

    #[test]
    fn test_paper_section() {
        let with_paper = format!(
            "{}\n[paper]\nquote_balance = 250\nstart_price = 42.5\nseed = 9\n",
            create_valid_config()
        );
        let file = write_config(&with_paper);

        let config = load_config(file.path()).unwrap();

        assert_eq!(config.paper.quote_balance, dec!(250));
        assert_eq!(config.paper.start_price, dec!(42.5));
        assert_eq!(config.paper.seed, Some(9));
        assert_eq!(config.paper.base_step, dec!(0.001));
    }
}
