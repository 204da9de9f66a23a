//! Application configuration module
//! Handles environment variable loading, configuration validation, and
//! the operational parameters of the payment engine.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::payments::types::{BankDetails, PaymentMode};

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub payments: PaymentsConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Payment-engine parameters.
///
/// `max_unique_add` and `reservation_ttl` are operational knobs that must be
/// tuned to the expected concurrent-intent volume per channel; they are
/// deliberately configuration, not constants.
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    /// Which payment mode is currently offered to users.
    pub active_mode: PaymentMode,
    /// Upper bound for the unique-amount perturbation, in minor units.
    pub max_unique_add: i64,
    /// How long a `(channel, final_amount)` reservation is held. Set once at
    /// allocation time and never extended.
    pub reservation_ttl: Duration,
    /// Reconciliation worker wake-up interval.
    pub sweep_interval: Duration,
    /// Minimum length of an admin rejection reason.
    pub min_reject_reason_len: usize,
    /// Bank-transfer destination shown on MANUAL instructions.
    pub bank_details: BankDetails,
    /// Base URL of the payment bot; deep links append `?start=pay_<id>`.
    pub bot_url: String,
    /// Shared bearer token for admin/internal endpoints.
    pub admin_api_token: Option<String>,
    /// Shared secret for gateway webhook HMAC verification.
    pub webhook_secret: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            payments: PaymentsConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.payments.validate()?;
        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }
        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }
        Ok(())
    }
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            active_mode: PaymentMode::Manual,
            max_unique_add: 999,
            reservation_ttl: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(30),
            min_reject_reason_len: 10,
            bank_details: BankDetails {
                card_number: "0000 0000 0000 0000".to_string(),
                holder_name: "PLATFORM LLC".to_string(),
                bank_name: "Example Bank".to_string(),
            },
            bot_url: "https://t.me/paybot".to_string(),
            admin_api_token: None,
            webhook_secret: None,
        }
    }
}

impl PaymentsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let active_mode = match env::var("ACTIVE_PAYMENT_MODE") {
            Ok(raw) => PaymentMode::from_str(&raw)
                .map_err(|_| ConfigError::InvalidValue("ACTIVE_PAYMENT_MODE".to_string()))?,
            Err(_) => defaults.active_mode,
        };

        Ok(PaymentsConfig {
            active_mode,
            max_unique_add: env::var("PAYMENT_UNIQUE_ADD_MAX")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_unique_add),
            reservation_ttl: Duration::from_secs(
                env::var("PAYMENT_RESERVATION_TTL_SECONDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.reservation_ttl.as_secs()),
            ),
            sweep_interval: Duration::from_secs(
                env::var("RECONCILIATION_SWEEP_INTERVAL_SECONDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.sweep_interval.as_secs()),
            ),
            min_reject_reason_len: env::var("PAYMENT_MIN_REJECT_REASON_LEN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_reject_reason_len),
            bank_details: BankDetails {
                card_number: env::var("MANUAL_CARD_NUMBER")
                    .unwrap_or(defaults.bank_details.card_number),
                holder_name: env::var("MANUAL_CARD_HOLDER")
                    .unwrap_or(defaults.bank_details.holder_name),
                bank_name: env::var("MANUAL_BANK_NAME").unwrap_or(defaults.bank_details.bank_name),
            },
            bot_url: env::var("PAYMENT_BOT_URL").unwrap_or(defaults.bot_url),
            admin_api_token: env::var("ADMIN_API_TOKEN").ok().filter(|t| !t.is_empty()),
            webhook_secret: env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_unique_add < 1 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_UNIQUE_ADD_MAX must be at least 1".to_string(),
            ));
        }
        if self.reservation_ttl.as_secs() == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_RESERVATION_TTL_SECONDS cannot be 0".to_string(),
            ));
        }
        if self.sweep_interval.as_secs() == 0 {
            return Err(ConfigError::InvalidValue(
                "RECONCILIATION_SWEEP_INTERVAL_SECONDS cannot be 0".to_string(),
            ));
        }
        if self.min_reject_reason_len == 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_MIN_REJECT_REASON_LEN cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_payments_config_is_valid() {
        let config = PaymentsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_unique_add, 999);
        assert_eq!(config.reservation_ttl, Duration::from_secs(900));
        assert_eq!(config.min_reject_reason_len, 10);
    }

    #[test]
    fn zero_perturbation_bound_is_rejected() {
        let config = PaymentsConfig {
            max_unique_add: 0,
            ..PaymentsConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn server_config_rejects_port_zero() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn logging_config_rejects_unknown_level() {
        let config = LoggingConfig {
            level: "LOUD".to_string(),
            format: LogFormat::Plain,
        };
        assert!(config.validate().is_err());
    }
}
