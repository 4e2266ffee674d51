//! Application configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_CALLBACK_URL: &str = "http://localhost:3000/payments/webhook";

/// Only good enough for local runs against the simulated provider.
pub const DEV_WEBHOOK_SECRET: &str = "dev-webhook-secret";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("WEBHOOK_SECRET must be set when PSP_BASE_URL is set")]
    MissingWebhookSecret,
}

/// Server configuration with sensible defaults.
///
/// | variable | default |
/// |---|---|
/// | `HOST` | `0.0.0.0` |
/// | `PORT` | `3000` |
/// | `RUST_LOG` | `info` |
/// | `LOG_FORMAT` | `text` (`json` for the JSON formatter) |
/// | `DATABASE_URL` | unset: in-memory backends |
/// | `PSP_BASE_URL` | unset: in-process simulated provider |
/// | `PAYMENT_CALLBACK_URL` | `http://localhost:3000/payments/webhook` |
/// | `WEBHOOK_SECRET` | required with `PSP_BASE_URL`, dev secret otherwise |
/// | `RESERVATION_TTL_SECS` | `900` |
/// | `PAYMENT_WINDOW_SECS` | `900` |
/// | `SWEEP_INTERVAL_SECS` | `30` |
/// | `OUTBOX_POLL_MILLIS` | `500` |
/// | `CURRENCY` | `RUB` |
/// | `SHIPPING_URL` | unset: paid orders are only logged |
/// | `NOTIFICATION_URL` | unset: notifications are only logged |
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub psp_base_url: Option<String>,
    pub callback_url: String,
    pub webhook_secret: String,
    pub reservation_ttl_secs: i64,
    pub payment_window_secs: i64,
    pub sweep_interval_secs: u64,
    pub outbox_poll_millis: u64,
    pub currency: String,
    pub shipping_url: Option<String>,
    pub notification_url: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let psp_base_url = var("PSP_BASE_URL");
        let webhook_secret = match (var("WEBHOOK_SECRET"), &psp_base_url) {
            (Some(secret), _) => secret,
            (None, Some(_)) => return Err(ConfigError::MissingWebhookSecret),
            (None, None) => defaults.webhook_secret,
        };

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                tracing::warn!(value = other, "unknown LOG_FORMAT, using text");
                LogFormat::Text
            }
        };

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse_or(var("PORT"), "PORT", defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            database_url: var("DATABASE_URL"),
            psp_base_url,
            callback_url: var("PAYMENT_CALLBACK_URL").unwrap_or(defaults.callback_url),
            webhook_secret,
            reservation_ttl_secs: parse_positive(
                var("RESERVATION_TTL_SECS"),
                "RESERVATION_TTL_SECS",
                defaults.reservation_ttl_secs,
            ),
            payment_window_secs: parse_positive(
                var("PAYMENT_WINDOW_SECS"),
                "PAYMENT_WINDOW_SECS",
                defaults.payment_window_secs,
            ),
            sweep_interval_secs: parse_positive(
                var("SWEEP_INTERVAL_SECS"),
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
            ),
            outbox_poll_millis: parse_positive(
                var("OUTBOX_POLL_MILLIS"),
                "OUTBOX_POLL_MILLIS",
                defaults.outbox_poll_millis,
            ),
            currency: var("CURRENCY").unwrap_or(defaults.currency),
            shipping_url: var("SHIPPING_URL"),
            notification_url: var("NOTIFICATION_URL"),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservation_ttl_secs)
    }

    pub fn payment_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.payment_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn outbox_poll(&self) -> Duration {
        Duration::from_millis(self.outbox_poll_millis)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            psp_base_url: None,
            callback_url: DEFAULT_CALLBACK_URL.to_string(),
            webhook_secret: DEV_WEBHOOK_SECRET.to_string(),
            reservation_ttl_secs: inventory::DEFAULT_RESERVATION_TTL_SECS,
            payment_window_secs: saga::DEFAULT_PAYMENT_WINDOW_SECS,
            sweep_interval_secs: 30,
            outbox_poll_millis: 500,
            currency: saga::DEFAULT_CURRENCY.to_string(),
            shipping_url: None,
            notification_url: None,
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> T {
    match value {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "invalid value, using default");
            default
        }),
    }
}

fn parse_positive<T>(value: Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default + Copy,
{
    let parsed = parse_or(value, key, default);
    if parsed <= T::default() {
        tracing::warn!(key, "value must be positive, using default");
        return default;
    }
    parsed
}
