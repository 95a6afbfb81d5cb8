use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "INR";
const DEFAULT_REFUND_WINDOW_DAYS: i64 = 30;
const DEFAULT_TAX_RATE_PERCENT: f64 = 18.0;

/// Application configuration with validation.
///
/// Layered from `config/default.toml`, `config/{environment}.toml`, and
/// `STOREFRONT__`-prefixed environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_env")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to initialize the database schema on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// Secret for HMAC verification of payment confirmation signatures
    #[validate(length(min = 32))]
    pub payment_signature_secret: String,

    /// Payment methods currently accepting checkouts
    #[serde(default = "default_payment_methods")]
    pub enabled_payment_methods: Vec<String>,

    /// Settlement currency for new orders
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Tax rate applied to the discounted subtotal, in percent
    #[serde(default = "default_tax_rate")]
    pub tax_rate_percent: f64,

    /// Flat shipping cost per order
    #[serde(default)]
    pub shipping_flat: f64,

    /// Surcharge applied when gift wrapping is requested
    #[serde(default)]
    pub gift_wrap_fee: f64,

    /// Days after delivery (or placement) during which refunds are accepted
    #[serde(default = "default_refund_window_days")]
    pub refund_window_days: i64,

    /// Enqueue refund settlement automatically instead of waiting for
    /// manual admin confirmation
    #[serde(default)]
    pub auto_settle_refunds: bool,

    /// Payment gateway REST endpoint
    #[serde(default = "default_gateway_base_url")]
    pub gateway_base_url: String,

    /// Gateway API credentials
    #[serde(default)]
    pub gateway_key_id: String,
    #[serde(default)]
    pub gateway_key_secret: String,

    /// Gateway identifier recorded on payment rows
    #[serde(default = "default_gateway_name")]
    pub gateway_name: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_env() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_payment_methods() -> Vec<String> {
    vec!["card".to_string(), "upi".to_string(), "netbanking".to_string()]
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_tax_rate() -> f64 {
    DEFAULT_TAX_RATE_PERCENT
}
fn default_refund_window_days() -> i64 {
    DEFAULT_REFUND_WINDOW_DAYS
}
fn default_gateway_base_url() -> String {
    "https://api.razorpay.com/v1".to_string()
}
fn default_gateway_name() -> String {
    "razorpay".to_string()
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_payment_method_enabled(&self, method: &str) -> bool {
        self.enabled_payment_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Minimal configuration for integration tests.
    pub fn for_tests(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: default_host(),
            port: 0,
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            db_max_connections: 1,
            db_min_connections: 1,
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            payment_signature_secret: "test_secret_key_for_testing_purposes_only_32chars"
                .to_string(),
            enabled_payment_methods: default_payment_methods(),
            currency: default_currency(),
            tax_rate_percent: default_tax_rate(),
            shipping_flat: 0.0,
            gift_wrap_fee: 0.0,
            refund_window_days: default_refund_window_days(),
            auto_settle_refunds: false,
            gateway_base_url: default_gateway_base_url(),
            gateway_key_id: String::new(),
            gateway_key_secret: String::new(),
            gateway_name: default_gateway_name(),
        }
    }
}

/// Loads configuration from files and environment.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg: AppConfig = Config::builder()
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{environment}")).required(false))
        .add_source(Environment::with_prefix("STOREFRONT").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    info!(environment = %cfg.environment, "Configuration loaded");
    Ok(cfg)
}

/// Initializes the tracing subscriber. Safe to call once at startup.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validates_secret_length() {
        let mut cfg = AppConfig::for_tests("sqlite::memory:");
        assert!(cfg.validate().is_ok());

        cfg.payment_signature_secret = "short".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_payment_method_check_is_case_insensitive() {
        let cfg = AppConfig::for_tests("sqlite::memory:");
        assert!(cfg.is_payment_method_enabled("Card"));
        assert!(!cfg.is_payment_method_enabled("cheque"));
    }
}
