use bigdecimal::{BigDecimal, One, Zero};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::{
    arbitrage::fees::DEFAULT_TAKER_FEE,
    error::ConfigError,
    types::{SizeUnit, TradeSize},
};

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    pub exchanges: Vec<String>,
    pub scanner: ScannerConfig,
    pub routes: RouteConfig,
    pub cache: CacheConfig,
    pub networks: NetworkConfig,
    pub notify: NotifyConfig,
    pub logging: LoggingConfig,
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    pub trade_size: String,
    pub trade_size_unit: SizeUnit,
    pub min_profit_threshold: String,
    pub default_taker_fee: String,
    pub fetch_timeout_ms: u64,
    pub concurrency: usize,
    pub check_interval_seconds: u64,
    pub orderbook_limit: u32,
    pub preferred_quotes: Vec<String>,
    // 0 scans every common symbol
    pub max_pairs: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RouteConfig {
    pub max_depth: usize,
    pub top_k: usize,
    pub prune_threshold: String,
    pub start_amount: String,
    pub assets: Vec<String>,
    pub max_markets_per_exchange: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub db_path: String,
    pub markets_ttl_seconds: u64,
    pub currencies_ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct NetworkConfig {
    /// Asset -> network to use whenever it is eligible.
    pub overrides: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct NotifyConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub max_per_cycle: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct CredentialsConfig {
    pub binance_api_key: Option<String>,
    pub binance_api_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchanges: vec!["binance".to_string(), "kucoin".to_string()],
            scanner: ScannerConfig::default(),
            routes: RouteConfig::default(),
            cache: CacheConfig::default(),
            networks: NetworkConfig::default(),
            notify: NotifyConfig::default(),
            logging: LoggingConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            trade_size: "100".to_string(),
            trade_size_unit: SizeUnit::Quote,
            min_profit_threshold: "0.005".to_string(),
            default_taker_fee: DEFAULT_TAKER_FEE.to_string(),
            fetch_timeout_ms: 10_000,
            concurrency: 16,
            check_interval_seconds: 30,
            orderbook_limit: 50,
            preferred_quotes: vec!["USDT".to_string(), "USDC".to_string()],
            max_pairs: 0,
        }
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            top_k: 8,
            prune_threshold: "0.97".to_string(),
            start_amount: "100".to_string(),
            assets: ["USDT", "USDC", "BTC", "ETH"].iter().map(|s| s.to_string()).collect(),
            max_markets_per_exchange: 200,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: ".cache/arbitrage_cache.sqlite3".to_string(),
            markets_ttl_seconds: 86_400,
            currencies_ttl_seconds: 3_600,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_id: None,
            max_per_cycle: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        if let Some(path) = path {
            settings = settings.add_source(config::File::from(path));
        }

        settings = settings.add_source(
            config::Environment::with_prefix("ARBITRAGE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("exchanges")
                .with_list_parse_key("scanner.preferred_quotes")
                .with_list_parse_key("routes.assets"),
        );

        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            settings = settings.set_override("notify.telegram_bot_token", token)?;
        }
        if let Ok(chat_id) = std::env::var("TELEGRAM_CHAT_ID") {
            settings = settings.set_override("notify.telegram_chat_id", chat_id)?;
        }
        if let Ok(key) = std::env::var("BINANCE_API_KEY") {
            settings = settings.set_override("credentials.binance_api_key", key)?;
        }
        if let Ok(secret) = std::env::var("BINANCE_API_SECRET") {
            settings = settings.set_override("credentials.binance_api_secret", secret)?;
        }

        let config: Config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchanges.iter().all(|e| e.trim().is_empty()) {
            return Err(ConfigError::NoExchanges);
        }

        self.scanner.min_profit_threshold()?;
        self.scanner.trade_size()?;
        self.scanner.default_taker_fee()?;

        if self.scanner.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scanner.concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.scanner.fetch_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scanner.fetch_timeout_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(2..=4).contains(&self.routes.max_depth) {
            return Err(ConfigError::InvalidValue {
                field: "routes.max_depth",
                reason: format!("must be between 2 and 4, got {}", self.routes.max_depth),
            });
        }
        if self.routes.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "routes.top_k",
                reason: "must be at least 1".to_string(),
            });
        }
        self.routes.prune_threshold()?;
        self.routes.start_amount()?;

        Ok(())
    }

    /// Lower-cased, de-duplicated exchange ids in configured order.
    pub fn exchange_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in &self.exchanges {
            let id = id.trim().to_lowercase();
            if !id.is_empty() && !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }
}

impl ScannerConfig {
    pub fn min_profit_threshold(&self) -> Result<BigDecimal, ConfigError> {
        let threshold = BigDecimal::from_str(&self.min_profit_threshold)
            .map_err(|_| ConfigError::InvalidThreshold(self.min_profit_threshold.clone()))?;
        if threshold < BigDecimal::zero() || threshold >= BigDecimal::one() {
            return Err(ConfigError::InvalidThreshold(self.min_profit_threshold.clone()));
        }
        Ok(threshold)
    }

    pub fn trade_size(&self) -> Result<TradeSize, ConfigError> {
        let amount = parse_positive("scanner.trade_size", &self.trade_size)?;
        Ok(TradeSize {
            amount,
            unit: self.trade_size_unit,
        })
    }

    pub fn default_taker_fee(&self) -> Result<BigDecimal, ConfigError> {
        let fee = BigDecimal::from_str(&self.default_taker_fee).map_err(|e| ConfigError::InvalidValue {
            field: "scanner.default_taker_fee",
            reason: e.to_string(),
        })?;
        if fee < BigDecimal::zero() {
            return Err(ConfigError::InvalidValue {
                field: "scanner.default_taker_fee",
                reason: "must not be negative".to_string(),
            });
        }
        Ok(fee)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn is_preferred_quote(&self, quote: &str) -> bool {
        self.preferred_quotes.is_empty()
            || self
                .preferred_quotes
                .iter()
                .any(|q| q.eq_ignore_ascii_case(quote))
    }
}

impl RouteConfig {
    pub fn prune_threshold(&self) -> Result<BigDecimal, ConfigError> {
        let threshold = parse_positive("routes.prune_threshold", &self.prune_threshold)?;
        if threshold > BigDecimal::one() {
            return Err(ConfigError::InvalidValue {
                field: "routes.prune_threshold",
                reason: "must not exceed 1".to_string(),
            });
        }
        Ok(threshold)
    }

    pub fn start_amount(&self) -> Result<BigDecimal, ConfigError> {
        parse_positive("routes.start_amount", &self.start_amount)
    }
}

fn parse_positive(field: &'static str, raw: &str) -> Result<BigDecimal, ConfigError> {
    let value = BigDecimal::from_str(raw).map_err(|e| ConfigError::InvalidValue {
        field,
        reason: e.to_string(),
    })?;
    if value <= BigDecimal::zero() {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("must be positive, got {}", raw),
        });
    }
    Ok(value)
}
