use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::{
    arbitrage::fees::effective_taker_rate,
    error::ConnectivityError,
    exchange::{
        network::canonical_network,
        rest::{parse_decimal, parse_levels, RestClient},
        traits::ExchangeClient,
    },
    types::{Currency, Market, NetworkInfo, RawOrderBook},
};

type HmacSha256 = Hmac<Sha256>;

pub const BINANCE_API_URL: &str = "https://api.binance.com";
const DEPTH_LIMITS: [u32; 8] = [5, 10, 20, 50, 100, 500, 1000, 5000];

#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default = "default_true")]
    is_spot_trading_allowed: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoinConfig {
    coin: String,
    #[serde(default)]
    network_list: Vec<CoinNetwork>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoinNetwork {
    network: String,
    withdraw_fee: String,
    withdraw_min: String,
    withdraw_enable: bool,
    deposit_enable: bool,
}

pub struct BinanceClient {
    rest: RestClient,
    credentials: Option<ApiCredentials>,
    default_taker_fee: BigDecimal,
}

impl BinanceClient {
    pub fn new(rest: RestClient, credentials: Option<ApiCredentials>, default_taker_fee: BigDecimal) -> Self {
        if credentials.is_none() {
            info!("Binance API credentials not set, withdrawal metadata unavailable");
        }
        Self {
            rest,
            credentials,
            default_taker_fee,
        }
    }

    fn signed_query(&self, credentials: &ApiCredentials) -> Result<Vec<(&'static str, String)>> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let payload = format!("timestamp={}", timestamp);
        let signature = sign_query(&credentials.api_secret, &payload)?;
        Ok(vec![("timestamp", timestamp), ("signature", signature)])
    }
}

/// Binance SIGNED endpoints take a hex HMAC-SHA256 of the query string.
pub fn sign_query(secret: &str, query: &str) -> Result<String> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| anyhow!("HMAC key error: {}", e))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn depth_limit(requested: u32) -> u32 {
    DEPTH_LIMITS
        .iter()
        .copied()
        .find(|limit| *limit >= requested)
        .unwrap_or(5000)
}

fn markets_from_info(info: ExchangeInfo, taker_fee: &BigDecimal) -> Vec<Market> {
    info.symbols
        .into_iter()
        .filter(|s| s.is_spot_trading_allowed)
        .map(|s| Market {
            exchange: "binance".to_string(),
            active: s.status == "TRADING",
            symbol_id: s.symbol,
            base: s.base_asset.to_uppercase(),
            quote: s.quote_asset.to_uppercase(),
            taker_fee: taker_fee.clone(),
        })
        .collect()
}

fn currency_from_config(coin: CoinConfig) -> Result<Currency, ConnectivityError> {
    let mut networks = BTreeMap::new();
    for net in coin.network_list {
        let network = canonical_network(&net.network);
        networks.insert(
            network.clone(),
            NetworkInfo {
                network,
                withdraw_fee: parse_decimal("binance", "withdrawFee", &net.withdraw_fee)?,
                withdraw_min: parse_decimal("binance", "withdrawMin", &net.withdraw_min)?,
                withdraw_enabled: net.withdraw_enable,
                deposit_enabled: net.deposit_enable,
            },
        );
    }
    Ok(Currency {
        exchange: "binance".to_string(),
        symbol: coin.coin.to_uppercase(),
        networks,
    })
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn list_markets(&self) -> Result<Vec<Market>, ConnectivityError> {
        let info: ExchangeInfo = self.rest.get_json("/api/v3/exchangeInfo", &[], &[]).await?;
        let taker_fee = effective_taker_rate(None, &self.default_taker_fee);
        let markets = markets_from_info(info, &taker_fee);
        debug!("Binance listed {} spot markets", markets.len());
        Ok(markets)
    }

    async fn fetch_order_book(&self, market: &Market, limit: u32) -> Result<RawOrderBook, ConnectivityError> {
        let query = [
            ("symbol", market.symbol_id.clone()),
            ("limit", depth_limit(limit).to_string()),
        ];
        let depth: DepthResponse = self.rest.get_json("/api/v3/depth", &query, &[]).await?;

        Ok(RawOrderBook {
            bids: parse_levels("binance", &depth.bids)?,
            asks: parse_levels("binance", &depth.asks)?,
        })
    }

    async fn currency_metadata(&self, asset: &str) -> Result<Currency, ConnectivityError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| ConnectivityError::Unsupported {
            exchange: "binance".to_string(),
            operation: "currency metadata without API credentials".to_string(),
        })?;

        let query = self.signed_query(credentials).map_err(|e| ConnectivityError::Unsupported {
            exchange: "binance".to_string(),
            operation: format!("request signing ({})", e),
        })?;
        let headers = [("X-MBX-APIKEY", credentials.api_key.clone())];

        let coins: Vec<CoinConfig> = self
            .rest
            .get_json("/sapi/v1/capital/config/getall", &query, &headers)
            .await?;

        let coin = coins
            .into_iter()
            .find(|c| c.coin.eq_ignore_ascii_case(asset))
            .ok_or_else(|| ConnectivityError::Unsupported {
                exchange: "binance".to_string(),
                operation: format!("withdrawals of {}", asset),
            })?;

        currency_from_config(coin)
    }
}
