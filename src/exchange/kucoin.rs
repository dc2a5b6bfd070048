use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

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

pub const KUCOIN_API_URL: &str = "https://api.kucoin.com";
const SUCCESS_CODE: &str = "200000";

/// KuCoin wraps every payload as `{"code": "200000", "data": ...}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, ConnectivityError> {
        if self.code != SUCCESS_CODE {
            return Err(ConnectivityError::Decode {
                exchange: "kucoin".to_string(),
                message: format!("code {}: {}", self.code, self.msg.unwrap_or_default()),
            });
        }
        self.data.ok_or_else(|| ConnectivityError::Decode {
            exchange: "kucoin".to_string(),
            message: "missing data field".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    base_currency: String,
    quote_currency: String,
    enable_trading: bool,
}

#[derive(Debug, Deserialize)]
struct OrderBookData {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct CurrencyData {
    currency: String,
    #[serde(default)]
    chains: Option<Vec<ChainInfo>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainInfo {
    chain_name: String,
    withdrawal_min_fee: Option<String>,
    withdrawal_min_size: Option<String>,
    is_withdraw_enabled: bool,
    is_deposit_enabled: bool,
}

pub struct KucoinClient {
    rest: RestClient,
    default_taker_fee: BigDecimal,
}

impl KucoinClient {
    pub fn new(rest: RestClient, default_taker_fee: BigDecimal) -> Self {
        Self {
            rest,
            default_taker_fee,
        }
    }
}

// level2 snapshots only come in depths of 20 and 100
fn orderbook_path(limit: u32) -> &'static str {
    if limit <= 20 {
        "/api/v1/market/orderbook/level2_20"
    } else {
        "/api/v1/market/orderbook/level2_100"
    }
}

fn markets_from_symbols(symbols: Vec<SymbolInfo>, taker_fee: &BigDecimal) -> Vec<Market> {
    symbols
        .into_iter()
        .map(|s| Market {
            exchange: "kucoin".to_string(),
            symbol_id: s.symbol,
            base: s.base_currency.to_uppercase(),
            quote: s.quote_currency.to_uppercase(),
            taker_fee: taker_fee.clone(),
            active: s.enable_trading,
        })
        .collect()
}

fn currency_from_data(data: CurrencyData) -> Result<Currency, ConnectivityError> {
    let mut networks = BTreeMap::new();
    for chain in data.chains.unwrap_or_default() {
        let network = canonical_network(&chain.chain_name);
        let fee = chain.withdrawal_min_fee.as_deref().unwrap_or("0");
        let min = chain.withdrawal_min_size.as_deref().unwrap_or("0");
        networks.insert(
            network.clone(),
            NetworkInfo {
                network,
                withdraw_fee: parse_decimal("kucoin", "withdrawalMinFee", fee)?,
                withdraw_min: parse_decimal("kucoin", "withdrawalMinSize", min)?,
                withdraw_enabled: chain.is_withdraw_enabled,
                deposit_enabled: chain.is_deposit_enabled,
            },
        );
    }
    Ok(Currency {
        exchange: "kucoin".to_string(),
        symbol: data.currency.to_uppercase(),
        networks,
    })
}

#[async_trait]
impl ExchangeClient for KucoinClient {
    fn name(&self) -> &str {
        "kucoin"
    }

    async fn list_markets(&self) -> Result<Vec<Market>, ConnectivityError> {
        let envelope: Envelope<Vec<SymbolInfo>> = self.rest.get_json("/api/v2/symbols", &[], &[]).await?;
        let taker_fee = effective_taker_rate(None, &self.default_taker_fee);
        let markets = markets_from_symbols(envelope.into_data()?, &taker_fee);
        debug!("KuCoin listed {} markets", markets.len());
        Ok(markets)
    }

    async fn fetch_order_book(&self, market: &Market, limit: u32) -> Result<RawOrderBook, ConnectivityError> {
        let query = [("symbol", market.symbol_id.clone())];
        let envelope: Envelope<OrderBookData> = self.rest.get_json(orderbook_path(limit), &query, &[]).await?;
        let book = envelope.into_data()?;

        Ok(RawOrderBook {
            bids: parse_levels("kucoin", &book.bids)?,
            asks: parse_levels("kucoin", &book.asks)?,
        })
    }

    async fn currency_metadata(&self, asset: &str) -> Result<Currency, ConnectivityError> {
        let path = format!("/api/v3/currencies/{}", asset.to_uppercase());
        let envelope: Envelope<CurrencyData> = self.rest.get_json(&path, &[], &[]).await?;
        currency_from_data(envelope.into_data()?)
    }
}
