pub mod binance;
pub mod kucoin;
pub mod network;
pub mod rest;
pub mod traits;

pub use binance::{ApiCredentials, BinanceClient};
pub use kucoin::KucoinClient;
pub use network::canonical_network;
pub use rest::RestClient;
pub use traits::*;

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;

#[derive(Default)]
pub struct ExchangeManager {
    clients: Vec<Arc<dyn ExchangeClient>>,
}

impl ExchangeManager {
    pub fn new() -> Self {
        Self { clients: Vec::new() }
    }

    pub fn add_client(&mut self, client: Arc<dyn ExchangeClient>) {
        self.clients.push(client);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExchangeClient>> {
        self.clients
            .iter()
            .find(|client| client.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn clients(&self) -> &[Arc<dyn ExchangeClient>] {
        &self.clients
    }

    pub fn names(&self) -> Vec<String> {
        self.clients.iter().map(|client| client.name().to_string()).collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

pub fn create_exchange_clients(config: &Config) -> Result<ExchangeManager> {
    let mut manager = ExchangeManager::new();
    let timeout = config.scanner.fetch_timeout();
    let default_taker_fee = config.scanner.default_taker_fee()?;

    for id in config.exchange_ids() {
        match id.as_str() {
            "binance" => {
                let rest = RestClient::new("binance", binance::BINANCE_API_URL, timeout)?;
                let credentials = match (
                    &config.credentials.binance_api_key,
                    &config.credentials.binance_api_secret,
                ) {
                    (Some(key), Some(secret)) => Some(ApiCredentials {
                        api_key: key.clone(),
                        api_secret: secret.clone(),
                    }),
                    _ => None,
                };
                let client = BinanceClient::new(rest, credentials, default_taker_fee.clone());
                manager.add_client(Arc::new(client));
            }
            "kucoin" => {
                let rest = RestClient::new("kucoin", kucoin::KUCOIN_API_URL, timeout)?;
                manager.add_client(Arc::new(KucoinClient::new(rest, default_taker_fee.clone())));
            }
            _ => {
                warn!("Unknown exchange configuration: {}", id);
            }
        }
    }

    info!("Configured exchanges: {}", manager.names().join(", "));
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_exchanges_skipped() {
        let mut config = Config::default();
        config.exchanges = vec!["binance".to_string(), "ftx".to_string(), "KuCoin".to_string()];

        let manager = create_exchange_clients(&config).unwrap();
        assert_eq!(manager.client_count(), 2);
        assert_eq!(manager.names(), vec!["binance", "kucoin"]);
        assert!(manager.get("BINANCE").is_some());
        assert!(manager.get("ftx").is_none());
    }
}
