use anyhow::{anyhow, Result};
use bigdecimal::BigDecimal;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{error::ConnectivityError, types::PriceLevel};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(250);

/// Thin JSON-over-HTTP helper shared by the exchange adapters. Transient and
/// rate-limit failures are retried with exponential backoff.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    exchange: String,
    base_url: String,
    max_retries: u32,
    backoff: Duration,
}

impl RestClient {
    pub fn new(exchange: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cex-arb/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client for {}: {}", exchange, e))?;

        Ok(Self {
            http,
            exchange: exchange.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
        })
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff = backoff;
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<T, ConnectivityError> {
        let mut attempt = 0;
        loop {
            match self.get_once(path, query, headers).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff * 2u32.pow(attempt);
                    attempt += 1;
                    warn!(
                        "Request {} on {} failed (attempt {}/{}): {}",
                        path, self.exchange, attempt, self.max_retries, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<T, ConnectivityError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.get(&url).query(query);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request.send().await.map_err(|e| self.transient(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.transient(e.to_string()))?;
        debug!("GET {} -> {} ({} bytes)", url, status, body.len());

        classify_status(&self.exchange, status, &body)?;

        serde_json::from_str(&body).map_err(|e| ConnectivityError::Decode {
            exchange: self.exchange.clone(),
            message: format!("{}: {}", path, e),
        })
    }

    fn transient(&self, message: String) -> ConnectivityError {
        ConnectivityError::Transient {
            exchange: self.exchange.clone(),
            message,
        }
    }
}

fn classify_status(exchange: &str, status: StatusCode, body: &str) -> Result<(), ConnectivityError> {
    if status.is_success() {
        return Ok(());
    }
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 200));
    // binance answers 418 once an IP keeps ignoring 429s
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return Err(ConnectivityError::RateLimited {
            exchange: exchange.to_string(),
            message,
        });
    }
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return Err(ConnectivityError::Transient {
            exchange: exchange.to_string(),
            message,
        });
    }
    Err(ConnectivityError::Decode {
        exchange: exchange.to_string(),
        message,
    })
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}

pub(crate) fn parse_decimal(exchange: &str, field: &str, raw: &str) -> Result<BigDecimal, ConnectivityError> {
    BigDecimal::from_str(raw.trim()).map_err(|e| ConnectivityError::Decode {
        exchange: exchange.to_string(),
        message: format!("invalid {} '{}': {}", field, raw, e),
    })
}

/// Converts `[price, quantity]` string pairs into price levels.
pub(crate) fn parse_levels(exchange: &str, raw: &[(String, String)]) -> Result<Vec<PriceLevel>, ConnectivityError> {
    raw.iter()
        .map(|(price, quantity)| {
            Ok(PriceLevel::new(
                parse_decimal(exchange, "price", price)?,
                parse_decimal(exchange, "quantity", quantity)?,
            ))
        })
        .collect()
}
