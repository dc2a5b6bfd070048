use async_trait::async_trait;

use crate::{
    error::ConnectivityError,
    types::{Currency, Market, RawOrderBook},
};

/// Connectivity boundary. Implementations return normalized values so the
/// scanner never branches on exchange identity.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn name(&self) -> &str;

    async fn list_markets(&self) -> Result<Vec<Market>, ConnectivityError>;

    async fn fetch_order_book(&self, market: &Market, limit: u32) -> Result<RawOrderBook, ConnectivityError>;

    async fn currency_metadata(&self, asset: &str) -> Result<Currency, ConnectivityError>;
}
