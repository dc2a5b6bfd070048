use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Bids,
    Asks,
}

/// Taker direction. A buy consumes the ask ladder, a sell consumes the bids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn consumes(&self) -> BookSide {
        match self {
            TradeSide::Buy => BookSide::Asks,
            TradeSide::Sell => BookSide::Bids,
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    Base,
    Quote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSize {
    pub amount: BigDecimal,
    pub unit: SizeUnit,
}

impl TradeSize {
    pub fn base(amount: BigDecimal) -> Self {
        Self {
            amount,
            unit: SizeUnit::Base,
        }
    }

    pub fn quote(amount: BigDecimal) -> Self {
        Self {
            amount,
            unit: SizeUnit::Quote,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Market {
    pub exchange: String,
    pub symbol_id: String,
    pub base: String,
    pub quote: String,
    pub taker_fee: BigDecimal,
    pub active: bool,
}

impl Market {
    pub fn symbol(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub network: String,
    pub withdraw_fee: BigDecimal,
    pub withdraw_min: BigDecimal,
    pub withdraw_enabled: bool,
    pub deposit_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    pub exchange: String,
    pub symbol: String,
    // keyed by canonical network id so iteration order is stable
    pub networks: BTreeMap<String, NetworkInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: BigDecimal,
    pub quantity: BigDecimal,
}

impl PriceLevel {
    pub fn new(price: BigDecimal, quantity: BigDecimal) -> Self {
        Self { price, quantity }
    }
}

/// Sorted, price-unique levels of one book side. Only the snapshot builder
/// constructs non-empty ladders, so the ordering invariant always holds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ladder {
    levels: Vec<PriceLevel>,
}

impl Ladder {
    pub(crate) fn from_normalized(levels: Vec<PriceLevel>) -> Self {
        Self { levels }
    }

    pub fn levels(&self) -> &[PriceLevel] {
        &self.levels
    }

    pub fn best(&self) -> Option<&PriceLevel> {
        self.levels.first()
    }

    pub fn total_quantity(&self) -> BigDecimal {
        self.levels.iter().map(|level| &level.quantity).sum()
    }

    pub fn total_notional(&self) -> BigDecimal {
        self.levels
            .iter()
            .fold(BigDecimal::zero(), |acc, level| acc + &level.price * &level.quantity)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Book levels as delivered by an exchange adapter, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOrderBook {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    pub exchange: String,
    pub market: Market,
    pub bids: Ladder,
    pub asks: Ladder,
    pub captured_at: DateTime<Utc>,
}

impl QuoteSnapshot {
    pub fn ladder(&self, side: BookSide) -> &Ladder {
        match side {
            BookSide::Bids => &self.bids,
            BookSide::Asks => &self.asks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillResult {
    pub side: TradeSide,
    pub requested: BigDecimal,
    pub requested_unit: SizeUnit,
    pub average_price: BigDecimal,
    pub filled_quantity: BigDecimal,
    pub filled_notional: BigDecimal,
    pub exhausted: bool,
    pub levels_consumed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalPlan {
    pub asset: String,
    pub from_exchange: String,
    pub to_exchange: String,
    pub network: String,
    pub fee: BigDecimal,
    pub min_amount: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub symbol: String,
    pub buy_market: Market,
    pub sell_market: Market,
    pub quantity: BigDecimal,
    pub buy_price: BigDecimal,
    pub sell_price: BigDecimal,
    pub buy_cost: BigDecimal,
    pub sell_proceeds: BigDecimal,
    pub gross_spread: BigDecimal,
    pub taker_fees: BigDecimal,
    pub withdrawal_cost: BigDecimal,
    pub network: String,
    pub net_profit: BigDecimal,
    pub net_profit_fraction: BigDecimal,
    pub depth_limited: bool,
    pub buy_snapshot_at: DateTime<Utc>,
    pub sell_snapshot_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn buy_exchange(&self) -> &str {
        &self.buy_market.exchange
    }

    pub fn sell_exchange(&self) -> &str {
        &self.sell_market.exchange
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RouteEdge {
    Trade {
        exchange: String,
        symbol: String,
        side: TradeSide,
        from_asset: String,
        to_asset: String,
        amount_in: BigDecimal,
        amount_out: BigDecimal,
        average_price: BigDecimal,
        fee_paid: BigDecimal,
    },
    Transfer {
        asset: String,
        from_exchange: String,
        to_exchange: String,
        network: String,
        amount_in: BigDecimal,
        amount_out: BigDecimal,
        fee: BigDecimal,
    },
}

impl RouteEdge {
    pub fn amount_in(&self) -> &BigDecimal {
        match self {
            RouteEdge::Trade { amount_in, .. } | RouteEdge::Transfer { amount_in, .. } => amount_in,
        }
    }

    pub fn amount_out(&self) -> &BigDecimal {
        match self {
            RouteEdge::Trade { amount_out, .. } | RouteEdge::Transfer { amount_out, .. } => {
                amount_out
            }
        }
    }
}

impl fmt::Display for RouteEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteEdge::Trade {
                exchange,
                symbol,
                side,
                from_asset,
                to_asset,
                ..
            } => write!(f, "[{}] {} {} ({} -> {})", exchange, side, symbol, from_asset, to_asset),
            RouteEdge::Transfer {
                asset,
                from_exchange,
                to_exchange,
                network,
                ..
            } => write!(
                f,
                "transfer {} {} -> {} via {}",
                asset, from_exchange, to_exchange, network
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub start_exchange: String,
    pub start_asset: String,
    pub end_asset: String,
    pub closed: bool,
    pub edges: Vec<RouteEdge>,
    pub start_amount: BigDecimal,
    pub end_amount: BigDecimal,
    pub cumulative_return: BigDecimal,
    pub efficiency: BigDecimal,
    pub detected_at: DateTime<Utc>,
}

impl Route {
    pub fn depth(&self) -> usize {
        self.edges.len()
    }

    pub fn describe(&self) -> String {
        self.edges
            .iter()
            .map(|edge| edge.to_string())
            .collect::<Vec<_>>()
            .join(" => ")
    }
}
