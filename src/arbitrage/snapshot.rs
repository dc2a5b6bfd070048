use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

use crate::{
    error::ScanError,
    types::{BookSide, Ladder, Market, PriceLevel, QuoteSnapshot, RawOrderBook},
};

/// Sorts one side of a raw book into ladder order. Levels with a non-positive
/// price or quantity are dropped and quantities quoted at the same price are
/// merged into a single level.
pub fn normalize_ladder(levels: &[PriceLevel], side: BookSide) -> Ladder {
    let mut merged: BTreeMap<BigDecimal, BigDecimal> = BTreeMap::new();
    let mut dropped = 0usize;

    for level in levels {
        if level.price <= BigDecimal::zero() || level.quantity <= BigDecimal::zero() {
            dropped += 1;
            continue;
        }
        let entry = merged.entry(level.price.clone()).or_insert_with(BigDecimal::zero);
        *entry += &level.quantity;
    }

    if dropped > 0 {
        debug!("Dropped {} non-positive {:?} levels", dropped, side);
    }

    let ascending = merged
        .into_iter()
        .map(|(price, quantity)| PriceLevel::new(price, quantity));

    let levels = match side {
        BookSide::Asks => ascending.collect(),
        BookSide::Bids => {
            let mut levels: Vec<PriceLevel> = ascending.collect();
            levels.reverse();
            levels
        }
    };

    Ladder::from_normalized(levels)
}

pub fn build_snapshot(
    market: &Market,
    raw: &RawOrderBook,
    captured_at: DateTime<Utc>,
) -> Result<QuoteSnapshot, ScanError> {
    let bids = normalize_ladder(&raw.bids, BookSide::Bids);
    let asks = normalize_ladder(&raw.asks, BookSide::Asks);

    if bids.is_empty() && asks.is_empty() {
        return Err(ScanError::MalformedBook {
            exchange: market.exchange.clone(),
            symbol: market.symbol(),
        });
    }

    Ok(QuoteSnapshot {
        exchange: market.exchange.clone(),
        market: market.clone(),
        bids,
        asks,
        captured_at,
    })
}
