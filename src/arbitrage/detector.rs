use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    arbitrage::{
        fees::{taker_fee, FeeModel},
        simulator::{simulate, simulate_notional},
    },
    config::ScannerConfig,
    error::{ConfigError, ScanError},
    types::{Currency, FillResult, Opportunity, QuoteSnapshot, SizeUnit, TradeSide, TradeSize},
};

/// Currency metadata for the base asset on both venues of a pair.
pub struct TransferMetadata<'a> {
    pub on_a: &'a Currency,
    pub on_b: &'a Currency,
}

/// Both legs of one direction, simulated but not yet fee-adjusted.
#[derive(Debug, Clone)]
pub struct DirectionFill<'a> {
    pub buy: &'a QuoteSnapshot,
    pub sell: &'a QuoteSnapshot,
    pub buy_fill: FillResult,
    pub sell_fill: FillResult,
    pub depth_limited: bool,
}

impl DirectionFill<'_> {
    pub fn quantity(&self) -> &BigDecimal {
        &self.sell_fill.filled_quantity
    }

    pub fn base_asset(&self) -> &str {
        &self.buy.market.base
    }

    pub fn taker_fees(&self) -> BigDecimal {
        taker_fee(&self.buy_fill, &self.buy.market.taker_fee) + taker_fee(&self.sell_fill, &self.sell.market.taker_fee)
    }

    pub fn fraction_before_withdrawal(&self) -> BigDecimal {
        let net = &self.sell_fill.filled_notional - &self.buy_fill.filled_notional - self.taker_fees();
        &net / &self.buy_fill.filled_notional
    }
}

#[derive(Debug, Default)]
pub struct Detection {
    pub opportunities: Vec<Opportunity>,
    pub skipped: Vec<ScanError>,
}

pub struct ArbitrageDetector {
    min_profit_threshold: BigDecimal,
    trade_size: TradeSize,
    fee_model: FeeModel,
}

impl ArbitrageDetector {
    pub fn new(config: &ScannerConfig, fee_model: FeeModel) -> Result<Self, ConfigError> {
        Ok(Self {
            min_profit_threshold: config.min_profit_threshold()?,
            trade_size: config.trade_size()?,
            fee_model,
        })
    }

    pub fn with_parameters(min_profit_threshold: BigDecimal, trade_size: TradeSize, fee_model: FeeModel) -> Self {
        Self {
            min_profit_threshold,
            trade_size,
            fee_model,
        }
    }

    /// Evaluates buy-on-A/sell-on-B and buy-on-B/sell-on-A for one symbol.
    /// Per-direction failures are collected in `skipped`, never raised.
    pub fn detect_opportunities(
        &self,
        snapshot_a: &QuoteSnapshot,
        snapshot_b: &QuoteSnapshot,
        transfer: &TransferMetadata<'_>,
    ) -> Detection {
        let mut detection = Detection::default();

        let directions = [
            (snapshot_a, snapshot_b, transfer.on_a, transfer.on_b),
            (snapshot_b, snapshot_a, transfer.on_b, transfer.on_a),
        ];

        for (buy, sell, source, destination) in directions {
            match self.evaluate_direction(buy, sell, source, destination) {
                Ok(Some(opportunity)) => detection.opportunities.push(opportunity),
                Ok(None) => {}
                Err(e) => {
                    debug!(
                        "Skipping {} buy@{} sell@{}: {}",
                        buy.market.symbol(),
                        buy.exchange,
                        sell.exchange,
                        e
                    );
                    detection.skipped.push(e);
                }
            }
        }

        if !detection.opportunities.is_empty() {
            info!(
                "Found {} opportunities for {} between {} and {}",
                detection.opportunities.len(),
                snapshot_a.market.symbol(),
                snapshot_a.exchange,
                snapshot_b.exchange
            );
        }

        detection
    }

    /// Buys on `buy`, moves the base asset from `source` to `destination`
    /// and sells on `sell`. Returns `None` when the net fraction does not
    /// exceed the threshold.
    pub fn evaluate_direction(
        &self,
        buy: &QuoteSnapshot,
        sell: &QuoteSnapshot,
        source: &Currency,
        destination: &Currency,
    ) -> Result<Option<Opportunity>, ScanError> {
        let fill = self.simulate_direction(buy, sell)?;
        let opportunity = self.fee_adjust(&fill, source, destination)?;
        Ok(self.is_profitable(&opportunity).then_some(opportunity))
    }

    /// Walks both ladders at the configured trade size. The sold quantity is
    /// capped by the sell-side depth, and the buy leg is re-simulated when
    /// that cap applies.
    pub fn simulate_direction<'a>(
        &self,
        buy: &'a QuoteSnapshot,
        sell: &'a QuoteSnapshot,
    ) -> Result<DirectionFill<'a>, ScanError> {
        let initial_buy = match self.trade_size.unit {
            SizeUnit::Base => simulate(&buy.asks, TradeSide::Buy, &self.trade_size.amount)?,
            SizeUnit::Quote => simulate_notional(&buy.asks, TradeSide::Buy, &self.trade_size.amount)?,
        };

        let sell_fill = simulate(&sell.bids, TradeSide::Sell, &initial_buy.filled_quantity)?;
        let mut depth_limited = initial_buy.exhausted;

        let buy_fill = if sell_fill.exhausted {
            depth_limited = true;
            simulate(&buy.asks, TradeSide::Buy, &sell_fill.filled_quantity)?
        } else {
            initial_buy
        };

        if buy_fill.filled_notional <= BigDecimal::zero() {
            return Err(ScanError::InvalidSimulationInput(format!(
                "zero buy cost for {} on {}",
                buy.market.symbol(),
                buy.exchange
            )));
        }

        Ok(DirectionFill {
            buy,
            sell,
            buy_fill,
            sell_fill,
            depth_limited,
        })
    }

    /// Nets taker fees on both legs and the withdrawal cost out of the gross
    /// spread. The result is not yet checked against the threshold.
    pub fn fee_adjust(
        &self,
        fill: &DirectionFill<'_>,
        source: &Currency,
        destination: &Currency,
    ) -> Result<Opportunity, ScanError> {
        let (buy, sell) = (fill.buy, fill.sell);
        let quantity = fill.quantity().clone();
        let plan = self.fee_model.plan_withdrawal(source, destination, &quantity)?;

        let buy_cost = fill.buy_fill.filled_notional.clone();
        let sell_proceeds = fill.sell_fill.filled_notional.clone();
        let gross_spread = &sell_proceeds - &buy_cost;
        let taker_fees = fill.taker_fees();
        let withdrawal_cost = &plan.fee * &fill.sell_fill.average_price;
        let net_profit = &gross_spread - &taker_fees - &withdrawal_cost;
        let net_profit_fraction = &net_profit / &buy_cost;

        Ok(Opportunity {
            id: Uuid::new_v4(),
            symbol: buy.market.symbol(),
            buy_market: buy.market.clone(),
            sell_market: sell.market.clone(),
            quantity,
            buy_price: fill.buy_fill.average_price.clone(),
            sell_price: fill.sell_fill.average_price.clone(),
            buy_cost,
            sell_proceeds,
            gross_spread,
            taker_fees,
            withdrawal_cost,
            network: plan.network,
            net_profit,
            net_profit_fraction,
            depth_limited: fill.depth_limited,
            buy_snapshot_at: buy.captured_at,
            sell_snapshot_at: sell.captured_at,
            detected_at: Utc::now(),
        })
    }

    /// Strictly above the threshold.
    pub fn is_profitable(&self, opportunity: &Opportunity) -> bool {
        if opportunity.net_profit_fraction > self.min_profit_threshold {
            return true;
        }
        debug!(
            "{} buy@{} sell@{}: net fraction {} below threshold {}",
            opportunity.symbol,
            opportunity.buy_exchange(),
            opportunity.sell_exchange(),
            opportunity.net_profit_fraction.round(6),
            self.min_profit_threshold
        );
        false
    }

    /// Withdrawal cost is never negative, so a fill that cannot clear the
    /// threshold before it never will after it.
    pub fn may_be_profitable(&self, fill: &DirectionFill<'_>) -> bool {
        fill.fraction_before_withdrawal() > self.min_profit_threshold
    }

    pub fn get_min_profit_threshold(&self) -> &BigDecimal {
        &self.min_profit_threshold
    }

    pub fn get_trade_size(&self) -> &TradeSize {
        &self.trade_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitrage::snapshot::build_snapshot;
    use crate::types::{Market, NetworkInfo, PriceLevel, RawOrderBook};
    use std::collections::BTreeMap;
    use std::str::FromStr;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    fn levels(raw: &[(&str, &str)]) -> Vec<PriceLevel> {
        raw.iter().map(|(p, q)| PriceLevel::new(dec(p), dec(q))).collect()
    }

    fn create_test_market(exchange: &str, taker: &str) -> Market {
        Market {
            exchange: exchange.to_string(),
            symbol_id: "BTCUSDT".to_string(),
            base: "BTC".to_string(),
            quote: "USDT".to_string(),
            taker_fee: dec(taker),
            active: true,
        }
    }

    fn create_test_snapshot(exchange: &str, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> QuoteSnapshot {
        let raw = RawOrderBook {
            bids: levels(bids),
            asks: levels(asks),
        };
        build_snapshot(&create_test_market(exchange, "0.001"), &raw, Utc::now()).unwrap()
    }

    fn create_test_currency(exchange: &str, networks: &[(&str, &str)]) -> Currency {
        let networks = networks
            .iter()
            .map(|(name, fee)| {
                (
                    name.to_string(),
                    NetworkInfo {
                        network: name.to_string(),
                        withdraw_fee: dec(fee),
                        withdraw_min: dec("0"),
                        withdraw_enabled: true,
                        deposit_enabled: true,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();
        Currency {
            exchange: exchange.to_string(),
            symbol: "BTC".to_string(),
            networks,
        }
    }

    fn create_test_detector(threshold: &str, size: TradeSize) -> ArbitrageDetector {
        ArbitrageDetector::with_parameters(dec(threshold), size, FeeModel::default())
    }

    #[test]
    fn test_profitable_spread_emits_opportunity() {
        let detector = create_test_detector("0.01", TradeSize::base(dec("5")));
        let a = create_test_snapshot("exa", &[("99", "10")], &[("100", "5"), ("101", "5")]);
        let b = create_test_snapshot("exb", &[("103", "10")], &[("104", "10")]);
        let cur_a = create_test_currency("exa", &[("BTC", "0")]);
        let cur_b = create_test_currency("exb", &[("BTC", "0")]);

        let detection = detector.detect_opportunities(
            &a,
            &b,
            &TransferMetadata {
                on_a: &cur_a,
                on_b: &cur_b,
            },
        );

        assert_eq!(detection.opportunities.len(), 1);
        let opp = &detection.opportunities[0];
        assert_eq!(opp.buy_exchange(), "exa");
        assert_eq!(opp.sell_exchange(), "exb");
        assert_eq!(opp.quantity, dec("5"));
        assert_eq!(opp.gross_spread, dec("15"));
        assert_eq!(opp.taker_fees, dec("1.015"));
        assert_eq!(opp.net_profit, dec("13.985"));
        assert_eq!(opp.net_profit_fraction, dec("0.02797"));
        assert!(!opp.depth_limited);
    }

    #[test]
    fn test_identical_books_emit_nothing() {
        let detector = create_test_detector("0", TradeSize::base(dec("1")));
        let a = create_test_snapshot("exa", &[("99", "10")], &[("100", "10")]);
        let b = create_test_snapshot("exb", &[("99", "10")], &[("100", "10")]);
        let cur_a = create_test_currency("exa", &[("BTC", "0")]);
        let cur_b = create_test_currency("exb", &[("BTC", "0")]);

        let detection = detector.detect_opportunities(
            &a,
            &b,
            &TransferMetadata {
                on_a: &cur_a,
                on_b: &cur_b,
            },
        );

        assert!(detection.opportunities.is_empty());
        assert!(detection.skipped.is_empty());
    }

    #[test]
    fn test_net_fraction_formula_with_withdrawal_fee() {
        let detector = create_test_detector("0", TradeSize::base(dec("2")));
        let buy = create_test_snapshot("exa", &[("98", "1")], &[("100", "1"), ("100.5", "3")]);
        let sell = create_test_snapshot("exb", &[("104", "1.5"), ("103", "4")], &[("105", "1")]);
        let src = create_test_currency("exa", &[("BTC", "0.01")]);
        let dst = create_test_currency("exb", &[("BTC", "0.02")]);

        let opp = detector.evaluate_direction(&buy, &sell, &src, &dst).unwrap().unwrap();

        let buy_cost = dec("100") + dec("100.5");
        let sell_proceeds = dec("104") * dec("1.5") + dec("103") * dec("0.5");
        let fees = &buy_cost * dec("0.001") + &sell_proceeds * dec("0.001");
        let withdrawal = dec("0.01") * (&sell_proceeds / dec("2"));
        let expected = (&sell_proceeds - &buy_cost - &fees - &withdrawal) / &buy_cost;

        assert_eq!(opp.buy_cost, buy_cost);
        assert_eq!(opp.sell_proceeds, sell_proceeds);
        assert_eq!(opp.withdrawal_cost, withdrawal);
        assert_eq!(opp.net_profit_fraction, expected);
        assert_eq!(opp.network, "BTC");
    }

    #[test]
    fn test_no_shared_network_skips_direction() {
        let detector = create_test_detector("0", TradeSize::base(dec("5")));
        let a = create_test_snapshot("exa", &[("99", "10")], &[("100", "10")]);
        let b = create_test_snapshot("exb", &[("110", "10")], &[("111", "10")]);
        let cur_a = create_test_currency("exa", &[("BTC", "0")]);
        let cur_b = create_test_currency("exb", &[("LIGHTNING", "0")]);

        let detection = detector.detect_opportunities(
            &a,
            &b,
            &TransferMetadata {
                on_a: &cur_a,
                on_b: &cur_b,
            },
        );

        assert!(detection.opportunities.is_empty());
        assert!(detection
            .skipped
            .iter()
            .any(|e| matches!(e, ScanError::NoSharedNetwork { .. })));
    }

    #[test]
    fn test_shallow_sell_book_limits_quantity() {
        let detector = create_test_detector("0", TradeSize::base(dec("5")));
        let buy = create_test_snapshot("exa", &[("90", "1")], &[("100", "10")]);
        let sell = create_test_snapshot("exb", &[("110", "2")], &[("120", "1")]);
        let src = create_test_currency("exa", &[("BTC", "0")]);
        let dst = create_test_currency("exb", &[("BTC", "0")]);

        let opp = detector.evaluate_direction(&buy, &sell, &src, &dst).unwrap().unwrap();
        assert!(opp.depth_limited);
        assert_eq!(opp.quantity, dec("2"));
        assert_eq!(opp.buy_cost, dec("200"));
    }

    #[test]
    fn test_quote_sized_trade() {
        let detector = create_test_detector("0", TradeSize::quote(dec("250")));
        let buy = create_test_snapshot("exa", &[("90", "1")], &[("100", "10")]);
        let sell = create_test_snapshot("exb", &[("110", "10")], &[("120", "1")]);
        let src = create_test_currency("exa", &[("BTC", "0")]);
        let dst = create_test_currency("exb", &[("BTC", "0")]);

        let opp = detector.evaluate_direction(&buy, &sell, &src, &dst).unwrap().unwrap();
        assert_eq!(opp.quantity, dec("2.5"));
        assert_eq!(opp.buy_cost, dec("250"));
        assert_eq!(opp.sell_proceeds, dec("275"));
    }

    #[test]
    fn test_one_sided_book_is_skipped() {
        let detector = create_test_detector("0", TradeSize::base(dec("1")));
        let a = create_test_snapshot("exa", &[], &[("100", "10")]);
        let b = create_test_snapshot("exb", &[("105", "10")], &[]);
        let cur_a = create_test_currency("exa", &[("BTC", "0")]);
        let cur_b = create_test_currency("exb", &[("BTC", "0")]);

        let detection = detector.detect_opportunities(
            &a,
            &b,
            &TransferMetadata {
                on_a: &cur_a,
                on_b: &cur_b,
            },
        );

        // A->B works, B->A has no asks on B
        assert_eq!(detection.opportunities.len(), 1);
        assert_eq!(detection.skipped.len(), 1);
    }

    #[test]
    fn test_prefilter_before_withdrawal() {
        let detector = create_test_detector("0.01", TradeSize::base(dec("5")));
        let a = create_test_snapshot("exa", &[("99", "10")], &[("100", "5"), ("101", "5")]);
        let b = create_test_snapshot("exb", &[("103", "10")], &[("104", "10")]);

        let forward = detector.simulate_direction(&a, &b).unwrap();
        assert_eq!(forward.base_asset(), "BTC");
        assert_eq!(forward.taker_fees(), dec("1.015"));
        assert!(detector.may_be_profitable(&forward));

        let backward = detector.simulate_direction(&b, &a).unwrap();
        assert!(!detector.may_be_profitable(&backward));
    }
}
