use bigdecimal::{BigDecimal, Zero};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

use crate::{
    error::ScanError,
    types::{Currency, FillResult, NetworkInfo, WithdrawalPlan},
};

pub const DEFAULT_TAKER_FEE: &str = "0.001";
pub const MAX_TAKER_FEE: &str = "0.02";

/// Clamps an exchange-reported taker rate into `[0, MAX_TAKER_FEE]`, falling
/// back to `default` when the exchange reports nothing.
pub fn effective_taker_rate(reported: Option<BigDecimal>, default: &BigDecimal) -> BigDecimal {
    let max = BigDecimal::from_str(MAX_TAKER_FEE).unwrap_or_else(|_| BigDecimal::zero());
    let rate = reported.unwrap_or_else(|| default.clone());
    if rate < BigDecimal::zero() {
        BigDecimal::zero()
    } else if rate > max {
        max
    } else {
        rate
    }
}

pub fn taker_fee(fill: &FillResult, rate: &BigDecimal) -> BigDecimal {
    &fill.filled_notional * rate
}

pub struct FeeModel {
    // asset -> canonical network id
    network_overrides: HashMap<String, String>,
}

impl FeeModel {
    pub fn new(network_overrides: HashMap<String, String>) -> Self {
        let network_overrides = network_overrides
            .into_iter()
            .map(|(asset, network)| (asset.to_uppercase(), network.to_uppercase()))
            .collect();
        Self { network_overrides }
    }

    /// Picks the withdrawal network for moving `quantity` of an asset from
    /// `source` to `destination`. The fee is the source exchange's fee.
    pub fn plan_withdrawal(
        &self,
        source: &Currency,
        destination: &Currency,
        quantity: &BigDecimal,
    ) -> Result<WithdrawalPlan, ScanError> {
        let eligible: Vec<&NetworkInfo> = source
            .networks
            .values()
            .filter(|net| net.withdraw_enabled && net.withdraw_min <= *quantity)
            .filter(|net| {
                destination
                    .networks
                    .get(&net.network)
                    .map(|dst| dst.deposit_enabled)
                    .unwrap_or(false)
            })
            .collect();

        let override_choice = self
            .network_overrides
            .get(&source.symbol.to_uppercase())
            .and_then(|preferred| eligible.iter().find(|net| &net.network == preferred))
            .copied();

        let chosen = override_choice
            .or_else(|| {
                eligible
                    .iter()
                    .min_by(|a, b| {
                        a.withdraw_fee
                            .cmp(&b.withdraw_fee)
                            .then_with(|| a.network.cmp(&b.network))
                    })
                    .copied()
            })
            .ok_or_else(|| ScanError::NoSharedNetwork {
                asset: source.symbol.clone(),
                from: source.exchange.clone(),
                to: destination.exchange.clone(),
            })?;

        debug!(
            "Withdrawal plan for {} {} -> {}: {} (fee {})",
            source.symbol, source.exchange, destination.exchange, chosen.network, chosen.withdraw_fee
        );

        Ok(WithdrawalPlan {
            asset: source.symbol.clone(),
            from_exchange: source.exchange.clone(),
            to_exchange: destination.exchange.clone(),
            network: chosen.network.clone(),
            fee: chosen.withdraw_fee.clone(),
            min_amount: chosen.withdraw_min.clone(),
        })
    }
}

impl Default for FeeModel {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SizeUnit, TradeSide};
    use std::collections::BTreeMap;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    fn create_test_network(network: &str, fee: &str, min: &str) -> NetworkInfo {
        NetworkInfo {
            network: network.to_string(),
            withdraw_fee: dec(fee),
            withdraw_min: dec(min),
            withdraw_enabled: true,
            deposit_enabled: true,
        }
    }

    fn create_test_currency(exchange: &str, networks: Vec<NetworkInfo>) -> Currency {
        Currency {
            exchange: exchange.to_string(),
            symbol: "USDT".to_string(),
            networks: networks
                .into_iter()
                .map(|n| (n.network.clone(), n))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_taker_fee_on_fill_notional() {
        let fill = FillResult {
            side: TradeSide::Buy,
            requested: dec("5"),
            requested_unit: SizeUnit::Base,
            average_price: dec("100"),
            filled_quantity: dec("5"),
            filled_notional: dec("500"),
            exhausted: false,
            levels_consumed: 1,
        };

        assert_eq!(taker_fee(&fill, &dec("0.001")), dec("0.5"));
    }

    #[test]
    fn test_effective_taker_rate_clamps() {
        let default = dec(DEFAULT_TAKER_FEE);
        assert_eq!(effective_taker_rate(None, &default), dec("0.001"));
        assert_eq!(effective_taker_rate(Some(dec("-0.01")), &default), dec("0"));
        assert_eq!(effective_taker_rate(Some(dec("0.5")), &default), dec("0.02"));
        assert_eq!(effective_taker_rate(Some(dec("0.002")), &default), dec("0.002"));
    }

    #[test]
    fn test_cheapest_shared_network_wins() {
        let source = create_test_currency(
            "binance",
            vec![
                create_test_network("ERC20", "4", "10"),
                create_test_network("TRC20", "1", "10"),
                create_test_network("SOL", "0.5", "10"),
            ],
        );
        let destination = create_test_currency(
            "kucoin",
            vec![create_test_network("ERC20", "3", "10"), create_test_network("TRC20", "2", "10")],
        );

        let plan = FeeModel::default()
            .plan_withdrawal(&source, &destination, &dec("100"))
            .unwrap();
        assert_eq!(plan.network, "TRC20");
        assert_eq!(plan.fee, dec("1"));
        assert_eq!(plan.from_exchange, "binance");
        assert_eq!(plan.to_exchange, "kucoin");
    }

    #[test]
    fn test_tie_broken_by_network_id_deterministically() {
        let source = create_test_currency(
            "binance",
            vec![create_test_network("TRC20", "1", "0"), create_test_network("BEP20", "1", "0")],
        );
        let destination = source.clone();
        let model = FeeModel::default();

        for _ in 0..5 {
            let plan = model.plan_withdrawal(&source, &destination, &dec("10")).unwrap();
            assert_eq!(plan.network, "BEP20");
        }
    }

    #[test]
    fn test_no_shared_network() {
        let source = create_test_currency("binance", vec![create_test_network("ERC20", "4", "0")]);
        let destination = create_test_currency("kucoin", vec![create_test_network("TRC20", "1", "0")]);

        let err = FeeModel::default()
            .plan_withdrawal(&source, &destination, &dec("10"))
            .unwrap_err();
        assert!(matches!(err, ScanError::NoSharedNetwork { .. }));
    }

    #[test]
    fn test_disabled_or_below_minimum_networks_excluded() {
        let mut disabled = create_test_network("TRC20", "1", "0");
        disabled.withdraw_enabled = false;
        let source = create_test_currency(
            "binance",
            vec![disabled, create_test_network("ERC20", "4", "50")],
        );
        let destination = create_test_currency(
            "kucoin",
            vec![create_test_network("TRC20", "1", "0"), create_test_network("ERC20", "4", "0")],
        );

        let model = FeeModel::default();
        assert!(model.plan_withdrawal(&source, &destination, &dec("10")).is_err());
        assert_eq!(
            model.plan_withdrawal(&source, &destination, &dec("60")).unwrap().network,
            "ERC20"
        );
    }

    #[test]
    fn test_override_applies_only_when_eligible() {
        let source = create_test_currency(
            "binance",
            vec![create_test_network("ERC20", "4", "0"), create_test_network("TRC20", "1", "0")],
        );
        let destination = source.clone();

        let mut overrides = HashMap::new();
        overrides.insert("usdt".to_string(), "erc20".to_string());
        let model = FeeModel::new(overrides);
        assert_eq!(
            model.plan_withdrawal(&source, &destination, &dec("10")).unwrap().network,
            "ERC20"
        );

        let mut overrides = HashMap::new();
        overrides.insert("USDT".to_string(), "SOL".to_string());
        let model = FeeModel::new(overrides);
        assert_eq!(
            model.plan_withdrawal(&source, &destination, &dec("10")).unwrap().network,
            "TRC20"
        );
    }
}
