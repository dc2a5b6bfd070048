use bigdecimal::BigDecimal;
use tabled::{Table, Tabled};

use crate::types::{Opportunity, Route};

#[derive(Tabled)]
struct OpportunityRow {
    #[tabled(rename = "SYMBOL")]
    symbol: String,
    #[tabled(rename = "BUY@")]
    buy_exchange: String,
    #[tabled(rename = "SELL@")]
    sell_exchange: String,
    #[tabled(rename = "NET %")]
    net_percent: String,
    #[tabled(rename = "QTY")]
    quantity: String,
    #[tabled(rename = "BUY PX")]
    buy_price: String,
    #[tabled(rename = "SELL PX")]
    sell_price: String,
    #[tabled(rename = "NETWORK")]
    network: String,
}

impl From<&Opportunity> for OpportunityRow {
    fn from(opp: &Opportunity) -> Self {
        let network = if opp.depth_limited {
            format!("{} (depth-limited)", opp.network)
        } else {
            opp.network.clone()
        };
        Self {
            symbol: opp.symbol.clone(),
            buy_exchange: opp.buy_exchange().to_string(),
            sell_exchange: opp.sell_exchange().to_string(),
            net_percent: format_percent(&opp.net_profit_fraction),
            quantity: opp.quantity.round(8).to_string(),
            buy_price: opp.buy_price.round(8).to_string(),
            sell_price: opp.sell_price.round(8).to_string(),
            network,
        }
    }
}

#[derive(Tabled)]
struct RouteRow {
    #[tabled(rename = "START")]
    start: String,
    #[tabled(rename = "KIND")]
    kind: &'static str,
    #[tabled(rename = "END")]
    end_asset: String,
    #[tabled(rename = "RETURN")]
    cumulative_return: String,
    #[tabled(rename = "HOPS")]
    hops: usize,
    #[tabled(rename = "PATH")]
    path: String,
}

impl From<&Route> for RouteRow {
    fn from(route: &Route) -> Self {
        Self {
            start: format!("{}@{}", route.start_asset, route.start_exchange),
            kind: if route.closed { "loop" } else { "to" },
            end_asset: route.end_asset.clone(),
            cumulative_return: route.cumulative_return.round(6).to_string(),
            hops: route.depth(),
            path: route.describe(),
        }
    }
}

/// Fraction as a percentage with three decimals, e.g. `0.02797` -> `2.797`.
pub fn format_percent(fraction: &BigDecimal) -> String {
    (fraction * BigDecimal::from(100)).round(3).with_scale(3).to_string()
}

/// Opportunities sorted by net fraction, best first, one row each.
pub fn opportunity_table(opportunities: &[Opportunity]) -> String {
    let mut rows: Vec<&Opportunity> = opportunities.iter().collect();
    rows.sort_by(|a, b| b.net_profit_fraction.cmp(&a.net_profit_fraction));

    Table::new(rows.into_iter().map(OpportunityRow::from)).to_string()
}

pub fn route_table(routes: &[Route]) -> String {
    Table::new(routes.iter().map(RouteRow::from)).to_string()
}
