use bigdecimal::{BigDecimal, One, Zero};
use chrono::Utc;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    arbitrage::{
        fees::FeeModel,
        simulator::{simulate, simulate_notional},
    },
    config::RouteConfig,
    error::{ConfigError, ScanError},
    types::{Currency, QuoteSnapshot, Route, RouteEdge, TradeSide},
};

// significant digits kept on running amounts so deep paths stay cheap
const AMOUNT_PRECISION: u64 = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteNode {
    pub exchange: String,
    pub asset: String,
}

#[derive(Debug, Clone)]
enum GraphEdge {
    Trade {
        from: usize,
        to: usize,
        snapshot: usize,
        side: TradeSide,
    },
    Transfer {
        from: usize,
        to: usize,
        source: usize,
        destination: usize,
    },
}

impl GraphEdge {
    fn from(&self) -> usize {
        match self {
            GraphEdge::Trade { from, .. } | GraphEdge::Transfer { from, .. } => *from,
        }
    }

    fn to(&self) -> usize {
        match self {
            GraphEdge::Trade { to, .. } | GraphEdge::Transfer { to, .. } => *to,
        }
    }
}

/// Index arena of (exchange, asset) nodes. Trade edges come from snapshot
/// ladders, transfer edges link the same asset across exchanges when
/// currency metadata exists on both sides.
#[derive(Debug, Default)]
pub struct RouteGraph {
    nodes: Vec<RouteNode>,
    node_index: HashMap<(String, String), usize>,
    edges: Vec<GraphEdge>,
    outgoing: Vec<Vec<usize>>,
    snapshots: Vec<QuoteSnapshot>,
    currencies: Vec<Currency>,
}

impl RouteGraph {
    pub fn build(snapshots: Vec<QuoteSnapshot>, currencies: Vec<Currency>) -> Self {
        let mut graph = Self::default();

        for snapshot in snapshots {
            let base = graph.intern(&snapshot.exchange, &snapshot.market.base);
            let quote = graph.intern(&snapshot.exchange, &snapshot.market.quote);
            let index = graph.snapshots.len();

            if !snapshot.asks.is_empty() {
                graph.push_edge(GraphEdge::Trade {
                    from: quote,
                    to: base,
                    snapshot: index,
                    side: TradeSide::Buy,
                });
            }
            if !snapshot.bids.is_empty() {
                graph.push_edge(GraphEdge::Trade {
                    from: base,
                    to: quote,
                    snapshot: index,
                    side: TradeSide::Sell,
                });
            }
            graph.snapshots.push(snapshot);
        }

        graph.currencies = currencies;
        for source in 0..graph.currencies.len() {
            for destination in 0..graph.currencies.len() {
                let (src, dst) = (&graph.currencies[source], &graph.currencies[destination]);
                if src.exchange == dst.exchange || !src.symbol.eq_ignore_ascii_case(&dst.symbol) {
                    continue;
                }
                let from = graph.node_id(&src.exchange, &src.symbol);
                let to = graph.node_id(&dst.exchange, &dst.symbol);
                if let (Some(from), Some(to)) = (from, to) {
                    graph.push_edge(GraphEdge::Transfer {
                        from,
                        to,
                        source,
                        destination,
                    });
                }
            }
        }

        debug!(
            "Route graph built: {} nodes, {} edges",
            graph.nodes.len(),
            graph.edges.len()
        );
        graph
    }

    pub fn node_id(&self, exchange: &str, asset: &str) -> Option<usize> {
        self.node_index
            .get(&(exchange.to_lowercase(), asset.to_uppercase()))
            .copied()
    }

    pub fn node(&self, id: usize) -> Option<&RouteNode> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn intern(&mut self, exchange: &str, asset: &str) -> usize {
        let key = (exchange.to_lowercase(), asset.to_uppercase());
        if let Some(&id) = self.node_index.get(&key) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(RouteNode {
            exchange: key.0.clone(),
            asset: key.1.clone(),
        });
        self.outgoing.push(Vec::new());
        self.node_index.insert(key, id);
        id
    }

    fn push_edge(&mut self, edge: GraphEdge) {
        let id = self.edges.len();
        self.outgoing[edge.from()].push(id);
        self.edges.push(edge);
    }
}

#[derive(Debug, Default)]
pub struct RouteSearchOutcome {
    pub routes: Vec<Route>,
    pub paths_evaluated: usize,
    pub skipped_edges: usize,
    pub pruned: usize,
}

struct Step {
    edge: RouteEdge,
    to: usize,
    amount_out: BigDecimal,
    efficiency: BigDecimal,
}

struct SearchContext {
    start: usize,
    target_asset: Option<String>,
}

/// `prune_threshold` bounds path efficiency: the product over edges of actual
/// output divided by the output at the best level with no fees.
pub struct RouteEvaluator {
    max_depth: usize,
    top_k: usize,
    prune_threshold: BigDecimal,
    min_profit_threshold: BigDecimal,
    start_amount: BigDecimal,
    fee_model: FeeModel,
}

impl RouteEvaluator {
    pub fn new(config: &RouteConfig, min_profit_threshold: BigDecimal, fee_model: FeeModel) -> Result<Self, ConfigError> {
        Ok(Self {
            max_depth: config.max_depth,
            top_k: config.top_k,
            prune_threshold: config.prune_threshold()?,
            min_profit_threshold,
            start_amount: config.start_amount()?,
            fee_model,
        })
    }

    pub fn with_parameters(
        max_depth: usize,
        top_k: usize,
        prune_threshold: BigDecimal,
        min_profit_threshold: BigDecimal,
        start_amount: BigDecimal,
        fee_model: FeeModel,
    ) -> Self {
        Self {
            max_depth,
            top_k,
            prune_threshold,
            min_profit_threshold,
            start_amount,
            fee_model,
        }
    }

    /// Depth-first search from `(start_exchange, start_asset)`. A path closes as
    /// a loop on the first node holding the start asset, on any exchange. Loops
    /// and, when `target_asset` is given, paths ending on that asset are
    /// emitted if their return beats `1 + min_profit_threshold`.
    pub fn find_routes(
        &self,
        graph: &RouteGraph,
        start_exchange: &str,
        start_asset: &str,
        target_asset: Option<&str>,
    ) -> RouteSearchOutcome {
        let mut outcome = RouteSearchOutcome::default();

        let start = match graph.node_id(start_exchange, start_asset) {
            Some(id) => id,
            None => {
                debug!("No {} node on {}", start_asset, start_exchange);
                return outcome;
            }
        };

        let context = SearchContext {
            start,
            target_asset: target_asset.map(|t| t.to_uppercase()),
        };
        let mut visited = vec![false; graph.node_count()];
        visited[start] = true;
        let mut path = Vec::with_capacity(self.max_depth);

        self.explore(
            graph,
            &context,
            start,
            &self.start_amount,
            &BigDecimal::one(),
            &mut path,
            &mut visited,
            &mut outcome,
        );

        outcome
            .routes
            .sort_by(|a, b| b.cumulative_return.cmp(&a.cumulative_return));

        info!(
            "Route search from {}@{}: {} routes, {} paths evaluated, {} pruned",
            start_asset,
            start_exchange,
            outcome.routes.len(),
            outcome.paths_evaluated,
            outcome.pruned
        );
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn explore(
        &self,
        graph: &RouteGraph,
        context: &SearchContext,
        node: usize,
        amount: &BigDecimal,
        efficiency: &BigDecimal,
        path: &mut Vec<RouteEdge>,
        visited: &mut Vec<bool>,
        outcome: &mut RouteSearchOutcome,
    ) {
        if path.len() >= self.max_depth {
            return;
        }

        let mut steps: Vec<Step> = Vec::new();
        for &edge_id in &graph.outgoing[node] {
            match self.step(graph, edge_id, amount) {
                Ok(step) => steps.push(step),
                Err(e) => {
                    debug!("Skipping edge {}: {}", edge_id, e);
                    outcome.skipped_edges += 1;
                }
            }
        }
        // stable sort keeps insertion order among equal efficiencies
        steps.sort_by(|a, b| b.efficiency.cmp(&a.efficiency));

        let start_asset = graph.nodes[context.start].asset.as_str();
        for step in steps.into_iter().take(self.top_k) {
            let next = step.to;
            // any node holding the start asset closes the loop, on whichever exchange
            let closes_loop = path.len() + 1 >= 2 && graph.nodes[next].asset == start_asset;
            if visited[next] && !closes_loop {
                continue;
            }

            let path_efficiency = (efficiency * &step.efficiency).with_prec(AMOUNT_PRECISION);
            if path_efficiency < self.prune_threshold {
                outcome.pruned += 1;
                continue;
            }

            let reaches_target = !closes_loop
                && context
                    .target_asset
                    .as_deref()
                    .map(|target| graph.nodes[next].asset == target)
                    .unwrap_or(false);

            path.push(step.edge);
            if closes_loop || reaches_target {
                if path.len() >= 2 {
                    outcome.paths_evaluated += 1;
                    if let Some(route) =
                        self.evaluate_path(graph, context, path, &step.amount_out, &path_efficiency, closes_loop)
                    {
                        outcome.routes.push(route);
                    }
                }
            } else {
                visited[next] = true;
                self.explore(
                    graph,
                    context,
                    next,
                    &step.amount_out,
                    &path_efficiency,
                    path,
                    visited,
                    outcome,
                );
                visited[next] = false;
            }
            path.pop();
        }
    }

    fn step(&self, graph: &RouteGraph, edge_id: usize, amount_in: &BigDecimal) -> Result<Step, ScanError> {
        match &graph.edges[edge_id] {
            GraphEdge::Trade {
                to,
                snapshot,
                side,
                ..
            } => {
                let snapshot = &graph.snapshots[*snapshot];
                let market = &snapshot.market;
                let ladder = snapshot.ladder(side.consumes());
                let fill = match side {
                    TradeSide::Buy => simulate_notional(ladder, *side, amount_in)?,
                    TradeSide::Sell => simulate(ladder, *side, amount_in)?,
                };
                if fill.exhausted {
                    return Err(ScanError::InvalidSimulationInput(format!(
                        "{} on {} too shallow to {} {}",
                        market.symbol(),
                        snapshot.exchange,
                        side,
                        amount_in
                    )));
                }
                let best_price = ladder
                    .best()
                    .map(|level| level.price.clone())
                    .unwrap_or_else(BigDecimal::zero);

                let (received, ideal, from_asset, to_asset) = match side {
                    TradeSide::Buy => (
                        fill.filled_quantity.clone(),
                        amount_in / &best_price,
                        &market.quote,
                        &market.base,
                    ),
                    TradeSide::Sell => (
                        fill.filled_notional.clone(),
                        amount_in * &best_price,
                        &market.base,
                        &market.quote,
                    ),
                };
                let fee_paid = &received * &market.taker_fee;
                let amount_out = (&received - &fee_paid).with_prec(AMOUNT_PRECISION);
                let efficiency = (&amount_out / &ideal).with_prec(AMOUNT_PRECISION);

                Ok(Step {
                    edge: RouteEdge::Trade {
                        exchange: snapshot.exchange.clone(),
                        symbol: market.symbol(),
                        side: *side,
                        from_asset: from_asset.clone(),
                        to_asset: to_asset.clone(),
                        amount_in: amount_in.clone(),
                        amount_out: amount_out.clone(),
                        average_price: fill.average_price,
                        fee_paid,
                    },
                    to: *to,
                    amount_out,
                    efficiency,
                })
            }
            GraphEdge::Transfer {
                to,
                source,
                destination,
                ..
            } => {
                let plan = self.fee_model.plan_withdrawal(
                    &graph.currencies[*source],
                    &graph.currencies[*destination],
                    amount_in,
                )?;
                let amount_out = amount_in - &plan.fee;
                if amount_out <= BigDecimal::zero() {
                    return Err(ScanError::InvalidSimulationInput(format!(
                        "withdrawal fee {} exceeds {} {}",
                        plan.fee, amount_in, plan.asset
                    )));
                }
                let efficiency = (&amount_out / amount_in).with_prec(AMOUNT_PRECISION);

                Ok(Step {
                    edge: RouteEdge::Transfer {
                        asset: plan.asset,
                        from_exchange: plan.from_exchange,
                        to_exchange: plan.to_exchange,
                        network: plan.network,
                        amount_in: amount_in.clone(),
                        amount_out: amount_out.clone(),
                        fee: plan.fee,
                    },
                    to: *to,
                    amount_out,
                    efficiency,
                })
            }
        }
    }

    fn evaluate_path(
        &self,
        graph: &RouteGraph,
        context: &SearchContext,
        path: &[RouteEdge],
        end_amount: &BigDecimal,
        efficiency: &BigDecimal,
        closed: bool,
    ) -> Option<Route> {
        let cumulative_return = (end_amount / &self.start_amount).with_prec(AMOUNT_PRECISION);
        let required = BigDecimal::one() + &self.min_profit_threshold;
        if cumulative_return <= required {
            return None;
        }

        let start = &graph.nodes[context.start];
        let end_asset = path
            .last()
            .map(|edge| match edge {
                RouteEdge::Trade { to_asset, .. } => to_asset.clone(),
                RouteEdge::Transfer { asset, .. } => asset.clone(),
            })
            .unwrap_or_else(|| start.asset.clone());

        Some(Route {
            id: Uuid::new_v4(),
            start_exchange: start.exchange.clone(),
            start_asset: start.asset.clone(),
            end_asset,
            closed,
            edges: path.to_vec(),
            start_amount: self.start_amount.clone(),
            end_amount: end_amount.clone(),
            cumulative_return,
            efficiency: efficiency.clone(),
            detected_at: Utc::now(),
        })
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

    fn create_test_snapshot(exchange: &str, base: &str, quote: &str, bid: &str, ask: &str) -> QuoteSnapshot {
        let market = Market {
            exchange: exchange.to_string(),
            symbol_id: format!("{}{}", base, quote),
            base: base.to_string(),
            quote: quote.to_string(),
            taker_fee: dec("0.001"),
            active: true,
        };
        let raw = RawOrderBook {
            bids: vec![PriceLevel::new(dec(bid), dec("100000"))],
            asks: vec![PriceLevel::new(dec(ask), dec("100000"))],
        };
        build_snapshot(&market, &raw, Utc::now()).unwrap()
    }

    fn create_test_currency(exchange: &str, symbol: &str, fee: &str) -> Currency {
        let mut networks = BTreeMap::new();
        networks.insert(
            "TRC20".to_string(),
            NetworkInfo {
                network: "TRC20".to_string(),
                withdraw_fee: dec(fee),
                withdraw_min: dec("0"),
                withdraw_enabled: true,
                deposit_enabled: true,
            },
        );
        Currency {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            networks,
        }
    }

    fn create_test_evaluator() -> RouteEvaluator {
        RouteEvaluator::with_parameters(3, 8, dec("0.9"), dec("0.005"), dec("100"), FeeModel::default())
    }

    #[test]
    fn test_profitable_triangle_emits_single_route() {
        let graph = RouteGraph::build(
            vec![
                create_test_snapshot("exa", "BTC", "USDT", "99", "100"),
                create_test_snapshot("exa", "ETH", "BTC", "0.049", "0.05"),
                create_test_snapshot("exa", "ETH", "USDT", "5.2", "5.3"),
            ],
            vec![],
        );
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 6);

        let outcome = create_test_evaluator().find_routes(&graph, "exa", "USDT", None);

        assert_eq!(outcome.routes.len(), 1);
        let route = &outcome.routes[0];
        assert_eq!(route.depth(), 3);
        assert!(route.closed);
        assert_eq!(route.start_asset, "USDT");
        assert_eq!(route.end_asset, "USDT");
        assert!(route.cumulative_return > dec("1.03"));
        assert!(route.cumulative_return < dec("1.04"));
        assert!(route.efficiency <= BigDecimal::one());
    }

    #[test]
    fn test_unprofitable_triangle_emits_nothing() {
        let graph = RouteGraph::build(
            vec![
                create_test_snapshot("exa", "BTC", "USDT", "99", "100"),
                create_test_snapshot("exa", "ETH", "BTC", "0.049", "0.05"),
                create_test_snapshot("exa", "ETH", "USDT", "4.9", "5"),
            ],
            vec![],
        );

        let outcome = create_test_evaluator().find_routes(&graph, "exa", "USDT", None);
        assert!(outcome.routes.is_empty());
        assert!(outcome.paths_evaluated > 0);
    }

    fn create_cross_exchange_graph() -> RouteGraph {
        RouteGraph::build(
            vec![
                create_test_snapshot("exa", "BTC", "USDT", "99", "100"),
                create_test_snapshot("exb", "BTC", "USDT", "105", "106"),
            ],
            vec![
                create_test_currency("exa", "BTC", "0.0001"),
                create_test_currency("exb", "BTC", "0.0001"),
                create_test_currency("exa", "USDT", "1"),
                create_test_currency("exb", "USDT", "1"),
            ],
        )
    }

    #[test]
    fn test_cross_exchange_loop_closes_on_start_asset() {
        let graph = create_cross_exchange_graph();

        let outcome = create_test_evaluator().find_routes(&graph, "exa", "USDT", None);

        assert_eq!(outcome.routes.len(), 1);
        let route = &outcome.routes[0];
        assert_eq!(route.depth(), 3);
        assert!(route.closed);
        assert_eq!(route.end_asset, "USDT");
        assert!(matches!(&route.edges[1], RouteEdge::Transfer { network, .. } if network == "TRC20"));
        assert!(matches!(&route.edges[2], RouteEdge::Trade { exchange, .. } if exchange == "exb"));
        assert!(route.cumulative_return > dec("1.04"));
        assert!(route.cumulative_return < dec("1.05"));
    }

    #[test]
    fn test_deeper_search_stops_at_first_start_asset_node() {
        let graph = create_cross_exchange_graph();
        let evaluator = RouteEvaluator::with_parameters(4, 8, dec("0.9"), dec("0.005"), dec("100"), FeeModel::default());

        let outcome = evaluator.find_routes(&graph, "exa", "USDT", None);

        assert_eq!(outcome.routes.len(), 1);
        assert_eq!(outcome.routes[0].depth(), 3);
    }

    #[test]
    fn test_opening_transfer_of_start_asset_does_not_close() {
        let graph = create_cross_exchange_graph();
        let evaluator = RouteEvaluator::with_parameters(2, 8, dec("0.9"), dec("-1"), dec("100"), FeeModel::default());

        let outcome = evaluator.find_routes(&graph, "exa", "USDT", None);

        // buy-then-sell on exa and the USDT round trip; a single transfer never closes
        assert_eq!(outcome.routes.len(), 2);
        assert!(outcome.routes.iter().all(|route| route.depth() == 2));
    }

    #[test]
    fn test_revisits_are_not_counted_as_pruned() {
        let graph = RouteGraph::build(
            vec![
                create_test_snapshot("exa", "BTC", "USDT", "99", "100"),
                create_test_snapshot("exa", "ETH", "BTC", "0.049", "0.05"),
                create_test_snapshot("exa", "ETH", "USDT", "5.2", "5.3"),
            ],
            vec![],
        );
        // two taker fees pass, three do not
        let evaluator = RouteEvaluator::with_parameters(3, 8, dec("0.9975"), dec("0.005"), dec("100"), FeeModel::default());

        let outcome = evaluator.find_routes(&graph, "exa", "USDT", None);

        assert!(outcome.routes.is_empty());
        assert_eq!(outcome.paths_evaluated, 2);
        assert_eq!(outcome.pruned, 2);
    }

    #[test]
    fn test_directional_route_to_target() {
        let graph = RouteGraph::build(
            vec![
                create_test_snapshot("exa", "BTC", "USDT", "99", "100"),
                create_test_snapshot("exa", "BTC", "USDC", "104", "105"),
            ],
            vec![],
        );

        let outcome = create_test_evaluator().find_routes(&graph, "exa", "USDT", Some("usdc"));

        assert_eq!(outcome.routes.len(), 1);
        let route = &outcome.routes[0];
        assert!(!route.closed);
        assert_eq!(route.end_asset, "USDC");
        assert_eq!(route.depth(), 2);
    }

    #[test]
    fn test_low_efficiency_paths_are_pruned() {
        let graph = RouteGraph::build(
            vec![
                create_test_snapshot("exa", "BTC", "USDT", "99", "100"),
                create_test_snapshot("exa", "ETH", "BTC", "0.049", "0.05"),
                create_test_snapshot("exa", "ETH", "USDT", "5.2", "5.3"),
            ],
            vec![],
        );
        let strict = RouteEvaluator::with_parameters(3, 8, dec("0.9995"), dec("0.005"), dec("100"), FeeModel::default());

        let outcome = strict.find_routes(&graph, "exa", "USDT", None);
        assert!(outcome.routes.is_empty());
        assert!(outcome.pruned > 0);
    }

    #[test]
    fn test_unknown_start_node() {
        let graph = RouteGraph::build(vec![create_test_snapshot("exa", "BTC", "USDT", "99", "100")], vec![]);

        let outcome = create_test_evaluator().find_routes(&graph, "exb", "USDT", None);
        assert!(outcome.routes.is_empty());
        assert_eq!(outcome.paths_evaluated, 0);
    }
}
