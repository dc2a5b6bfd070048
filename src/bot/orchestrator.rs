use anyhow::{anyhow, Result};
use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::{
    arbitrage::{
        build_snapshot, ArbitrageDetector, DirectionFill, FeeModel, RouteEvaluator, RouteGraph,
    },
    bot::metrics::ScanMetrics,
    cache::{CacheConnection, MetadataCache, MetadataStore, SqliteCache},
    config::Config,
    error::ScanError,
    exchange::{create_exchange_clients, ExchangeClient, ExchangeManager},
    notify::NotificationSink,
    types::{Currency, Market, Opportunity, QuoteSnapshot, Route},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Simulating,
    FeeAdjusting,
    Emitting,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub opportunities: Vec<Opportunity>,
    pub pairs_scanned: usize,
    pub skipped: Vec<ScanError>,
    pub notified: usize,
}

#[derive(Debug)]
pub struct FetchSummary {
    pub exchange: String,
    pub requested: usize,
    pub fetched: usize,
}

struct FetchOutcome {
    exchange: String,
    elapsed_ms: f64,
    snapshot: Result<QuoteSnapshot, ScanError>,
}

pub struct ArbitrageScanner {
    config: Config,
    exchanges: ExchangeManager,
    metadata: MetadataStore,
    detector: ArbitrageDetector,
    route_evaluator: RouteEvaluator,
    notifications: NotificationSink,
    metrics: ScanMetrics,
    fetch_limiter: Arc<Semaphore>,
    phase: CyclePhase,
}

impl ArbitrageScanner {
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing Arbitrage Scanner");

        let exchanges = create_exchange_clients(&config)?;
        if exchanges.client_count() == 0 {
            return Err(anyhow!("None of the configured exchanges is supported"));
        }

        let connection = CacheConnection::new(&config.cache.db_path).await?;
        let cache = SqliteCache::new(connection.pool().clone());
        match cache.purge_expired().await {
            Ok(purged) if purged > 0 => info!("Purged {} expired cache entries", purged),
            Ok(_) => {}
            Err(e) => warn!("Failed to purge expired cache entries: {}", e),
        }

        let notifications = NotificationSink::from_config(&config.notify);
        Self::with_components(config, exchanges, Arc::new(cache), notifications)
    }

    pub fn with_components(
        config: Config,
        exchanges: ExchangeManager,
        cache: Arc<dyn MetadataCache>,
        notifications: NotificationSink,
    ) -> Result<Self> {
        let fee_model = FeeModel::new(config.networks.overrides.clone());
        let detector = ArbitrageDetector::new(&config.scanner, fee_model)?;
        let route_evaluator = RouteEvaluator::new(
            &config.routes,
            config.scanner.min_profit_threshold()?,
            FeeModel::new(config.networks.overrides.clone()),
        )?;

        Ok(Self {
            metadata: MetadataStore::new(cache, &config.cache),
            fetch_limiter: Arc::new(Semaphore::new(config.scanner.concurrency.max(1))),
            exchanges,
            detector,
            route_evaluator,
            notifications,
            metrics: ScanMetrics::new(),
            phase: CyclePhase::Idle,
            config,
        })
    }

    pub fn metrics(&self) -> &ScanMetrics {
        &self.metrics
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    fn enter(&mut self, phase: CyclePhase) {
        debug!("Cycle phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn client(&self, name: &str) -> Result<Arc<dyn ExchangeClient>> {
        self.exchanges
            .get(name)
            .ok_or_else(|| anyhow!("Exchange {} is not configured", name))
    }

    /// Forces a market refresh on every configured exchange.
    pub async fn update_markets(&self) -> Vec<(String, Result<usize>)> {
        let mut results = Vec::new();
        for client in self.exchanges.clients() {
            let result = self.metadata.refresh_markets(client.as_ref()).await.map(|m| m.len());
            match &result {
                Ok(count) => info!("Loaded markets for {}: {} symbols", client.name(), count),
                Err(e) => warn!("Failed loading markets for {}: {}", client.name(), e),
            }
            results.push((client.name().to_string(), result));
        }
        results
    }

    pub async fn dump_markets(&self, exchanges: &[String]) -> Result<BTreeMap<String, Vec<Market>>> {
        let names = if exchanges.is_empty() {
            self.exchanges.names()
        } else {
            exchanges.to_vec()
        };

        let mut dump = BTreeMap::new();
        for name in names {
            let client = match self.client(&name) {
                Ok(client) => client,
                Err(e) => {
                    warn!("{}", e);
                    continue;
                }
            };
            match self.metadata.markets(client.as_ref()).await {
                Ok(markets) => {
                    info!("{}: {} markets", client.name(), markets.len());
                    dump.insert(client.name().to_string(), markets);
                }
                Err(e) => warn!("{}: failed to load markets: {}", client.name(), e),
            }
        }
        Ok(dump)
    }

    /// Fetches up to `sample` order books (0 = all active markets) and counts
    /// the ones with both sides populated.
    pub async fn fetch_orderbooks(&mut self, exchange: &str, sample: usize) -> Result<FetchSummary> {
        let client = self.client(exchange)?;
        let mut markets: Vec<Market> = self
            .metadata
            .markets(client.as_ref())
            .await?
            .into_iter()
            .filter(|m| m.active)
            .collect();
        markets.sort_by(|a, b| a.symbol().cmp(&b.symbol()));
        if sample > 0 {
            markets.truncate(sample);
        }

        let outcomes = self.fetch_snapshots(&client, &markets).await;
        let fetched = outcomes
            .iter()
            .filter(|o| matches!(&o.snapshot, Ok(s) if !s.bids.is_empty() && !s.asks.is_empty()))
            .count();
        for outcome in &outcomes {
            self.metrics
                .record_fetch(&outcome.exchange, outcome.snapshot.is_ok(), outcome.elapsed_ms);
        }

        Ok(FetchSummary {
            exchange: client.name().to_string(),
            requested: markets.len(),
            fetched,
        })
    }

    pub async fn watch(&mut self, a: &str, b: &str) -> Result<()> {
        let seconds = self.config.scanner.check_interval_seconds.max(1);
        let mut ticker = interval(Duration::from_secs(seconds));
        let mut cycle_count = 0u64;

        info!("Watching {} <-> {} every {} seconds", a, b, seconds);

        loop {
            ticker.tick().await;
            cycle_count += 1;
            debug!("Starting scan cycle #{}", cycle_count);

            match self.scan_two_exchanges(a, b).await {
                Ok(report) => {
                    info!(
                        "Scan cycle #{} completed: {} pairs, {} opportunities",
                        cycle_count,
                        report.pairs_scanned,
                        report.opportunities.len()
                    );
                    if !report.opportunities.is_empty() {
                        println!("{}", crate::report::opportunity_table(&report.opportunities));
                    }
                }
                Err(e) => {
                    error!("Error in scan cycle #{}: {}", cycle_count, e);
                    let backoff = Duration::from_secs(seconds);
                    warn!("Backing off for {:?} due to error", backoff);
                    sleep(backoff).await;
                }
            }

            info!("{}", self.metrics.generate_report());
        }
    }

    /// One full cycle between two exchanges: fetch every common symbol on
    /// both, simulate both directions, fee-adjust and emit.
    pub async fn scan_two_exchanges(&mut self, a: &str, b: &str) -> Result<ScanReport> {
        let client_a = self.client(a)?;
        let client_b = self.client(b)?;
        let mut report = ScanReport::default();

        let (markets_a, markets_b) = futures::join!(
            self.metadata.markets(client_a.as_ref()),
            self.metadata.markets(client_b.as_ref())
        );
        let pairs = self.common_markets(&markets_a?, &markets_b?);
        if pairs.is_empty() {
            warn!("No common symbols between {} and {}", client_a.name(), client_b.name());
            self.metrics.complete_cycle(0);
            return Ok(report);
        }
        info!(
            "Common symbols for {}-{}: {}",
            client_a.name(),
            client_b.name(),
            pairs.len()
        );

        self.enter(CyclePhase::Fetching);
        let markets_a: Vec<Market> = pairs.iter().map(|(m, _)| m.clone()).collect();
        let markets_b: Vec<Market> = pairs.iter().map(|(_, m)| m.clone()).collect();
        let (books_a, books_b) = futures::join!(
            self.fetch_snapshots(&client_a, &markets_a),
            self.fetch_snapshots(&client_b, &markets_b)
        );

        let mut snapshot_pairs: Vec<(QuoteSnapshot, QuoteSnapshot)> = Vec::new();
        for (outcome_a, outcome_b) in books_a.into_iter().zip(books_b) {
            self.metrics
                .record_fetch(&outcome_a.exchange, outcome_a.snapshot.is_ok(), outcome_a.elapsed_ms);
            self.metrics
                .record_fetch(&outcome_b.exchange, outcome_b.snapshot.is_ok(), outcome_b.elapsed_ms);
            match (outcome_a.snapshot, outcome_b.snapshot) {
                (Ok(snap_a), Ok(snap_b)) => snapshot_pairs.push((snap_a, snap_b)),
                (Err(e), _) | (_, Err(e)) => {
                    debug!("Skipping pair: {}", e);
                    self.metrics.record_scan_error(&e);
                    report.skipped.push(e);
                }
            }
        }
        report.pairs_scanned = snapshot_pairs.len();

        self.enter(CyclePhase::Simulating);
        let mut fills: Vec<DirectionFill<'_>> = Vec::new();
        for (snap_a, snap_b) in &snapshot_pairs {
            for (buy, sell) in [(snap_a, snap_b), (snap_b, snap_a)] {
                match self.detector.simulate_direction(buy, sell) {
                    Ok(fill) if self.detector.may_be_profitable(&fill) => fills.push(fill),
                    Ok(_) => {}
                    Err(e) => {
                        self.metrics.record_scan_error(&e);
                        report.skipped.push(e);
                    }
                }
            }
        }

        self.enter(CyclePhase::FeeAdjusting);
        let mut currencies: HashMap<(String, String), Result<Currency, String>> = HashMap::new();
        let mut candidates = Vec::new();
        for fill in &fills {
            let asset = fill.base_asset().to_string();
            let source = self
                .currency_for(&mut currencies, &fill.buy.exchange, &asset)
                .await;
            let destination = self
                .currency_for(&mut currencies, &fill.sell.exchange, &asset)
                .await;

            let adjusted = match (source, destination) {
                (Ok(source), Ok(destination)) => self.detector.fee_adjust(fill, &source, &destination),
                (Err(reason), _) | (_, Err(reason)) => Err(ScanError::PartialData {
                    exchange: format!("{}->{}", fill.buy.exchange, fill.sell.exchange),
                    symbol: fill.buy.market.symbol(),
                    reason,
                }),
            };
            match adjusted {
                Ok(opportunity) => candidates.push(opportunity),
                Err(e) => {
                    debug!("Fee adjustment skipped: {}", e);
                    self.metrics.record_scan_error(&e);
                    report.skipped.push(e);
                }
            }
        }

        self.enter(CyclePhase::Emitting);
        let mut opportunities: Vec<Opportunity> = candidates
            .into_iter()
            .filter(|opp| self.detector.is_profitable(opp))
            .collect();
        opportunities.sort_by(|x, y| y.net_profit_fraction.cmp(&x.net_profit_fraction));

        self.metrics.record_opportunities(&opportunities);
        report.notified = self.notifications.publish_opportunities(&opportunities).await;
        report.opportunities = opportunities;

        self.metrics.complete_cycle(report.pairs_scanned);
        self.enter(CyclePhase::Idle);
        Ok(report)
    }

    /// Builds one graph over all listed exchanges and searches it from the
    /// start asset on each of them.
    pub async fn scan_routes(&mut self, exchanges: &[String], start: &str, target: Option<&str>) -> Result<Vec<Route>> {
        let start = start.to_uppercase();
        let target = target.map(|t| t.to_uppercase());

        let mut assets: BTreeSet<String> = self
            .config
            .routes
            .assets
            .iter()
            .map(|a| a.to_uppercase())
            .collect();
        assets.insert(start.clone());
        if let Some(target) = &target {
            assets.insert(target.clone());
        }

        let mut clients = Vec::new();
        for name in exchanges {
            clients.push(self.client(name)?);
        }
        if clients.is_empty() {
            return Err(anyhow!("No exchanges given for route search"));
        }

        let mut snapshots = Vec::new();
        let mut listed: Vec<(Arc<dyn ExchangeClient>, BTreeSet<String>)> = Vec::new();
        for client in &clients {
            let markets = match self.metadata.markets(client.as_ref()).await {
                Ok(markets) => markets,
                Err(e) => {
                    warn!("Skipping {} for route search: {}", client.name(), e);
                    continue;
                }
            };
            let mut selected: Vec<Market> = markets
                .into_iter()
                .filter(|m| m.active && assets.contains(&m.base) && assets.contains(&m.quote))
                .collect();
            selected.sort_by(|a, b| a.symbol().cmp(&b.symbol()));
            selected.truncate(self.config.routes.max_markets_per_exchange);

            let held: BTreeSet<String> = selected
                .iter()
                .flat_map(|m| [m.base.clone(), m.quote.clone()])
                .collect();

            for outcome in self.fetch_snapshots(client, &selected).await {
                self.metrics
                    .record_fetch(&outcome.exchange, outcome.snapshot.is_ok(), outcome.elapsed_ms);
                match outcome.snapshot {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(e) => self.metrics.record_scan_error(&e),
                }
            }
            listed.push((client.clone(), held));
        }

        let mut currencies = Vec::new();
        for asset in &assets {
            let holders: Vec<&Arc<dyn ExchangeClient>> = listed
                .iter()
                .filter(|(_, held)| held.contains(asset))
                .map(|(client, _)| client)
                .collect();
            if holders.len() < 2 {
                continue;
            }
            for client in holders {
                match self.metadata.currency(client.as_ref(), asset).await {
                    Ok(currency) => currencies.push(currency),
                    Err(e) => debug!("No transfer edges for {} on {}: {}", asset, client.name(), e),
                }
            }
        }

        let graph = RouteGraph::build(snapshots, currencies);
        info!(
            "Route graph: {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );

        let mut routes = Vec::new();
        for (client, _) in &listed {
            let outcome = self
                .route_evaluator
                .find_routes(&graph, client.name(), &start, target.as_deref());
            routes.extend(outcome.routes);
        }
        routes.sort_by(|a, b| b.cumulative_return.cmp(&a.cumulative_return));

        self.metrics.record_routes(routes.len());
        self.notifications.publish_routes(&routes).await;
        self.metrics.complete_cycle(0);
        Ok(routes)
    }

    fn common_markets(&self, markets_a: &[Market], markets_b: &[Market]) -> Vec<(Market, Market)> {
        let index_b: HashMap<(&str, &str), &Market> = markets_b
            .iter()
            .filter(|m| m.active)
            .map(|m| ((m.base.as_str(), m.quote.as_str()), m))
            .collect();

        let mut pairs: Vec<(Market, Market)> = markets_a
            .iter()
            .filter(|m| m.active && self.config.scanner.is_preferred_quote(&m.quote))
            .filter_map(|m| {
                index_b
                    .get(&(m.base.as_str(), m.quote.as_str()))
                    .map(|other| (m.clone(), (*other).clone()))
            })
            .collect();
        pairs.sort_by(|x, y| x.0.symbol().cmp(&y.0.symbol()));

        if self.config.scanner.max_pairs > 0 {
            pairs.truncate(self.config.scanner.max_pairs);
        }
        pairs
    }

    async fn currency_for(
        &self,
        seen: &mut HashMap<(String, String), Result<Currency, String>>,
        exchange: &str,
        asset: &str,
    ) -> Result<Currency, String> {
        let key = (exchange.to_string(), asset.to_string());
        if let Some(known) = seen.get(&key) {
            return known.clone();
        }

        let result = match self.client(exchange) {
            Ok(client) => self
                .metadata
                .currency(client.as_ref(), asset)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = &result {
            warn!("Currency metadata for {} on {} unavailable: {}", asset, exchange, reason);
        }
        seen.insert(key, result.clone());
        result
    }

    /// All fetches share the scanner-wide semaphore; each request gets its
    /// own timeout once it holds a permit.
    async fn fetch_snapshots(&self, client: &Arc<dyn ExchangeClient>, markets: &[Market]) -> Vec<FetchOutcome> {
        let limit = self.config.scanner.orderbook_limit;
        let fetch_timeout = self.config.scanner.fetch_timeout();

        let futures = markets.iter().map(|market| {
            let client = client.clone();
            let limiter = self.fetch_limiter.clone();
            async move {
                let started = Instant::now();
                let snapshot = fetch_one(client.as_ref(), market, limit, &limiter, fetch_timeout).await;
                FetchOutcome {
                    exchange: client.name().to_string(),
                    elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
                    snapshot,
                }
            }
        });

        join_all(futures).await
    }
}

async fn fetch_one(
    client: &dyn ExchangeClient,
    market: &Market,
    limit: u32,
    limiter: &Semaphore,
    fetch_timeout: Duration,
) -> Result<QuoteSnapshot, ScanError> {
    let partial = |reason: String| ScanError::PartialData {
        exchange: market.exchange.clone(),
        symbol: market.symbol(),
        reason,
    };

    let _permit = limiter
        .acquire()
        .await
        .map_err(|e| partial(format!("fetch limiter closed: {}", e)))?;

    let raw = match timeout(fetch_timeout, client.fetch_order_book(market, limit)).await {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => return Err(partial(e.to_string())),
        Err(_) => return Err(partial(format!("timed out after {:?}", fetch_timeout))),
    };

    build_snapshot(market, &raw, Utc::now())
}
