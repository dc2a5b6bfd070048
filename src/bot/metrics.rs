use anyhow::Result;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{error::ScanError, types::Opportunity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanMetrics {
    pub started_at: DateTime<Utc>,
    pub cycles_completed: u64,
    pub pairs_scanned: u64,
    pub snapshots_fetched: u64,
    pub fetch_failures: u64,
    pub partial_data: u64,
    pub malformed_books: u64,
    pub infeasible_transfers: u64,
    pub simulation_rejections: u64,
    pub opportunities_found: u64,
    pub routes_found: u64,
    pub best_net_fraction: Option<BigDecimal>,
    pub exchange_performance: HashMap<String, ExchangeMetrics>,
    pub last_error: Option<String>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeMetrics {
    pub name: String,
    pub books_fetched: u64,
    pub books_failed: u64,
    pub average_fetch_ms: f64,
    pub opportunities_as_buy_side: u64,
    pub opportunities_as_sell_side: u64,
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            cycles_completed: 0,
            pairs_scanned: 0,
            snapshots_fetched: 0,
            fetch_failures: 0,
            partial_data: 0,
            malformed_books: 0,
            infeasible_transfers: 0,
            simulation_rejections: 0,
            opportunities_found: 0,
            routes_found: 0,
            best_net_fraction: None,
            exchange_performance: HashMap::new(),
            last_error: None,
            last_updated: Utc::now(),
        }
    }

    pub fn record_fetch(&mut self, exchange: &str, success: bool, elapsed_ms: f64) {
        let metrics = self
            .exchange_performance
            .entry(exchange.to_string())
            .or_insert_with(|| ExchangeMetrics {
                name: exchange.to_string(),
                ..ExchangeMetrics::default()
            });

        if success {
            metrics.books_fetched += 1;
            self.snapshots_fetched += 1;
        } else {
            metrics.books_failed += 1;
            self.fetch_failures += 1;
        }

        let total = metrics.books_fetched + metrics.books_failed;
        let previous = metrics.average_fetch_ms * (total - 1) as f64;
        metrics.average_fetch_ms = (previous + elapsed_ms) / total as f64;
    }

    pub fn record_scan_error(&mut self, error: &ScanError) {
        match error {
            ScanError::MalformedBook { .. } => self.malformed_books += 1,
            ScanError::NoSharedNetwork { .. } => self.infeasible_transfers += 1,
            ScanError::PartialData { .. } => self.partial_data += 1,
            ScanError::InvalidSimulationInput(_) => self.simulation_rejections += 1,
        }
        self.last_error = Some(error.to_string());
    }

    pub fn record_opportunities(&mut self, opportunities: &[Opportunity]) {
        for opp in opportunities {
            self.opportunities_found += 1;
            let best = self.best_net_fraction.get_or_insert_with(BigDecimal::zero);
            if opp.net_profit_fraction > *best {
                *best = opp.net_profit_fraction.clone();
            }
            if let Some(buy) = self.exchange_performance.get_mut(opp.buy_exchange()) {
                buy.opportunities_as_buy_side += 1;
            }
            if let Some(sell) = self.exchange_performance.get_mut(opp.sell_exchange()) {
                sell.opportunities_as_sell_side += 1;
            }
        }
    }

    pub fn record_routes(&mut self, count: usize) {
        self.routes_found += count as u64;
    }

    pub fn complete_cycle(&mut self, pairs_scanned: usize) {
        self.cycles_completed += 1;
        self.pairs_scanned += pairs_scanned as u64;
        self.last_updated = Utc::now();
    }

    pub fn generate_report(&self) -> String {
        let mut report = String::new();
        let uptime = (Utc::now() - self.started_at).num_seconds();

        report.push_str("=== Scan Metrics Report ===\n");
        report.push_str(&format!("Uptime: {} seconds\n", uptime));
        report.push_str(&format!("Cycles: {}\n", self.cycles_completed));
        report.push_str(&format!("Pairs Scanned: {}\n", self.pairs_scanned));
        report.push_str(&format!(
            "Snapshots: {} fetched, {} failed\n",
            self.snapshots_fetched, self.fetch_failures
        ));
        report.push_str(&format!(
            "Skipped: {} partial, {} malformed, {} no shared network, {} rejected\n",
            self.partial_data, self.malformed_books, self.infeasible_transfers, self.simulation_rejections
        ));
        report.push_str(&format!("Opportunities: {}\n", self.opportunities_found));
        report.push_str(&format!("Routes: {}\n", self.routes_found));
        if let Some(best) = &self.best_net_fraction {
            report.push_str(&format!("Best Net: {}%\n", crate::report::format_percent(best)));
        }
        if let Some(error) = &self.last_error {
            report.push_str(&format!("Last Error: {}\n", error));
        }

        let mut exchanges: Vec<&ExchangeMetrics> = self.exchange_performance.values().collect();
        exchanges.sort_by(|a, b| a.name.cmp(&b.name));
        if !exchanges.is_empty() {
            report.push_str("\n=== Exchange Performance ===\n");
        }
        for metrics in exchanges {
            report.push_str(&format!(
                "{}: {}/{} books, avg fetch {:.1}ms, {} buy-side / {} sell-side\n",
                metrics.name,
                metrics.books_fetched,
                metrics.books_fetched + metrics.books_failed,
                metrics.average_fetch_ms,
                metrics.opportunities_as_buy_side,
                metrics.opportunities_as_sell_side
            ));
        }

        report
    }

    pub fn export_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| anyhow::anyhow!("Failed to serialize metrics: {}", e))
    }
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_averages() {
        let mut metrics = ScanMetrics::new();
        metrics.record_fetch("binance", true, 10.0);
        metrics.record_fetch("binance", false, 30.0);

        let binance = &metrics.exchange_performance["binance"];
        assert_eq!(binance.books_fetched, 1);
        assert_eq!(binance.books_failed, 1);
        assert!((binance.average_fetch_ms - 20.0).abs() < f64::EPSILON);
        assert_eq!(metrics.snapshots_fetched, 1);
        assert_eq!(metrics.fetch_failures, 1);
    }

    #[test]
    fn test_scan_errors_counted_by_kind() {
        let mut metrics = ScanMetrics::new();
        metrics.record_scan_error(&ScanError::NoSharedNetwork {
            asset: "BTC".to_string(),
            from: "binance".to_string(),
            to: "kucoin".to_string(),
        });
        metrics.record_scan_error(&ScanError::PartialData {
            exchange: "kucoin".to_string(),
            symbol: "BTC/USDT".to_string(),
            reason: "timeout".to_string(),
        });

        assert_eq!(metrics.infeasible_transfers, 1);
        assert_eq!(metrics.partial_data, 1);
        assert!(metrics.last_error.unwrap().contains("kucoin"));
    }

    #[test]
    fn test_report_mentions_counters() {
        let mut metrics = ScanMetrics::new();
        metrics.complete_cycle(12);
        metrics.record_routes(2);

        let report = metrics.generate_report();
        assert!(report.contains("Cycles: 1"));
        assert!(report.contains("Pairs Scanned: 12"));
        assert!(report.contains("Routes: 2"));
        assert!(metrics.export_json().unwrap().contains("\"routes_found\": 2"));
    }
}
