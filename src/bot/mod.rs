pub mod metrics;
pub mod orchestrator;

pub use metrics::ScanMetrics;
pub use orchestrator::{ArbitrageScanner, CyclePhase, FetchSummary, ScanReport};
