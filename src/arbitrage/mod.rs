pub mod detector;
pub mod fees;
pub mod routes;
pub mod simulator;
pub mod snapshot;

pub use detector::{ArbitrageDetector, Detection, DirectionFill, TransferMetadata};
pub use fees::FeeModel;
pub use routes::{RouteEvaluator, RouteGraph, RouteSearchOutcome};
pub use simulator::{simulate, simulate_notional};
pub use snapshot::{build_snapshot, normalize_ladder};
