pub mod arbitrage;
pub mod bot;
pub mod cache;
pub mod config;
pub mod error;
pub mod exchange;
pub mod notify;
pub mod report;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, ConnectivityError, ScanError};
pub use types::*;
