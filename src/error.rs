use thiserror::Error;

/// Errors raised by the spread engine. Everything except
/// `InvalidSimulationInput` is recoverable at the pair or leg level.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("malformed order book for {symbol} on {exchange}: no levels left after normalization")]
    MalformedBook { exchange: String, symbol: String },

    #[error("invalid simulation input: {0}")]
    InvalidSimulationInput(String),

    #[error("no shared withdrawal network for {asset} from {from} to {to}")]
    NoSharedNetwork {
        asset: String,
        from: String,
        to: String,
    },

    #[error("partial data for {symbol}: {exchange} leg unavailable ({reason})")]
    PartialData {
        exchange: String,
        symbol: String,
        reason: String,
    },
}

impl ScanError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ScanError::InvalidSimulationInput(_))
    }
}

/// Failures reported by exchange adapters once their own retries are spent.
#[derive(Error, Debug, Clone)]
pub enum ConnectivityError {
    #[error("transient network error on {exchange}: {message}")]
    Transient { exchange: String, message: String },

    #[error("rate limited by {exchange}: {message}")]
    RateLimited { exchange: String, message: String },

    #[error("failed to decode {exchange} response: {message}")]
    Decode { exchange: String, message: String },

    #[error("{exchange} does not support {operation}")]
    Unsupported { exchange: String, operation: String },
}

impl ConnectivityError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectivityError::Transient { .. } | ConnectivityError::RateLimited { .. }
        )
    }
}

/// Startup errors. These are the only errors that stop the process.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no exchanges configured")]
    NoExchanges,

    #[error("invalid profitability threshold '{0}': must be a fraction in [0, 1)")]
    InvalidThreshold(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
