//! Error taxonomy for copyhawk.
//!
//! Two layers: [`ExchangeError`] covers everything that can go wrong while
//! talking to an exchange through an adapter, and [`Error`] is the
//! application-level error that the CLI and services thread with `?`.
//!
//! Business rejects (bad amount, insufficient margin) are deliberately *not*
//! errors; adapters report them as failed `Order`s and the services map them
//! to per-follower failure records. Only connectivity, configuration and
//! protocol problems travel through these enums.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("execution error: {0}")]
    Execution(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised by exchange adapters and the connection registry.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// A method was invoked before `connect` or after `close`.
    #[error("adapter is not connected")]
    NotConnected,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A structured error payload returned by the exchange.
    #[error("exchange API error {code}: {message}")]
    Api { code: i64, message: String },

    /// No adapter implementation is registered for this exchange id.
    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),

    /// The process-wide leader descriptor slot was never populated.
    #[error("leader account descriptor is not configured")]
    MissingLeader,

    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    /// The symbol is not present in the adapter's market table.
    #[error("unknown market: {0}")]
    UnknownMarket(String),

    /// The exchange returned a payload we could not map to our models.
    #[error("malformed exchange payload: {0}")]
    Payload(String),
}

impl ExchangeError {
    /// Whether this error represents a business-level reject rather than a
    /// connectivity problem. Business rejects are safe to convert into
    /// failed orders; connectivity problems should propagate.
    #[must_use]
    pub fn is_business_reject(&self) -> bool {
        matches!(self, Self::Api { .. } | Self::UnknownMarket(_) | Self::InvalidSymbol(_))
    }
}
