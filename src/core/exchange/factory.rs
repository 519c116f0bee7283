//! Adapter factory.
//!
//! Maps an `exchange_id` onto a concrete adapter implementation. The table is
//! closed at build time; an unknown id is a resolution failure, not a panic.

use std::sync::Arc;

use crate::core::domain::AccountDescriptor;
use crate::error::ExchangeError;

use super::binance::BinanceAdapter;
use super::ExchangeAdapter;

/// Factory function used by the connection registry to build adapters on
/// demand. Swappable so tests can inject mock adapters.
pub type AdapterFactoryFn =
    Arc<dyn Fn(&AccountDescriptor) -> Result<Arc<dyn ExchangeAdapter>, ExchangeError> + Send + Sync>;

/// Factory for creating exchange adapters.
pub struct AdapterFactory;

impl AdapterFactory {
    /// Build an (unconnected) adapter for the descriptor's exchange.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::UnsupportedExchange`] for an exchange id with
    /// no registered implementation.
    pub fn create(
        descriptor: &AccountDescriptor,
    ) -> Result<Arc<dyn ExchangeAdapter>, ExchangeError> {
        match descriptor.exchange_id.as_str() {
            "binance" => Ok(Arc::new(BinanceAdapter::new(descriptor.clone()))),
            other => Err(ExchangeError::UnsupportedExchange(other.to_string())),
        }
    }

    /// The default factory function backed by [`AdapterFactory::create`].
    #[must_use]
    pub fn default_factory() -> AdapterFactoryFn {
        Arc::new(Self::create)
    }
}
