//! Exchange abstraction layer.
//!
//! ## Adding a New Exchange
//!
//! 1. Create a module under `exchange/<name>.rs`
//! 2. Implement [`ExchangeAdapter`] for one authenticated account, honoring
//!    the contract guarantees documented on the trait
//! 3. Add the exchange id to [`AdapterFactory`] for runtime selection
//!
//! The [`ConnectionRegistry`] guarantees at most one live adapter per
//! `(user_id, exchange_id)` and owns the process-wide leader slot.

mod adapter;
mod binance;
mod factory;
#[cfg(test)]
pub(crate) mod mock;
mod registry;

pub use adapter::{
    ExchangeAdapter, MarketLimits, OrderParams, OrderRequest, Ticker, POSITION_EPSILON,
};
pub use binance::BinanceAdapter;
pub use factory::{AdapterFactory, AdapterFactoryFn};
pub use registry::ConnectionRegistry;
