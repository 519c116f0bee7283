//! The adapter contract: a uniform capability surface over one authenticated
//! exchange account.
//!
//! Contract guarantees, relied on by every service above this layer:
//!
//! - `get_positions` returns only positions with `|contracts| > 1e-9`, mapped
//!   into canonical [`Position`] values.
//! - `place_order` never fails for business reasons: insufficient margin,
//!   bad lot size and friends come back as an `Order` with
//!   `status == Failed` and `error_message` set. `Err` means connectivity.
//! - `set_leverage` treats the exchange's "already at the requested margin
//!   mode" sentinel as success and then retries the leverage-only portion.
//! - `normalize_amount` rounds down to a value the exchange will accept.
//! - Every method fails with [`ExchangeError::NotConnected`] outside a
//!   `connect`…`close` window.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::core::domain::{
    CommandDetails, MarginMode, Order, OrderSide, OrderType, Position, Symbol,
};
use crate::error::ExchangeError;

/// Positions smaller than this are treated as dust and filtered out.
pub const POSITION_EPSILON: Decimal = dec!(0.000000001);

/// Tradability limits for one market.
#[derive(Debug, Clone, Default)]
pub struct MarketLimits {
    /// Minimum order amount in base units.
    pub min_amount: Option<Decimal>,
    /// Minimum order notional in quote units.
    pub min_cost: Option<Decimal>,
    /// Amount step size; placed amounts must be a multiple.
    pub amount_step: Option<Decimal>,
    /// Maximum order amount in base units.
    pub max_amount: Option<Decimal>,
}

/// Latest prices for one market.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ticker {
    pub last: Option<Decimal>,
    pub mark_price: Option<Decimal>,
}

impl Ticker {
    /// Best available positive price: last trade, falling back to mark.
    #[must_use]
    pub fn price(&self) -> Option<Decimal> {
        self.last
            .filter(|price| *price > Decimal::ZERO)
            .or(self.mark_price.filter(|price| *price > Decimal::ZERO))
    }
}

/// Extra parameters attached to an order request.
#[derive(Debug, Clone, Default)]
pub struct OrderParams {
    /// The order may only decrease an existing position.
    pub reduce_only: bool,
    /// Maker-only execution; the adapter rewrites the order to a flagged
    /// limit order, which requires a price.
    pub post_only: bool,
    /// Leader intent, echoed back on the resulting [`Order`].
    pub command_details: Option<CommandDetails>,
}

/// A fully specified order, ready for an adapter.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub params: OrderParams,
}

impl OrderRequest {
    /// A plain market order, the shape replication always uses.
    #[must_use]
    pub fn market(symbol: Symbol, side: OrderSide, amount: Decimal) -> Self {
        Self {
            symbol,
            order_type: OrderType::Market,
            side,
            amount,
            price: None,
            stop_price: None,
            params: OrderParams::default(),
        }
    }

    #[must_use]
    pub fn reduce_only(mut self) -> Self {
        self.params.reduce_only = true;
        self
    }
}

/// One authenticated exchange account.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn exchange_id(&self) -> &str;

    fn user_id(&self) -> &str;

    /// Establish the session: authenticate and load market metadata.
    async fn connect(&self) -> Result<(), ExchangeError>;

    /// Tear the session down; the adapter may not be used afterwards.
    async fn close(&self) -> Result<(), ExchangeError>;

    /// Open positions, optionally restricted to `symbols`.
    async fn get_positions(&self, symbols: Option<&[Symbol]>)
        -> Result<Vec<Position>, ExchangeError>;

    async fn place_order(&self, request: OrderRequest) -> Result<Order, ExchangeError>;

    async fn cancel_order(
        &self,
        order_id: &str,
        symbol: &Symbol,
    ) -> Result<serde_json::Value, ExchangeError>;

    async fn set_leverage(
        &self,
        symbol: &Symbol,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> Result<(), ExchangeError>;

    /// Total account value (wallet balance plus position margin) in USDT.
    async fn get_total_account_value_usdt(&self) -> Result<Decimal, ExchangeError>;

    async fn get_ticker(&self, symbol: &Symbol) -> Result<Ticker, ExchangeError>;

    /// Round `amount` down to a placeable value for `symbol`.
    async fn normalize_amount(
        &self,
        symbol: &Symbol,
        amount: Decimal,
    ) -> Result<Decimal, ExchangeError>;

    async fn get_market_info(&self, symbol: &Symbol) -> Result<MarketLimits, ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_prefers_last_over_mark() {
        let ticker = Ticker {
            last: Some(dec!(100)),
            mark_price: Some(dec!(99)),
        };
        assert_eq!(ticker.price(), Some(dec!(100)));
    }

    #[test]
    fn ticker_falls_back_to_mark() {
        let ticker = Ticker {
            last: None,
            mark_price: Some(dec!(99)),
        };
        assert_eq!(ticker.price(), Some(dec!(99)));

        let zero_last = Ticker {
            last: Some(Decimal::ZERO),
            mark_price: Some(dec!(99)),
        };
        assert_eq!(zero_last.price(), Some(dec!(99)));
    }

    #[test]
    fn ticker_with_no_usable_price() {
        assert_eq!(Ticker::default().price(), None);
    }
}
