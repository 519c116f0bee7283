//! Standardized order model.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{CommandDetails, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type requested by a command.
///
/// `PostOnly` is a pseudo-type: adapters rewrite it to a limit order with the
/// exchange's post-only flag, which makes a price mandatory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
    StopLimit,
    PostOnly,
}

impl OrderType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::StopLimit => "stop_limit",
            Self::PostOnly => "post_only",
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Closed,
    Failed,
    Canceled,
    Unknown,
}

/// An order as acknowledged (or rejected) by an exchange.
///
/// Invariant: `status == Failed` implies `id == None` and `error_message`
/// set. Business rejects become failed orders; they are never surfaced as
/// errors.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: Option<String>,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub filled: Decimal,
    pub average_price: Option<Decimal>,
    pub status: OrderStatus,
    pub timestamp_ms: Option<i64>,
    pub exchange_id: String,
    pub error_message: Option<String>,
    /// Raw exchange response plus the request params that produced it.
    pub raw: serde_json::Value,
    /// The leader's original intent, carried through for replication.
    pub command_details: Option<CommandDetails>,
}

impl Order {
    /// Build a synthetic failed order for a precondition that was rejected
    /// before anything reached the exchange.
    #[must_use]
    pub fn failed(
        symbol: Symbol,
        side: OrderSide,
        amount: Decimal,
        exchange_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            symbol,
            side,
            order_type: OrderType::Market,
            amount,
            price: None,
            filled: Decimal::ZERO,
            average_price: None,
            status: OrderStatus::Failed,
            timestamp_ms: None,
            exchange_id: exchange_id.into(),
            error_message: Some(message.into()),
            raw: serde_json::Value::Null,
            command_details: None,
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == OrderStatus::Failed
    }

    /// Whether this order carried the reduce-only flag, read from the raw
    /// exchange acknowledgement first and the echoed request params second.
    #[must_use]
    pub fn is_reduce_only(&self) -> bool {
        let flag = |v: &serde_json::Value| v.as_bool().unwrap_or(false);
        flag(&self.raw["info"]["reduceOnly"]) || flag(&self.raw["params"]["reduceOnly"])
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    #[test]
    fn failed_constructor_upholds_invariant() {
        let order = Order::failed(
            Symbol::parse("BTC/USDT").unwrap(),
            OrderSide::Buy,
            dec!(1),
            "binance",
            "insufficient margin",
        );
        assert!(order.is_failed());
        assert!(order.id.is_none());
        assert_eq!(order.error_message.as_deref(), Some("insufficient margin"));
    }

    #[test]
    fn reduce_only_read_from_exchange_ack() {
        let mut order = Order::failed(
            Symbol::parse("BTC/USDT").unwrap(),
            OrderSide::Sell,
            dec!(1),
            "binance",
            "x",
        );
        assert!(!order.is_reduce_only());

        order.raw = json!({"info": {"reduceOnly": true}});
        assert!(order.is_reduce_only());

        order.raw = json!({"params": {"reduceOnly": true}});
        assert!(order.is_reduce_only());

        order.raw = json!({"info": {"reduceOnly": false}, "params": {}});
        assert!(!order.is_reduce_only());
    }

    #[test]
    fn side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }
}
