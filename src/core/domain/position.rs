//! Standardized position snapshot.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{OrderSide, Symbol};

/// Direction of an open position. Size is always non-negative; direction
/// lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// The order side that grows a position of this direction.
    #[must_use]
    pub const fn entry_order_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// The order side that reduces a position of this direction.
    #[must_use]
    pub const fn closing_order_side(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Sell,
            Self::Short => OrderSide::Buy,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open position as reported by an exchange, mapped into canonical form.
///
/// Positions are ephemeral views: they are reconstituted from the exchange
/// on every use and never persisted.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: Symbol,
    pub side: PositionSide,
    /// Size in base units, always >= 0.
    pub contracts: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub leverage: u32,
    pub unrealized_pnl: Decimal,
    pub liquidation_price: Option<Decimal>,
    /// Exchange-reported position timestamp, epoch milliseconds.
    pub timestamp_ms: Option<i64>,
    pub exchange_id: String,
    /// Raw exchange payload, kept for debugging.
    pub raw: serde_json::Value,
}

impl Position {
    /// Full exposure of the position at its entry price.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.contracts * self.entry_price
    }

    /// Age of the position in seconds, if the exchange reported a timestamp.
    #[must_use]
    pub fn age_seconds(&self) -> Option<i64> {
        let ts = self.timestamp_ms.filter(|ts| *ts > 0)?;
        Some((Utc::now().timestamp_millis() - ts) / 1000)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn position(side: PositionSide) -> Position {
        Position {
            symbol: Symbol::parse("BTC/USDT").unwrap(),
            side,
            contracts: dec!(2),
            entry_price: dec!(30000),
            mark_price: dec!(30100),
            leverage: 5,
            unrealized_pnl: dec!(200),
            liquidation_price: None,
            timestamp_ms: None,
            exchange_id: "binance".to_string(),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn long_closes_with_sell() {
        assert_eq!(PositionSide::Long.closing_order_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.closing_order_side(), OrderSide::Buy);
    }

    #[test]
    fn long_grows_with_buy() {
        assert_eq!(PositionSide::Long.entry_order_side(), OrderSide::Buy);
        assert_eq!(PositionSide::Short.entry_order_side(), OrderSide::Sell);
    }

    #[test]
    fn notional_is_contracts_times_entry() {
        assert_eq!(position(PositionSide::Long).notional(), dec!(60000));
    }

    #[test]
    fn age_requires_positive_timestamp() {
        let mut pos = position(PositionSide::Long);
        assert_eq!(pos.age_seconds(), None);
        pos.timestamp_ms = Some(0);
        assert_eq!(pos.age_seconds(), None);
        pos.timestamp_ms = Some(Utc::now().timestamp_millis() - 120_000);
        let age = pos.age_seconds().unwrap();
        assert!((119..=121).contains(&age), "unexpected age {age}");
    }
}
