//! Leader command schema.
//!
//! Commands arrive as JSON with an `action` tag and are deserialized straight
//! into a tagged enum with one variant per action, matched exhaustively by the
//! dispatcher. An unknown action fails at the serde boundary and is reported
//! as an unsupported command.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{OrderSide, OrderType, Symbol};

/// Margin mode requested alongside leverage changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    #[default]
    Isolated,
    Cross,
}

impl MarginMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Isolated => "isolated",
            Self::Cross => "cross",
        }
    }
}

/// The leader's original intent, annotated onto open/increase orders so the
/// replication engine can size from the *intended* leverage rather than the
/// effective leverage the exchange reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandDetails {
    pub action: String,
    pub leverage: Option<u32>,
    pub amount: Option<Decimal>,
}

/// Arguments shared by the `buy` and `sell` open actions.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenArgs {
    pub symbol: Symbol,
    pub amount: Decimal,
    pub leverage: u32,
    #[serde(default)]
    pub margin_mode: MarginMode,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub post_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScaleInArgs {
    pub symbol: Symbol,
    /// Which way the addition trades; must agree with the held position.
    pub side: OrderSide,
    pub amount: Decimal,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub post_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScaleOutArgs {
    pub symbol: Symbol,
    /// Absolute amount to close. Takes precedence over `percentage`.
    #[serde(default)]
    pub amount: Option<Decimal>,
    /// Percentage of the current position to close (0–100].
    #[serde(default)]
    pub percentage: Option<Decimal>,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub post_only: bool,
}

/// A leader command, tagged by `action`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Buy(OpenArgs),
    Sell(OpenArgs),
    ScaleIn(ScaleInArgs),
    ScaleOut(ScaleOutArgs),
    ClosePosition {
        symbol: Symbol,
    },
    SetLeverage {
        symbol: Symbol,
        leverage: u32,
        #[serde(default)]
        margin_mode: MarginMode,
    },
    Cancel {
        symbol: Symbol,
        order_id: String,
    },
}

impl Command {
    #[must_use]
    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::Buy(args) | Self::Sell(args) => &args.symbol,
            Self::ScaleIn(args) => &args.symbol,
            Self::ScaleOut(args) => &args.symbol,
            Self::ClosePosition { symbol }
            | Self::SetLeverage { symbol, .. }
            | Self::Cancel { symbol, .. } => symbol,
        }
    }

    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Buy(_) => "buy",
            Self::Sell(_) => "sell",
            Self::ScaleIn(_) => "scale_in",
            Self::ScaleOut(_) => "scale_out",
            Self::ClosePosition { .. } => "close_position",
            Self::SetLeverage { .. } => "set_leverage",
            Self::Cancel { .. } => "cancel",
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn parses_open_command() {
        let cmd: Command = serde_json::from_str(
            r#"{"action": "buy", "symbol": "BTCUSDT", "amount": "0.5", "leverage": 5}"#,
        )
        .unwrap();
        let Command::Buy(args) = cmd else {
            panic!("expected buy");
        };
        assert_eq!(args.symbol.as_str(), "BTC/USDT");
        assert_eq!(args.amount, dec!(0.5));
        assert_eq!(args.leverage, 5);
        assert_eq!(args.margin_mode, MarginMode::Isolated);
        assert_eq!(args.order_type, OrderType::Market);
        assert!(!args.post_only);
    }

    #[test]
    fn parses_scale_out_with_percentage() {
        let cmd: Command = serde_json::from_str(
            r#"{"action": "scale_out", "symbol": "ETH/USDT", "percentage": 25}"#,
        )
        .unwrap();
        let Command::ScaleOut(args) = cmd else {
            panic!("expected scale_out");
        };
        assert_eq!(args.percentage, Some(dec!(25)));
        assert_eq!(args.amount, None);
    }

    #[test]
    fn parses_cancel() {
        let cmd: Command = serde_json::from_str(
            r#"{"action": "cancel", "symbol": "BTC/USDT", "order_id": "42"}"#,
        )
        .unwrap();
        assert_eq!(cmd.action(), "cancel");
        assert_eq!(cmd.symbol().as_str(), "BTC/USDT");
    }

    #[test]
    fn rejects_unknown_action() {
        let result: Result<Command, _> =
            serde_json::from_str(r#"{"action": "moon", "symbol": "BTC/USDT"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn margin_mode_parses_cross() {
        let cmd: Command = serde_json::from_str(
            r#"{"action": "set_leverage", "symbol": "BTCUSDT", "leverage": 10, "margin_mode": "cross"}"#,
        )
        .unwrap();
        let Command::SetLeverage { margin_mode, .. } = cmd else {
            panic!("expected set_leverage");
        };
        assert_eq!(margin_mode, MarginMode::Cross);
    }
}
