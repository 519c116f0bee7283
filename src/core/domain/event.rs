//! Replication handoff event.
//!
//! The dispatcher hands the replication engine a leader order plus the
//! post-trade position snapshot. Whether that pair means "open/increase",
//! "partial close" or "the position is already gone" is decided once, at the
//! engine entry, and encoded here so the per-follower path matches on a sum
//! type instead of sniffing placeholder flags.

use rust_decimal::Decimal;

use super::{Position, PositionSide, Symbol};

/// What the leader's order did to the leader's position.
#[derive(Debug, Clone)]
pub enum LeaderEvent {
    /// The position was opened or increased; carries the post-trade snapshot.
    Open(Position),
    /// Part of the position was closed; `filled` is the closed amount.
    Partial { position: Position, filled: Decimal },
    /// The position is fully gone. `side` is the direction that was held.
    Close {
        symbol: Symbol,
        side: PositionSide,
        closed_contracts: Decimal,
    },
}

impl LeaderEvent {
    #[must_use]
    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::Open(position) | Self::Partial { position, .. } => &position.symbol,
            Self::Close { symbol, .. } => symbol,
        }
    }

    /// Whether this event reduces follower exposure.
    #[must_use]
    pub const fn is_reduce(&self) -> bool {
        matches!(self, Self::Partial { .. } | Self::Close { .. })
    }
}
