//! Proportional sizing and exchange-limit adjustment.
//!
//! Two closely related jobs live here:
//!
//! - [`adjust_amount_for_limits`] lifts an arbitrary amount over a market's
//!   minimum-amount and minimum-cost floors and normalizes it to the
//!   exchange's step, used by the dispatcher before any leader order.
//! - [`follower_sizing`] translates a leader position into a follower order:
//!   proportional margin scaling, the same constraint lift, and, when the
//!   lifted amount no longer fits the follower's budget, leverage elevation
//!   up to a hard cap.
//!
//! Both return `None` on any rejection and log the reason; callers map that
//! to a skipped follower or a failed order. No partial state is committed.

mod calculator;
mod limits;

pub use calculator::{follower_sizing, FollowerSizing};
pub use limits::adjust_amount_for_limits;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Accounts with less equity than this are not traded at all.
pub(crate) const MIN_USABLE_EQUITY: Decimal = dec!(1);

/// Tunables for the follower sizing calculator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Hard cap on the leverage the calculator may assign to a follower.
    pub max_leverage: u32,
    /// Fraction of follower equity usable as margin for a single position.
    pub budget_usage: Decimal,
    /// Extra leverage steps added on top of the computed minimum, as
    /// headroom against price drift between calculation and fill.
    pub elevation_headroom: u32,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_leverage: 50,
            budget_usage: dec!(0.90),
            elevation_headroom: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_engine_constants() {
        let config = SizingConfig::default();
        assert_eq!(config.max_leverage, 50);
        assert_eq!(config.budget_usage, dec!(0.90));
        assert_eq!(config.elevation_headroom, 2);
    }

    #[test]
    fn config_deserializes_with_partial_overrides() {
        let config: SizingConfig = toml::from_str("max_leverage = 20").unwrap();
        assert_eq!(config.max_leverage, 20);
        assert_eq!(config.budget_usage, dec!(0.90));
    }
}
