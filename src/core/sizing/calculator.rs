//! Proportional follower sizing with leverage elevation.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, error, info, warn};

use crate::core::domain::Position;
use crate::core::exchange::ExchangeAdapter;

use super::{SizingConfig, MIN_USABLE_EQUITY};

/// Margin applied over the exact minimum-cost amount on the sizing path.
/// Slightly wider than the dispatcher-side buffer because the follower order
/// is placed later, after a full fan-out round trip.
const MIN_COST_MARGIN: Decimal = dec!(1.05);

/// A sized follower order: how much to trade and at what leverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowerSizing {
    pub amount: Decimal,
    pub leverage: u32,
}

/// Compute the follower's order amount and leverage for mirroring
/// `leader_position`.
///
/// The follower commits the same *fraction of equity as margin* that the
/// leader did, at the leader's intended leverage. When exchange floors lift
/// the amount beyond what that margin affords, leverage is elevated (never
/// past `config.max_leverage`) so the trade stays feasible inside the
/// follower's safety budget.
///
/// Returns `None` on any rejection; every rejection path logs its reason.
pub async fn follower_sizing(
    adapter: &dyn ExchangeAdapter,
    leader_position: &Position,
    follower_equity: Decimal,
    leader_equity: Decimal,
    leader_intended_leverage: u32,
    config: &SizingConfig,
) -> Option<FollowerSizing> {
    let symbol = &leader_position.symbol;

    if leader_equity <= MIN_USABLE_EQUITY || follower_equity <= MIN_USABLE_EQUITY {
        warn!(
            symbol = %symbol,
            leader_equity = %leader_equity,
            follower_equity = %follower_equity,
            "Equity too low for proportional sizing"
        );
        return None;
    }
    if leader_intended_leverage == 0 {
        warn!(symbol = %symbol, "Leader leverage of zero is not sizable");
        return None;
    }

    let limits = match adapter.get_market_info(symbol).await {
        Ok(limits) => limits,
        Err(e) => {
            error!(symbol = %symbol, error = %e, "Could not read market limits");
            return None;
        }
    };
    let last = match adapter.get_ticker(symbol).await {
        Ok(ticker) => ticker.last.filter(|price| *price > Decimal::ZERO),
        Err(e) => {
            warn!(symbol = %symbol, error = %e, "Ticker unavailable, falling back to mark price");
            None
        }
    };
    let Some(price) = last.or_else(|| {
        Some(leader_position.mark_price).filter(|price| *price > Decimal::ZERO)
    }) else {
        error!(symbol = %symbol, "No usable price for sizing");
        return None;
    };

    // Proportional amount: mirror the leader's margin-to-equity ratio.
    let leverage = Decimal::from(leader_intended_leverage);
    let leader_margin = leader_position.notional() / leverage;
    let margin_ratio = leader_margin / leader_equity;
    let follower_margin = follower_equity * margin_ratio;
    let follower_notional = follower_margin * leverage;
    let proportional = follower_notional / price;
    debug!(symbol = %symbol, proportional = %proportional, "Proportional amount");

    // Constraint lift: honor the market's amount and cost floors.
    let mut amount = proportional;
    if let Some(min_amount) = limits.min_amount {
        if amount < min_amount {
            info!(symbol = %symbol, amount = %amount, min_amount = %min_amount, "Lifting to minimum amount");
            amount = min_amount;
        }
    }
    if let Some(min_cost) = limits.min_cost {
        if amount * price < min_cost {
            let lifted = (min_cost / price) * MIN_COST_MARGIN;
            info!(symbol = %symbol, notional = %(amount * price), min_cost = %min_cost, "Lifting to minimum cost");
            amount = lifted;
        }
    }

    // Budget feasibility: elevate leverage if the lifted amount no longer
    // fits the follower's safety budget at the leader's leverage.
    let budget = follower_equity * config.budget_usage;
    if budget <= Decimal::ZERO {
        error!(symbol = %symbol, "Safety budget is not positive");
        return None;
    }
    let notional = amount * price;
    let mut effective_leverage = leader_intended_leverage;
    let required_margin = notional / leverage;

    if required_margin > budget {
        let min_leverage_needed = notional / budget;
        if min_leverage_needed > Decimal::from(config.max_leverage) {
            error!(
                symbol = %symbol,
                min_leverage_needed = %min_leverage_needed,
                max_leverage = config.max_leverage,
                "Trade not feasible even at maximum leverage"
            );
            return None;
        }
        let floored = min_leverage_needed.floor().to_u32().unwrap_or(config.max_leverage);
        effective_leverage = floored
            .saturating_add(config.elevation_headroom)
            .min(config.max_leverage);
        info!(
            symbol = %symbol,
            required_margin = %required_margin,
            budget = %budget,
            leverage = effective_leverage,
            "Elevated follower leverage to keep the trade feasible"
        );
    }

    // Final gate: the elevated leverage must actually fit the budget.
    let final_margin = notional / Decimal::from(effective_leverage);
    if final_margin > budget {
        error!(
            symbol = %symbol,
            final_margin = %final_margin,
            budget = %budget,
            "Final margin check failed"
        );
        return None;
    }

    let normalized = match adapter.normalize_amount(symbol, amount).await {
        Ok(normalized) if normalized > Decimal::ZERO => normalized,
        Ok(_) => {
            error!(symbol = %symbol, amount = %amount, "Amount vanished under precision rounding");
            return None;
        }
        Err(e) => {
            error!(symbol = %symbol, amount = %amount, error = %e, "Normalization failed");
            return None;
        }
    };

    info!(
        symbol = %symbol,
        amount = %normalized,
        leverage = effective_leverage,
        "Follower sizing complete"
    );
    Some(FollowerSizing {
        amount: normalized,
        leverage: effective_leverage,
    })
}
