//! Lift an amount over a market's tradability floors.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::core::domain::Symbol;
use crate::core::exchange::ExchangeAdapter;

/// Margin applied over the exact minimum-cost amount. Exchange cost minimums
/// are enforced against post-fee notional and drift with price; the buffer
/// avoids a reject loop right at the boundary.
const MIN_COST_MARGIN: Decimal = dec!(1.01);

/// Adjust `amount` so the exchange will accept it: lift it to the market's
/// minimum amount, lift the notional over the minimum cost (with a small
/// buffer), then normalize to the exchange's step.
///
/// Returns `None` when limits or a usable price cannot be read.
pub async fn adjust_amount_for_limits(
    adapter: &dyn ExchangeAdapter,
    symbol: &Symbol,
    amount: Decimal,
) -> Option<Decimal> {
    let limits = match adapter.get_market_info(symbol).await {
        Ok(limits) => limits,
        Err(e) => {
            warn!(symbol = %symbol, error = %e, "Could not read market limits");
            return None;
        }
    };
    let ticker = match adapter.get_ticker(symbol).await {
        Ok(ticker) => ticker,
        Err(e) => {
            warn!(symbol = %symbol, error = %e, "Could not read ticker");
            return None;
        }
    };
    let Some(price) = ticker.price() else {
        warn!(symbol = %symbol, "No usable price for limit adjustment");
        return None;
    };

    let mut effective = amount;

    if let Some(min_amount) = limits.min_amount {
        if effective < min_amount {
            info!(
                symbol = %symbol,
                amount = %effective,
                min_amount = %min_amount,
                "Amount below market minimum, lifting"
            );
            effective = min_amount;
        }
    }

    if let Some(min_cost) = limits.min_cost {
        if effective * price < min_cost {
            let lifted = (min_cost / price) * MIN_COST_MARGIN;
            info!(
                symbol = %symbol,
                notional = %(effective * price),
                min_cost = %min_cost,
                lifted = %lifted,
                "Notional below market minimum cost, lifting"
            );
            effective = lifted;
        }
    }

    match adapter.normalize_amount(symbol, effective).await {
        Ok(normalized) => Some(normalized),
        Err(e) => {
            warn!(symbol = %symbol, amount = %effective, error = %e, "Normalization failed");
            None
        }
    }
}
