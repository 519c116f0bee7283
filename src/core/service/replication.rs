//! Immediate replication of successful leader actions onto followers.

use std::sync::Arc;

use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::core::domain::{
    AccountDescriptor, LeaderEvent, MarginMode, Order, OrderSide, Position, PositionSide,
};
use crate::core::exchange::{
    ConnectionRegistry, ExchangeAdapter, OrderRequest, POSITION_EPSILON,
};
use crate::core::sizing::{follower_sizing, SizingConfig, MIN_USABLE_EQUITY};
use crate::core::store::Keystore;
use crate::error::{Error, Result};

/// Per-follower outcome of one replication fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct FollowerOutcome {
    pub user_id: String,
    #[serde(flatten)]
    pub status: FollowerStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FollowerStatus {
    Success {
        order_id: Option<String>,
        filled: Decimal,
    },
    Failed {
        reason: String,
    },
    Skipped {
        reason: String,
    },
}

/// Aggregate result of replicating one leader order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplicationSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub details: Vec<FollowerOutcome>,
}

impl ReplicationSummary {
    fn from_outcomes(outcomes: Vec<FollowerOutcome>) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Self::default()
        };
        for outcome in &outcomes {
            match outcome.status {
                FollowerStatus::Success { .. } => summary.successful += 1,
                FollowerStatus::Failed { .. } => summary.failed += 1,
                FollowerStatus::Skipped { .. } => summary.skipped += 1,
            }
        }
        summary.details = outcomes;
        summary
    }
}

/// Fans a single leader order out to every active, copy-enabled follower.
pub struct ReplicationEngine {
    registry: Arc<ConnectionRegistry>,
    keystore: Keystore,
    sizing: SizingConfig,
}

impl ReplicationEngine {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, keystore: Keystore, sizing: SizingConfig) -> Self {
        Self {
            registry,
            keystore,
            sizing,
        }
    }

    /// Replicate one executed leader order onto all followers.
    ///
    /// # Errors
    ///
    /// Fails only when the whole fan-out must be aborted: leader adapter or
    /// equity unavailable, or the leader position state contradicts the
    /// order. Per-follower problems never surface here; they are aggregated
    /// into the summary.
    pub async fn replicate_action(
        &self,
        leader: &AccountDescriptor,
        leader_order: &Order,
    ) -> Result<ReplicationSummary> {
        let symbol = leader_order.symbol.clone();
        debug!(symbol = %symbol, side = %leader_order.side, "Replication starting");

        let followers: Vec<AccountDescriptor> = self
            .keystore
            .load_accounts(true)?
            .into_iter()
            .filter(|account| account.user_id != leader.user_id)
            .collect();

        if followers.is_empty() {
            debug!(symbol = %symbol, "No active followers, skipping replication");
            return Ok(ReplicationSummary::default());
        }

        let leader_adapter = self.registry.get_adapter(leader).await?;
        let leader_equity = leader_adapter.get_total_account_value_usdt().await?;
        if leader_equity <= MIN_USABLE_EQUITY {
            error!(equity = %leader_equity, "Leader equity unusable, aborting replication");
            return Err(Error::Execution("leader account value unavailable".to_string()));
        }

        let leader_positions = leader_adapter.get_positions(None).await?;
        let current = leader_positions
            .into_iter()
            .find(|position| position.symbol == symbol);
        let event = self.classify(leader_order, current)?;

        let leader_intended_leverage = leader_order
            .command_details
            .as_ref()
            .and_then(|details| details.leverage);

        let tasks = followers.iter().map(|follower| {
            self.replicate_for_follower(
                follower,
                leader_order,
                &event,
                leader_equity,
                leader_intended_leverage,
            )
        });
        let outcomes = join_all(tasks).await;

        let summary = ReplicationSummary::from_outcomes(outcomes);
        info!(
            symbol = %symbol,
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            skipped = summary.skipped,
            "Replication complete"
        );
        Ok(summary)
    }

    /// Decide what the leader order did to the leader position.
    ///
    /// A reduce-only order with no surviving position is a full close. A
    /// non-reduce order with no position is a contradiction (most likely a
    /// race against a prior close) and aborts; the reconciliation loop
    /// repairs whatever actually happened.
    fn classify(
        &self,
        leader_order: &Order,
        current: Option<Position>,
    ) -> Result<LeaderEvent> {
        let reduce_only = leader_order.is_reduce_only();
        match (current, reduce_only) {
            (Some(position), false) => Ok(LeaderEvent::Open(position)),
            (Some(position), true) => Ok(LeaderEvent::Partial {
                position,
                filled: leader_order.filled,
            }),
            (None, true) => {
                info!(
                    symbol = %leader_order.symbol,
                    closed = %leader_order.filled,
                    "Leader position fully closed"
                );
                let side = match leader_order.side {
                    OrderSide::Sell => PositionSide::Long,
                    OrderSide::Buy => PositionSide::Short,
                };
                Ok(LeaderEvent::Close {
                    symbol: leader_order.symbol.clone(),
                    side,
                    closed_contracts: leader_order.filled,
                })
            }
            (None, false) => {
                error!(
                    symbol = %leader_order.symbol,
                    "Leader position not found after a non-reducing order, aborting"
                );
                Err(Error::Execution(format!(
                    "leader position for {} not found",
                    leader_order.symbol
                )))
            }
        }
    }

    async fn replicate_for_follower(
        &self,
        follower: &AccountDescriptor,
        leader_order: &Order,
        event: &LeaderEvent,
        leader_equity: Decimal,
        leader_intended_leverage: Option<u32>,
    ) -> FollowerOutcome {
        let user_id = follower.user_id.clone();
        let status = self
            .follower_status(follower, leader_order, event, leader_equity, leader_intended_leverage)
            .await;

        match &status {
            FollowerStatus::Success { order_id, filled } => {
                info!(user_id = %user_id, order_id = ?order_id, filled = %filled, "Follower order placed");
            }
            FollowerStatus::Failed { reason } => {
                error!(user_id = %user_id, reason = %reason, "Follower replication failed");
            }
            FollowerStatus::Skipped { reason } => {
                warn!(user_id = %user_id, reason = %reason, "Follower skipped");
            }
        }
        FollowerOutcome { user_id, status }
    }

    async fn follower_status(
        &self,
        follower: &AccountDescriptor,
        leader_order: &Order,
        event: &LeaderEvent,
        leader_equity: Decimal,
        leader_intended_leverage: Option<u32>,
    ) -> FollowerStatus {
        let symbol = event.symbol().clone();

        let adapter = match self.registry.get_adapter(follower).await {
            Ok(adapter) => adapter,
            Err(e) => {
                return FollowerStatus::Failed {
                    reason: format!("adapter unavailable: {e}"),
                }
            }
        };

        let equity = match adapter.get_total_account_value_usdt().await {
            Ok(equity) => equity,
            Err(e) => {
                return FollowerStatus::Failed {
                    reason: format!("account value unavailable: {e}"),
                }
            }
        };
        if equity <= MIN_USABLE_EQUITY {
            return FollowerStatus::Skipped {
                reason: format!("account value too low: {equity}"),
            };
        }

        let (amount, side, reduce_only) = match event {
            LeaderEvent::Close { .. } | LeaderEvent::Partial { .. } => {
                let positions = match adapter.get_positions(None).await {
                    Ok(positions) => positions,
                    Err(e) => {
                        return FollowerStatus::Failed {
                            reason: format!("positions unavailable: {e}"),
                        }
                    }
                };
                let Some(follower_pos) =
                    positions.into_iter().find(|pos| pos.symbol == symbol)
                else {
                    return FollowerStatus::Skipped {
                        reason: "no open position to reduce".to_string(),
                    };
                };

                let amount = match event {
                    // Leader is flat: flatten the follower too.
                    LeaderEvent::Close { .. } => follower_pos.contracts,
                    LeaderEvent::Partial { position, filled } => {
                        let original = position.contracts + *filled;
                        if original <= POSITION_EPSILON {
                            return FollowerStatus::Failed {
                                reason: "leader original position size is zero".to_string(),
                            };
                        }
                        let percentage = *filled / original;
                        debug!(
                            user_id = %follower.user_id,
                            percentage = %percentage,
                            "Applying partial close"
                        );
                        follower_pos.contracts * percentage
                    }
                    LeaderEvent::Open(_) => unreachable!("open handled below"),
                };
                (amount, follower_pos.side.closing_order_side(), true)
            }
            LeaderEvent::Open(position) => {
                let leverage = leader_intended_leverage.unwrap_or(position.leverage);
                let Some(sizing) = follower_sizing(
                    adapter.as_ref(),
                    position,
                    equity,
                    leader_equity,
                    leverage,
                    &self.sizing,
                )
                .await
                else {
                    return FollowerStatus::Skipped {
                        reason: "sizing rejected the trade".to_string(),
                    };
                };

                if let Err(e) = adapter
                    .set_leverage(&symbol, sizing.leverage, MarginMode::Isolated)
                    .await
                {
                    warn!(
                        user_id = %follower.user_id,
                        leverage = sizing.leverage,
                        error = %e,
                        "Could not set follower leverage"
                    );
                }
                (sizing.amount, leader_order.side, false)
            }
        };

        if amount <= Decimal::ZERO {
            return FollowerStatus::Skipped {
                reason: format!("computed amount not positive: {amount}"),
            };
        }

        // One more pass through the exchange's precision rules; a no-op in
        // the steady state, load-bearing for close amounts copied from a
        // differently-sized position.
        let final_amount = match adapter.normalize_amount(&symbol, amount).await {
            Ok(final_amount) if final_amount > Decimal::ZERO => final_amount,
            Ok(final_amount) => {
                return FollowerStatus::Skipped {
                    reason: format!("amount vanished under normalization: {final_amount}"),
                }
            }
            Err(e) => {
                return FollowerStatus::Failed {
                    reason: format!("normalization failed: {e}"),
                }
            }
        };

        let mut request = OrderRequest::market(symbol, side, final_amount);
        request.params.reduce_only = reduce_only;

        match adapter.place_order(request).await {
            Ok(order) if order.is_failed() => FollowerStatus::Failed {
                reason: order
                    .error_message
                    .unwrap_or_else(|| "order rejected".to_string()),
            },
            Ok(order) => FollowerStatus::Success {
                order_id: order.id,
                filled: order.filled,
            },
            Err(e) => FollowerStatus::Failed {
                reason: format!("order placement failed: {e}"),
            },
        }
    }
}
