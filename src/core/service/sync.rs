//! Periodic reconciliation between leader and follower accounts.
//!
//! Replication handles the instant path; this loop repairs everything it
//! missed. Each cycle closes follower positions the leader no longer holds
//! (orphans) and opens positions the follower missed (late-join), the latter
//! only inside conservative admission gates: a fill far from the leader's
//! entry price or on a stale position is worse than no fill.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::domain::{AccountDescriptor, MarginMode, Position, Symbol};
use crate::core::exchange::{ConnectionRegistry, ExchangeAdapter, OrderRequest};
use crate::core::sizing::{follower_sizing, SizingConfig, MIN_USABLE_EQUITY};
use crate::core::store::Keystore;
use crate::error::Result;

/// Tunables for the reconciliation loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between reconciliation cycles.
    pub interval_secs: u64,
    /// Maximum relative distance between the current price and the leader's
    /// entry price for a late-join (0.0075 = 0.75%).
    pub max_price_drift: Decimal,
    /// Maximum age of a leader position eligible for late-join, in minutes.
    pub max_position_age_minutes: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 20,
            max_price_drift: dec!(0.0075),
            max_position_age_minutes: 30,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Handle to a running reconciliation loop.
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Signal the loop to stop and wait for it to finish. The in-flight
    /// cycle runs to completion; only the sleep between cycles is cut short.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Sync task did not shut down cleanly");
        }
    }
}

pub struct SyncService {
    registry: Arc<ConnectionRegistry>,
    keystore: Keystore,
    sizing: SizingConfig,
    config: SyncConfig,
}

impl SyncService {
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        keystore: Keystore,
        sizing: SizingConfig,
        config: SyncConfig,
    ) -> Self {
        Self {
            registry,
            keystore,
            sizing,
            config,
        }
    }

    /// Spawn the reconciliation loop. A failing cycle is logged and never
    /// stops the loop.
    pub fn start(self: Arc<Self>) -> SyncHandle {
        let (shutdown, mut rx) = watch::channel(false);
        let interval = self.config.interval();
        info!(interval_secs = self.config.interval_secs, "Reconciliation loop starting");

        let task = tokio::spawn(async move {
            loop {
                if let Err(e) = self.run_cycle().await {
                    error!(error = %e, "Reconciliation cycle failed");
                }
                tokio::select! {
                    changed = rx.changed() => {
                        // A send or a dropped handle both end the loop; the
                        // cycle above already ran to completion.
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("Reconciliation loop stopped");
        });

        SyncHandle { shutdown, task }
    }

    /// Run one reconciliation cycle across all followers.
    pub async fn run_cycle(&self) -> Result<()> {
        debug!("Reconciliation cycle starting");

        let leader_adapter = self.registry.leader_adapter().await?;
        let leader_equity = leader_adapter.get_total_account_value_usdt().await?;
        if leader_equity <= MIN_USABLE_EQUITY {
            warn!(equity = %leader_equity, "Leader equity unusable, skipping cycle");
            return Ok(());
        }

        let leader_positions: HashMap<Symbol, Position> = leader_adapter
            .get_positions(None)
            .await?
            .into_iter()
            .map(|position| (position.symbol.clone(), position))
            .collect();

        let leader_user_id = self
            .registry
            .leader_descriptor()
            .map(|descriptor| descriptor.user_id)
            .unwrap_or_default();
        let followers: Vec<AccountDescriptor> = self
            .keystore
            .load_accounts(true)?
            .into_iter()
            .filter(|account| account.user_id != leader_user_id)
            .collect();

        let tasks = followers.iter().map(|follower| {
            self.synchronize_follower(follower, &leader_positions, leader_equity)
        });
        join_all(tasks).await;

        debug!("Reconciliation cycle complete");
        Ok(())
    }

    /// Bring one follower in line with the leader. All failures are local:
    /// they are logged and the remaining work continues.
    async fn synchronize_follower(
        &self,
        follower: &AccountDescriptor,
        leader_positions: &HashMap<Symbol, Position>,
        leader_equity: Decimal,
    ) {
        let user_id = &follower.user_id;
        let adapter = match self.registry.get_adapter(follower).await {
            Ok(adapter) => adapter,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Follower adapter unavailable");
                return;
            }
        };

        let equity = match adapter.get_total_account_value_usdt().await {
            Ok(equity) => equity,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Follower account value unavailable");
                return;
            }
        };
        if equity <= MIN_USABLE_EQUITY {
            warn!(user_id = %user_id, equity = %equity, "Follower equity too low, skipping");
            return;
        }

        let follower_positions: HashMap<Symbol, Position> = match adapter.get_positions(None).await
        {
            Ok(positions) => positions
                .into_iter()
                .map(|position| (position.symbol.clone(), position))
                .collect(),
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Follower positions unavailable");
                return;
            }
        };

        // Orphans: follower positions with no leader counterpart.
        for (symbol, position) in &follower_positions {
            if leader_positions.contains_key(symbol) {
                continue;
            }
            info!(
                user_id = %user_id,
                symbol = %symbol,
                contracts = %position.contracts,
                "Closing orphan position"
            );
            let request = OrderRequest::market(
                symbol.clone(),
                position.side.closing_order_side(),
                position.contracts,
            )
            .reduce_only();
            match adapter.place_order(request).await {
                Ok(order) if order.is_failed() => {
                    error!(
                        user_id = %user_id,
                        symbol = %symbol,
                        reason = ?order.error_message,
                        "Orphan close rejected"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(user_id = %user_id, symbol = %symbol, error = %e, "Orphan close failed");
                }
            }
        }

        // Late-join: leader positions the follower lacks.
        for (symbol, leader_position) in leader_positions {
            if follower_positions.contains_key(symbol) {
                continue;
            }
            if !self.should_late_join(adapter.as_ref(), leader_position).await {
                continue;
            }

            let Some(sizing) = follower_sizing(
                adapter.as_ref(),
                leader_position,
                equity,
                leader_equity,
                leader_position.leverage,
                &self.sizing,
            )
            .await
            else {
                warn!(user_id = %user_id, symbol = %symbol, "Late-join sizing rejected");
                continue;
            };

            if let Err(e) = adapter
                .set_leverage(symbol, sizing.leverage, MarginMode::Isolated)
                .await
            {
                warn!(user_id = %user_id, symbol = %symbol, error = %e, "Late-join leverage not set");
            }

            info!(
                user_id = %user_id,
                symbol = %symbol,
                amount = %sizing.amount,
                leverage = sizing.leverage,
                "Late-joining leader position"
            );
            let request = OrderRequest::market(
                symbol.clone(),
                leader_position.side.entry_order_side(),
                sizing.amount,
            );
            match adapter.place_order(request).await {
                Ok(order) if order.is_failed() => {
                    error!(
                        user_id = %user_id,
                        symbol = %symbol,
                        reason = ?order.error_message,
                        "Late-join order rejected"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(user_id = %user_id, symbol = %symbol, error = %e, "Late-join order failed");
                }
            }
        }
    }

    /// Admission gates for opening a missed position. Any failure to read
    /// the data rejects conservatively.
    async fn should_late_join(
        &self,
        adapter: &dyn ExchangeAdapter,
        leader_position: &Position,
    ) -> bool {
        let symbol = &leader_position.symbol;

        // Price-drift gate: the follower would fill at today's price, not
        // the leader's entry.
        let current = match adapter.get_ticker(symbol).await {
            Ok(ticker) => ticker.last.filter(|price| *price > Decimal::ZERO),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Late-join ticker unavailable, rejecting");
                return false;
            }
        };
        let Some(current) = current else {
            warn!(symbol = %symbol, "Late-join has no usable price, rejecting");
            return false;
        };
        if leader_position.entry_price <= Decimal::ZERO {
            warn!(symbol = %symbol, "Leader entry price unusable, rejecting late-join");
            return false;
        }
        let drift =
            ((current - leader_position.entry_price) / leader_position.entry_price).abs();
        if drift > self.config.max_price_drift {
            debug!(
                symbol = %symbol,
                drift = %drift,
                max = %self.config.max_price_drift,
                "Late-join rejected by price drift"
            );
            return false;
        }

        // Age gate: only positions the leader opened recently are worth
        // chasing.
        if let Some(timestamp_ms) = leader_position.timestamp_ms.filter(|ts| *ts > 0) {
            let age_minutes = (Utc::now().timestamp_millis() - timestamp_ms) / 60_000;
            if age_minutes > self.config.max_position_age_minutes {
                debug!(
                    symbol = %symbol,
                    age_minutes,
                    "Late-join rejected by position age"
                );
                return false;
            }
        }

        true
    }
}
