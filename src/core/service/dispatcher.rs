//! Command dispatcher: executes leader intent and triggers replication.
//!
//! One `execute` at a time per leader keeps command ordering strict:
//! `set_leverage → adjust_amount → place_order → replicate`. Only successful
//! market orders are replicated; limit and stop orders would need a fill
//! stream to mirror correctly, which is out of scope.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{error, info, warn};

use crate::core::domain::{
    AccountDescriptor, Command, CommandDetails, OpenArgs, Order, OrderSide, OrderType,
    ScaleInArgs, ScaleOutArgs, Symbol,
};
use crate::core::exchange::{ConnectionRegistry, ExchangeAdapter, OrderParams, OrderRequest};
use crate::core::sizing::adjust_amount_for_limits;
use crate::error::ExchangeError;

use super::replication::{ReplicationEngine, ReplicationSummary};

/// Result of executing one leader command.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The command produced a leader order; `replication` is present only
    /// for successful market orders.
    Order {
        leader_order: Order,
        replication: Option<ReplicationSummary>,
    },
    /// The command completed without producing an order (leverage, cancel).
    Acknowledged { description: String },
    /// The command could not be executed at all.
    Failed { message: String },
}

impl ExecutionOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        match self {
            Self::Order { leader_order, .. } => !leader_order.is_failed(),
            Self::Acknowledged { .. } => true,
            Self::Failed { .. } => false,
        }
    }

    /// Structured execution report for the caller: status, the leader order
    /// if one was produced, and the replication summary if one ran. The run
    /// loop echoes this as a JSON line on stdout.
    #[must_use]
    pub fn to_report(&self) -> serde_json::Value {
        match self {
            Self::Order {
                leader_order,
                replication,
            } => json!({
                "status": if leader_order.is_failed() { "failed" } else { "success" },
                "leader_order": leader_order,
                "replication": replication,
            }),
            Self::Acknowledged { description } => json!({
                "status": "success",
                "message": description,
            }),
            Self::Failed { message } => json!({
                "status": "failed",
                "message": message,
            }),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    replication: Arc<ReplicationEngine>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, replication: Arc<ReplicationEngine>) -> Self {
        Self {
            registry,
            replication,
        }
    }

    /// Execute one leader command.
    ///
    /// Never panics and never returns a raw error: every failure mode is
    /// folded into an [`ExecutionOutcome`].
    pub async fn execute(&self, command: Command) -> ExecutionOutcome {
        let action = command.action();
        info!(action, symbol = %command.symbol(), "Executing command");

        let leader_adapter = match self.registry.leader_adapter().await {
            Ok(adapter) => adapter,
            Err(e) => {
                error!(action, error = %e, "Leader adapter unavailable");
                return ExecutionOutcome::Failed {
                    message: format!("leader adapter unavailable: {e}"),
                };
            }
        };

        let result = match command {
            Command::Buy(args) => {
                self.open_position(leader_adapter.as_ref(), args, OrderSide::Buy).await
            }
            Command::Sell(args) => {
                self.open_position(leader_adapter.as_ref(), args, OrderSide::Sell).await
            }
            Command::ScaleIn(args) => self.scale_in(leader_adapter.as_ref(), args).await,
            Command::ScaleOut(args) => self.scale_out(leader_adapter.as_ref(), args).await,
            Command::ClosePosition { symbol } => {
                self.close_position(leader_adapter.as_ref(), symbol).await
            }
            Command::SetLeverage {
                symbol,
                leverage,
                margin_mode,
            } => {
                return match leader_adapter.set_leverage(&symbol, leverage, margin_mode).await {
                    Ok(()) => ExecutionOutcome::Acknowledged {
                        description: format!("leverage for {symbol} set to {leverage}x"),
                    },
                    Err(e) => ExecutionOutcome::Failed {
                        message: format!("could not set leverage for {symbol}: {e}"),
                    },
                };
            }
            Command::Cancel { symbol, order_id } => {
                if order_id.is_empty() {
                    return ExecutionOutcome::Failed {
                        message: "cancel requires an order id".to_string(),
                    };
                }
                return match leader_adapter.cancel_order(&order_id, &symbol).await {
                    Ok(_) => ExecutionOutcome::Acknowledged {
                        description: format!("order {order_id} on {symbol} canceled"),
                    },
                    Err(e) => ExecutionOutcome::Failed {
                        message: format!("could not cancel order {order_id}: {e}"),
                    },
                };
            }
        };

        let leader_order = match result {
            Ok(order) => order,
            Err(e) => {
                error!(action, error = %e, "Command failed before reaching the exchange");
                return ExecutionOutcome::Failed {
                    message: e.to_string(),
                };
            }
        };

        if leader_order.is_failed() {
            error!(
                action,
                symbol = %leader_order.symbol,
                reason = ?leader_order.error_message,
                "Leader order failed"
            );
            return ExecutionOutcome::Order {
                leader_order,
                replication: None,
            };
        }

        if leader_order.order_type != OrderType::Market {
            info!(
                action,
                symbol = %leader_order.symbol,
                order_type = %leader_order.order_type,
                "Leader order accepted; non-market orders are not replicated at creation"
            );
            return ExecutionOutcome::Order {
                leader_order,
                replication: None,
            };
        }

        let leader = self
            .registry
            .leader_descriptor()
            .unwrap_or_else(AccountDescriptor::leader_token);
        let replication = match self.replication.replicate_action(&leader, &leader_order).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                error!(action, error = %e, "Replication aborted");
                None
            }
        };

        ExecutionOutcome::Order {
            leader_order,
            replication,
        }
    }

    async fn open_position(
        &self,
        adapter: &dyn ExchangeAdapter,
        args: OpenArgs,
        side: OrderSide,
    ) -> Result<Order, ExchangeError> {
        let OpenArgs {
            symbol,
            amount,
            leverage,
            margin_mode,
            order_type,
            price,
            post_only,
        } = args;

        // Leverage must be in place before the order; a failure here aborts
        // the trade rather than opening it at whatever was set previously.
        if let Err(e) = adapter.set_leverage(&symbol, leverage, margin_mode).await {
            let message =
                format!("could not set leverage {leverage}x for {symbol}, order aborted: {e}");
            error!(symbol = %symbol, error = %e, "Leverage precondition failed");
            return Ok(Order::failed(symbol, side, amount, adapter.exchange_id(), message));
        }

        let Some(final_amount) = adjust_amount_for_limits(adapter, &symbol, amount).await else {
            let message = format!("amount {amount} could not be adjusted to market limits");
            return Ok(Order::failed(symbol, side, amount, adapter.exchange_id(), message));
        };
        if final_amount != amount {
            warn!(
                symbol = %symbol,
                requested = %amount,
                adjusted = %final_amount,
                "Order amount adjusted for market limits"
            );
        }

        adapter
            .place_order(OrderRequest {
                symbol,
                order_type,
                side,
                amount: final_amount,
                price,
                stop_price: None,
                params: OrderParams {
                    reduce_only: false,
                    post_only,
                    command_details: Some(CommandDetails {
                        action: side.as_str().to_string(),
                        leverage: Some(leverage),
                        amount: Some(amount),
                    }),
                },
            })
            .await
    }

    async fn close_position(
        &self,
        adapter: &dyn ExchangeAdapter,
        symbol: Symbol,
    ) -> Result<Order, ExchangeError> {
        let Some(position) = self.find_position(adapter, &symbol).await? else {
            let message = format!("no open position to close for {symbol}");
            warn!(symbol = %symbol, "Close requested without an open position");
            return Ok(Order::failed(
                symbol,
                OrderSide::Sell,
                Decimal::ZERO,
                adapter.exchange_id(),
                message,
            ));
        };

        info!(symbol = %symbol, contracts = %position.contracts, "Closing position at market");
        adapter
            .place_order(
                OrderRequest::market(
                    symbol,
                    position.side.closing_order_side(),
                    position.contracts,
                )
                .reduce_only(),
            )
            .await
    }

    async fn scale_out(
        &self,
        adapter: &dyn ExchangeAdapter,
        args: ScaleOutArgs,
    ) -> Result<Order, ExchangeError> {
        let ScaleOutArgs {
            symbol,
            amount,
            percentage,
            order_type,
            price,
            post_only,
        } = args;

        let Some(position) = self.find_position(adapter, &symbol).await? else {
            let message = format!("no open position to scale out of for {symbol}");
            return Ok(Order::failed(
                symbol,
                OrderSide::Sell,
                Decimal::ZERO,
                adapter.exchange_id(),
                message,
            ));
        };
        let side = position.side.closing_order_side();

        let target = match (amount, percentage) {
            (Some(amount), _) => amount,
            (None, Some(percentage)) => position.contracts * percentage / dec!(100),
            (None, None) => Decimal::ZERO,
        };
        if target <= Decimal::ZERO {
            let message = format!("invalid scale-out amount: {target}");
            return Ok(Order::failed(symbol, side, target, adapter.exchange_id(), message));
        }

        let adjusted = adjust_amount_for_limits(adapter, &symbol, target).await;
        let final_amount = match adjusted {
            Some(final_amount) if final_amount <= position.contracts => final_amount,
            _ => {
                let message = format!(
                    "scale-out amount {target} could not be adjusted within the open position ({})",
                    position.contracts
                );
                return Ok(Order::failed(symbol, side, target, adapter.exchange_id(), message));
            }
        };

        adapter
            .place_order(OrderRequest {
                symbol,
                order_type,
                side,
                amount: final_amount,
                price,
                stop_price: None,
                params: OrderParams {
                    reduce_only: true,
                    post_only,
                    command_details: None,
                },
            })
            .await
    }

    async fn scale_in(
        &self,
        adapter: &dyn ExchangeAdapter,
        args: ScaleInArgs,
    ) -> Result<Order, ExchangeError> {
        let ScaleInArgs {
            symbol,
            side,
            amount,
            order_type,
            price,
            post_only,
        } = args;

        let Some(position) = self.find_position(adapter, &symbol).await? else {
            let message = format!("no open position to scale into for {symbol}");
            return Ok(Order::failed(symbol, side, amount, adapter.exchange_id(), message));
        };

        if amount <= Decimal::ZERO {
            let message = format!("invalid scale-in amount: {amount}");
            return Ok(Order::failed(symbol, side, amount, adapter.exchange_id(), message));
        }

        // Scale-in must trade in the position's direction; the opposite side
        // would be a hidden reduce.
        let expected = position.side.entry_order_side();
        if side != expected {
            let message = format!(
                "scale-in side mismatch: {} position takes {expected} orders, got {side}",
                position.side
            );
            return Ok(Order::failed(symbol, side, amount, adapter.exchange_id(), message));
        }

        let Some(final_amount) = adjust_amount_for_limits(adapter, &symbol, amount).await else {
            let message = format!("scale-in amount {amount} does not satisfy market limits");
            return Ok(Order::failed(symbol, side, amount, adapter.exchange_id(), message));
        };
        if final_amount != amount {
            warn!(
                symbol = %symbol,
                requested = %amount,
                adjusted = %final_amount,
                "Scale-in amount adjusted for market limits"
            );
        }

        adapter
            .place_order(OrderRequest {
                symbol,
                order_type,
                side,
                amount: final_amount,
                price,
                stop_price: None,
                params: OrderParams {
                    reduce_only: false,
                    post_only,
                    command_details: Some(CommandDetails {
                        action: "scale_in".to_string(),
                        leverage: None,
                        amount: Some(amount),
                    }),
                },
            })
            .await
    }

    async fn find_position(
        &self,
        adapter: &dyn ExchangeAdapter,
        symbol: &Symbol,
    ) -> Result<Option<crate::core::domain::Position>, ExchangeError> {
        let positions = adapter.get_positions(Some(std::slice::from_ref(symbol))).await?;
        Ok(positions.into_iter().find(|pos| &pos.symbol == symbol))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rust_decimal_macros::dec;

    use crate::core::domain::{ApiCredentials, MarginMode, PositionSide};
    use crate::core::exchange::mock::{test_position, MockAdapter};
    use crate::core::exchange::{AdapterFactoryFn, MarketLimits};
    use crate::core::sizing::SizingConfig;
    use crate::core::store::Keystore;

    use super::*;

    fn empty_keystore() -> (tempfile::NamedTempFile, Keystore) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();
        let keystore = Keystore::new(file.path());
        (file, keystore)
    }

    fn leader_descriptor() -> AccountDescriptor {
        AccountDescriptor {
            user_id: "leader-1".to_string(),
            exchange_id: "binance".to_string(),
            credentials: ApiCredentials {
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
                api_passphrase: None,
            },
            copy_enabled: false,
        }
    }

    fn harness(adapter: Arc<MockAdapter>) -> (Dispatcher, tempfile::NamedTempFile) {
        let factory: AdapterFactoryFn = {
            let adapter = adapter.clone();
            Arc::new(move |_| Ok(adapter.clone() as Arc<dyn ExchangeAdapter>))
        };
        let registry = Arc::new(ConnectionRegistry::with_factory(factory));
        registry.set_leader(leader_descriptor());
        let (file, keystore) = empty_keystore();
        let replication = Arc::new(ReplicationEngine::new(
            registry.clone(),
            keystore,
            SizingConfig::default(),
        ));
        (Dispatcher::new(registry, replication), file)
    }

    fn btc_adapter() -> MockAdapter {
        MockAdapter::new("leader-1", "binance")
            .with_equity(dec!(10000))
            .with_limits(MarketLimits {
                min_amount: Some(dec!(0.001)),
                min_cost: Some(dec!(5)),
                amount_step: Some(dec!(0.001)),
                max_amount: None,
            })
            .with_last_price(dec!(30000))
    }

    fn open_args(amount: Decimal, leverage: u32) -> OpenArgs {
        OpenArgs {
            symbol: Symbol::parse("BTC/USDT").unwrap(),
            amount,
            leverage,
            margin_mode: MarginMode::Isolated,
            order_type: OrderType::Market,
            price: None,
            post_only: false,
        }
    }

    #[tokio::test]
    async fn open_sets_leverage_then_places_adjusted_order() {
        let adapter = Arc::new(
            btc_adapter().with_position(test_position(
                "BTC/USDT",
                PositionSide::Long,
                dec!(0.5),
                dec!(30000),
                5,
            )),
        );
        let (dispatcher, _file) = harness(adapter.clone());

        let outcome = dispatcher.execute(Command::Buy(open_args(dec!(0.5), 5))).await;
        assert!(outcome.succeeded());

        let leverage = adapter.leverage_set();
        assert_eq!(leverage.len(), 1);
        assert_eq!(leverage[0].1, 5);

        let placed = adapter.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].amount, dec!(0.5));
        let details = placed[0].params.command_details.as_ref().unwrap();
        assert_eq!(details.leverage, Some(5));
        assert_eq!(details.action, "buy");

        let ExecutionOutcome::Order { replication, .. } = outcome else {
            panic!("expected order outcome");
        };
        // Empty follower set: replication ran and found nobody.
        assert_eq!(replication.unwrap().total, 0);
    }

    #[tokio::test]
    async fn close_position_issues_full_reduce_only_opposite_order() {
        let adapter = Arc::new(
            btc_adapter().with_position(test_position(
                "BTC/USDT",
                PositionSide::Long,
                dec!(2),
                dec!(30000),
                5,
            )),
        );
        let (dispatcher, _file) = harness(adapter.clone());

        let outcome = dispatcher
            .execute(Command::ClosePosition {
                symbol: Symbol::parse("BTC/USDT").unwrap(),
            })
            .await;
        assert!(outcome.succeeded());

        let placed = adapter.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].side, OrderSide::Sell);
        assert_eq!(placed[0].amount, dec!(2));
        assert!(placed[0].params.reduce_only);
    }

    #[tokio::test]
    async fn close_without_position_fails() {
        let adapter = Arc::new(btc_adapter());
        let (dispatcher, _file) = harness(adapter.clone());

        let outcome = dispatcher
            .execute(Command::ClosePosition {
                symbol: Symbol::parse("BTC/USDT").unwrap(),
            })
            .await;

        assert!(!outcome.succeeded());
        assert!(adapter.placed().is_empty());
    }

    #[tokio::test]
    async fn scale_out_percentage_closes_a_quarter() {
        let adapter = Arc::new(
            btc_adapter().with_position(test_position(
                "BTC/USDT",
                PositionSide::Long,
                dec!(4),
                dec!(30000),
                5,
            )),
        );
        let (dispatcher, _file) = harness(adapter.clone());

        let outcome = dispatcher
            .execute(Command::ScaleOut(ScaleOutArgs {
                symbol: Symbol::parse("BTC/USDT").unwrap(),
                amount: None,
                percentage: Some(dec!(25)),
                order_type: OrderType::Market,
                price: None,
                post_only: false,
            }))
            .await;
        assert!(outcome.succeeded());

        let placed = adapter.placed();
        assert_eq!(placed[0].amount, dec!(1));
        assert_eq!(placed[0].side, OrderSide::Sell);
        assert!(placed[0].params.reduce_only);
    }

    #[tokio::test]
    async fn scale_out_larger_than_position_fails() {
        let adapter = Arc::new(
            btc_adapter().with_position(test_position(
                "BTC/USDT",
                PositionSide::Long,
                dec!(0.5),
                dec!(30000),
                5,
            )),
        );
        let (dispatcher, _file) = harness(adapter.clone());

        let outcome = dispatcher
            .execute(Command::ScaleOut(ScaleOutArgs {
                symbol: Symbol::parse("BTC/USDT").unwrap(),
                amount: Some(dec!(1)),
                percentage: None,
                order_type: OrderType::Market,
                price: None,
                post_only: false,
            }))
            .await;

        assert!(!outcome.succeeded());
        assert!(adapter.placed().is_empty());
    }

    #[tokio::test]
    async fn scale_in_rejects_side_mismatch() {
        let adapter = Arc::new(
            btc_adapter().with_position(test_position(
                "BTC/USDT",
                PositionSide::Short,
                dec!(1),
                dec!(30000),
                5,
            )),
        );
        let (dispatcher, _file) = harness(adapter.clone());

        let outcome = dispatcher
            .execute(Command::ScaleIn(ScaleInArgs {
                symbol: Symbol::parse("BTC/USDT").unwrap(),
                side: OrderSide::Buy,
                amount: dec!(0.5),
                order_type: OrderType::Market,
                price: None,
                post_only: false,
            }))
            .await;

        assert!(!outcome.succeeded());
        assert!(adapter.placed().is_empty());
    }

    #[tokio::test]
    async fn scale_in_matching_side_places_non_reduce_order() {
        let adapter = Arc::new(
            btc_adapter().with_position(test_position(
                "BTC/USDT",
                PositionSide::Short,
                dec!(1),
                dec!(30000),
                5,
            )),
        );
        let (dispatcher, _file) = harness(adapter.clone());

        let outcome = dispatcher
            .execute(Command::ScaleIn(ScaleInArgs {
                symbol: Symbol::parse("BTC/USDT").unwrap(),
                side: OrderSide::Sell,
                amount: dec!(0.5),
                order_type: OrderType::Market,
                price: None,
                post_only: false,
            }))
            .await;
        assert!(outcome.succeeded());

        let placed = adapter.placed();
        assert_eq!(placed[0].side, OrderSide::Sell);
        assert!(!placed[0].params.reduce_only);
    }

    #[tokio::test]
    async fn limit_orders_are_not_replicated() {
        let adapter = Arc::new(
            btc_adapter().with_position(test_position(
                "BTC/USDT",
                PositionSide::Long,
                dec!(1),
                dec!(30000),
                5,
            )),
        );
        let (dispatcher, _file) = harness(adapter);

        let mut args = open_args(dec!(0.5), 5);
        args.order_type = OrderType::Limit;
        args.price = Some(dec!(29000));

        let outcome = dispatcher.execute(Command::Buy(args)).await;
        let ExecutionOutcome::Order { replication, .. } = outcome else {
            panic!("expected order outcome");
        };
        assert!(replication.is_none());
    }

    #[tokio::test]
    async fn set_leverage_is_acknowledged_not_replicated() {
        let adapter = Arc::new(btc_adapter());
        let (dispatcher, _file) = harness(adapter.clone());

        let outcome = dispatcher
            .execute(Command::SetLeverage {
                symbol: Symbol::parse("BTC/USDT").unwrap(),
                leverage: 10,
                margin_mode: MarginMode::Cross,
            })
            .await;

        assert!(matches!(outcome, ExecutionOutcome::Acknowledged { .. }));
        assert_eq!(adapter.leverage_set().len(), 1);
        assert!(adapter.placed().is_empty());
    }

    #[tokio::test]
    async fn cancel_requires_an_order_id() {
        let adapter = Arc::new(btc_adapter());
        let (dispatcher, _file) = harness(adapter);

        let outcome = dispatcher
            .execute(Command::Cancel {
                symbol: Symbol::parse("BTC/USDT").unwrap(),
                order_id: String::new(),
            })
            .await;

        assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn report_carries_leader_order_and_replication_summary() {
        let adapter = Arc::new(
            btc_adapter().with_position(test_position(
                "BTC/USDT",
                PositionSide::Long,
                dec!(0.5),
                dec!(30000),
                5,
            )),
        );
        let (dispatcher, _file) = harness(adapter);

        let outcome = dispatcher.execute(Command::Buy(open_args(dec!(0.5), 5))).await;
        let report = outcome.to_report();
        assert_eq!(report["status"], "success");
        assert_eq!(report["leader_order"]["symbol"], "BTC/USDT");
        assert_eq!(report["replication"]["total"], 0);
    }

    #[tokio::test]
    async fn report_marks_failed_commands() {
        let adapter = Arc::new(btc_adapter());
        let (dispatcher, _file) = harness(adapter);

        let outcome = dispatcher
            .execute(Command::ClosePosition {
                symbol: Symbol::parse("BTC/USDT").unwrap(),
            })
            .await;
        let report = outcome.to_report();
        assert_eq!(report["status"], "failed");
        assert!(report["leader_order"]["error_message"].is_string());

        let outcome = dispatcher
            .execute(Command::Cancel {
                symbol: Symbol::parse("BTC/USDT").unwrap(),
                order_id: String::new(),
            })
            .await;
        let report = outcome.to_report();
        assert_eq!(report["status"], "failed");
        assert!(report["message"].is_string());
    }

    #[tokio::test]
    async fn missing_leader_slot_fails_cleanly() {
        let adapter = Arc::new(btc_adapter());
        let factory: AdapterFactoryFn = {
            let adapter = adapter.clone();
            Arc::new(move |_| Ok(adapter.clone() as Arc<dyn ExchangeAdapter>))
        };
        let registry = Arc::new(ConnectionRegistry::with_factory(factory));
        let (_file, keystore) = empty_keystore();
        let replication = Arc::new(ReplicationEngine::new(
            registry.clone(),
            keystore,
            SizingConfig::default(),
        ));
        let dispatcher = Dispatcher::new(registry, replication);

        let outcome = dispatcher.execute(Command::Buy(open_args(dec!(0.5), 5))).await;
        assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));
    }
}
