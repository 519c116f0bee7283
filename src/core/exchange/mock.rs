//! In-memory mock adapter for unit tests.
//!
//! Behaves like a well-behaved exchange: orders fill instantly, amounts are
//! floored to the configured step, and every state-changing call is recorded
//! for assertions.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::json;

use crate::core::domain::{
    MarginMode, Order, OrderStatus, Position, Symbol,
};
use crate::error::ExchangeError;

use super::adapter::{ExchangeAdapter, MarketLimits, OrderRequest, Ticker};

pub struct MockAdapter {
    user_id: String,
    exchange_id: String,
    equity: Mutex<Decimal>,
    positions: Mutex<Vec<Position>>,
    limits: Mutex<MarketLimits>,
    ticker: Mutex<Ticker>,
    fail_connect: bool,
    fail_orders_with: Mutex<Option<String>>,
    pub connect_count: AtomicU32,
    pub close_count: AtomicU32,
    pub placed_orders: Mutex<Vec<OrderRequest>>,
    pub leverage_calls: Mutex<Vec<(Symbol, u32, MarginMode)>>,
}

impl MockAdapter {
    pub fn new(user_id: &str, exchange_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            exchange_id: exchange_id.to_string(),
            equity: Mutex::new(Decimal::ZERO),
            positions: Mutex::new(Vec::new()),
            limits: Mutex::new(MarketLimits::default()),
            ticker: Mutex::new(Ticker::default()),
            fail_connect: false,
            fail_orders_with: Mutex::new(None),
            connect_count: AtomicU32::new(0),
            close_count: AtomicU32::new(0),
            placed_orders: Mutex::new(Vec::new()),
            leverage_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_equity(self, equity: Decimal) -> Self {
        *self.equity.lock().unwrap() = equity;
        self
    }

    pub fn with_position(self, position: Position) -> Self {
        self.positions.lock().unwrap().push(position);
        self
    }

    pub fn with_limits(self, limits: MarketLimits) -> Self {
        *self.limits.lock().unwrap() = limits;
        self
    }

    pub fn with_last_price(self, price: Decimal) -> Self {
        self.ticker.lock().unwrap().last = Some(price);
        self
    }

    pub fn with_mark_price(self, price: Decimal) -> Self {
        self.ticker.lock().unwrap().mark_price = Some(price);
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_orders(self, message: &str) -> Self {
        *self.fail_orders_with.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.placed_orders.lock().unwrap().clone()
    }

    pub fn leverage_set(&self) -> Vec<(Symbol, u32, MarginMode)> {
        self.leverage_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeAdapter for MockAdapter {
    fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn connect(&self) -> Result<(), ExchangeError> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            Err(ExchangeError::Auth("mock connect failure".to_string()))
        } else {
            Ok(())
        }
    }

    async fn close(&self) -> Result<(), ExchangeError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_positions(
        &self,
        symbols: Option<&[Symbol]>,
    ) -> Result<Vec<Position>, ExchangeError> {
        let positions = self.positions.lock().unwrap().clone();
        Ok(match symbols {
            Some(wanted) => positions
                .into_iter()
                .filter(|pos| wanted.contains(&pos.symbol))
                .collect(),
            None => positions,
        })
    }

    async fn place_order(&self, request: OrderRequest) -> Result<Order, ExchangeError> {
        self.placed_orders.lock().unwrap().push(request.clone());

        if let Some(message) = self.fail_orders_with.lock().unwrap().clone() {
            return Ok(Order::failed(
                request.symbol.clone(),
                request.side,
                request.amount,
                self.exchange_id.clone(),
                message,
            ));
        }

        let price = self.ticker.lock().unwrap().price();
        let id = format!("mock-{}", self.placed_orders.lock().unwrap().len());
        Ok(Order {
            id: Some(id),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            amount: request.amount,
            price: request.price,
            filled: request.amount,
            average_price: price,
            status: OrderStatus::Closed,
            timestamp_ms: Some(0),
            exchange_id: self.exchange_id.clone(),
            error_message: None,
            raw: json!({
                "info": {"reduceOnly": request.params.reduce_only},
                "params": {"reduceOnly": request.params.reduce_only},
            }),
            command_details: request.params.command_details.clone(),
        })
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        _symbol: &Symbol,
    ) -> Result<serde_json::Value, ExchangeError> {
        Ok(json!({"orderId": order_id, "status": "CANCELED"}))
    }

    async fn set_leverage(
        &self,
        symbol: &Symbol,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> Result<(), ExchangeError> {
        self.leverage_calls
            .lock()
            .unwrap()
            .push((symbol.clone(), leverage, margin_mode));
        Ok(())
    }

    async fn get_total_account_value_usdt(&self) -> Result<Decimal, ExchangeError> {
        Ok(*self.equity.lock().unwrap())
    }

    async fn get_ticker(&self, _symbol: &Symbol) -> Result<Ticker, ExchangeError> {
        Ok(*self.ticker.lock().unwrap())
    }

    async fn normalize_amount(
        &self,
        symbol: &Symbol,
        amount: Decimal,
    ) -> Result<Decimal, ExchangeError> {
        let _ = symbol;
        let step = self.limits.lock().unwrap().amount_step;
        let normalized = match step {
            Some(step) if step > Decimal::ZERO => ((amount / step).floor() * step).normalize(),
            _ => amount.round_dp_with_strategy(8, RoundingStrategy::ToZero).normalize(),
        };
        Ok(normalized)
    }

    async fn get_market_info(&self, _symbol: &Symbol) -> Result<MarketLimits, ExchangeError> {
        Ok(self.limits.lock().unwrap().clone())
    }
}

/// Convenience constructor for a position snapshot in tests.
pub fn test_position(
    symbol: &str,
    side: crate::core::domain::PositionSide,
    contracts: Decimal,
    entry_price: Decimal,
    leverage: u32,
) -> Position {
    Position {
        symbol: Symbol::parse(symbol).unwrap(),
        side,
        contracts,
        entry_price,
        mark_price: entry_price,
        leverage,
        unrealized_pnl: Decimal::ZERO,
        liquidation_price: None,
        timestamp_ms: None,
        exchange_id: "binance".to_string(),
        raw: serde_json::Value::Null,
    }
}
