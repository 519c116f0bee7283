//! Binance USDⓈ-M futures adapter.
//!
//! One instance wraps one authenticated account. `connect` loads the futures
//! exchange info and caches per-symbol tradability filters; private endpoints
//! are signed with HMAC-SHA256 over the query string per the Binance API
//! contract.
//!
//! Rate limiting is left to the exchange client layer (`recvWindow` plus the
//! exchange's own weight accounting); the services above never orchestrate it.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::core::domain::{
    AccountDescriptor, MarginMode, Order, OrderSide, OrderStatus, OrderType, Position,
    PositionSide, Symbol,
};
use crate::error::ExchangeError;

use super::adapter::{
    ExchangeAdapter, MarketLimits, OrderParams, OrderRequest, Ticker, POSITION_EPSILON,
};

const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";
const RECV_WINDOW_MS: u64 = 5_000;

/// Binance error code for "No need to change margin type", an idempotent
/// no-op that must be treated as success.
const MARGIN_TYPE_UNCHANGED: i64 = -4046;

/// Cached tradability metadata for one market.
#[derive(Debug, Clone, Default)]
struct MarketMeta {
    step_size: Option<Decimal>,
    min_qty: Option<Decimal>,
    max_qty: Option<Decimal>,
    min_notional: Option<Decimal>,
    quantity_precision: u32,
}

pub struct BinanceAdapter {
    descriptor: AccountDescriptor,
    http: reqwest::Client,
    base_url: String,
    /// `None` until `connect` succeeds; `close` resets it.
    markets: RwLock<Option<HashMap<Symbol, MarketMeta>>>,
}

impl BinanceAdapter {
    #[must_use]
    pub fn new(descriptor: AccountDescriptor) -> Self {
        Self::with_base_url(descriptor, DEFAULT_BASE_URL)
    }

    #[must_use]
    pub fn with_base_url(descriptor: AccountDescriptor, base_url: impl Into<String>) -> Self {
        Self {
            descriptor,
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            markets: RwLock::new(None),
        }
    }

    fn market_meta(&self, symbol: &Symbol) -> Result<MarketMeta, ExchangeError> {
        let markets = self.markets.read();
        let table = markets.as_ref().ok_or(ExchangeError::NotConnected)?;
        table
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::UnknownMarket(symbol.to_string()))
    }

    fn ensure_connected(&self) -> Result<(), ExchangeError> {
        if self.markets.read().is_some() {
            Ok(())
        } else {
            Err(ExchangeError::NotConnected)
        }
    }

    fn sign(&self, payload: &str) -> Result<String, ExchangeError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(
            self.descriptor.credentials.api_secret.as_bytes(),
        )
        .map_err(|e| ExchangeError::Auth(format!("invalid API secret: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Issue a signed request against a private endpoint.
    ///
    /// Business errors (HTTP 4xx with a `{code, msg}` body) come back as
    /// [`ExchangeError::Api`]; transport failures as [`ExchangeError::Http`].
    async fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<Value, ExchangeError> {
        self.ensure_connected()?;
        params.push(("timestamp".to_string(), Utc::now().timestamp_millis().to_string()));
        params.push(("recvWindow".to_string(), RECV_WINDOW_MS.to_string()));

        let query: String = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let response = self
            .http
            .request(method, url)
            .header("X-MBX-APIKEY", &self.descriptor.credentials.api_key)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn public_request(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        let response = self.http.get(url).send().await?;
        Self::parse_response(response).await
    }

    async fn parse_response(response: reqwest::Response) -> Result<Value, ExchangeError> {
        let status = response.status();
        let body: Value = response.json().await?;

        if status.is_success() {
            return Ok(body);
        }

        let code = body["code"].as_i64().unwrap_or_else(|| i64::from(status.as_u16()));
        let message = body["msg"]
            .as_str()
            .unwrap_or("unexpected exchange response")
            .to_string();

        if status == reqwest::StatusCode::UNAUTHORIZED || code == -2014 || code == -2015 {
            return Err(ExchangeError::Auth(message));
        }
        Err(ExchangeError::Api { code, message })
    }

    fn parse_position(&self, entry: &Value) -> Option<Position> {
        let amount = dec_field(entry, "positionAmt")?;
        if amount.abs() <= POSITION_EPSILON {
            return None;
        }

        let symbol = Symbol::parse(entry["symbol"].as_str()?).ok()?;
        let side = if amount > Decimal::ZERO {
            PositionSide::Long
        } else {
            PositionSide::Short
        };
        let leverage = dec_field(entry, "leverage")
            .and_then(|l| l.to_u32())
            .unwrap_or(1)
            .max(1);
        let liquidation_price =
            dec_field(entry, "liquidationPrice").filter(|price| *price > Decimal::ZERO);

        Some(Position {
            symbol,
            side,
            contracts: amount.abs(),
            entry_price: dec_field(entry, "entryPrice").unwrap_or_default(),
            mark_price: dec_field(entry, "markPrice").unwrap_or_default(),
            leverage,
            unrealized_pnl: dec_field(entry, "unRealizedProfit").unwrap_or_default(),
            liquidation_price,
            timestamp_ms: entry["updateTime"].as_i64().filter(|ts| *ts > 0),
            exchange_id: self.descriptor.exchange_id.clone(),
            raw: entry.clone(),
        })
    }

    fn parse_order(&self, body: Value, request: &OrderRequest) -> Order {
        let status = match body["status"].as_str() {
            Some("NEW" | "PARTIALLY_FILLED") => OrderStatus::Open,
            Some("FILLED") => OrderStatus::Closed,
            Some("CANCELED") => OrderStatus::Canceled,
            Some("REJECTED" | "EXPIRED" | "EXPIRED_IN_MATCH") => OrderStatus::Failed,
            _ => OrderStatus::Unknown,
        };
        let average_price = dec_field(&body, "avgPrice").filter(|price| *price > Decimal::ZERO);

        let exchange_status = body["status"].as_str().unwrap_or("unknown").to_string();
        let raw = json!({
            "info": body,
            "params": {
                "reduceOnly": request.params.reduce_only,
                "postOnly": request.params.post_only,
            },
        });

        // A rejected/expired acknowledgement is a business failure; failed
        // orders carry no id.
        if status == OrderStatus::Failed {
            let mut order = Order::failed(
                request.symbol.clone(),
                request.side,
                request.amount,
                self.descriptor.exchange_id.clone(),
                format!("exchange reported order status {exchange_status}"),
            );
            order.order_type = request.order_type;
            order.raw = raw;
            order.command_details = request.params.command_details.clone();
            return order;
        }
        let id = raw["info"]["orderId"].as_i64().map(|id| id.to_string());

        Order {
            id,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            amount: request.amount,
            price: request.price,
            filled: dec_field(&raw["info"], "executedQty").unwrap_or_default(),
            average_price,
            status,
            timestamp_ms: raw["info"]["updateTime"].as_i64(),
            exchange_id: self.descriptor.exchange_id.clone(),
            error_message: None,
            raw,
            command_details: request.params.command_details.clone(),
        }
    }

    fn order_params(request: &OrderRequest) -> Result<Vec<(String, String)>, String> {
        let mut params = vec![
            ("symbol".to_string(), request.symbol.to_pair()),
            ("side".to_string(), request.side.as_str().to_uppercase()),
            ("quantity".to_string(), request.amount.normalize().to_string()),
            ("newClientOrderId".to_string(), format!("chk-{}", Uuid::new_v4().simple())),
        ];

        let post_only = request.params.post_only || request.order_type == OrderType::PostOnly;
        let price = request.price.map(|p| p.normalize().to_string());

        match request.order_type {
            OrderType::Market => {
                if post_only {
                    return Err("post-only orders require a limit price".to_string());
                }
                params.push(("type".to_string(), "MARKET".to_string()));
            }
            OrderType::Limit | OrderType::PostOnly => {
                let Some(price) = price else {
                    return Err("limit orders require a price".to_string());
                };
                params.push(("type".to_string(), "LIMIT".to_string()));
                params.push(("price".to_string(), price));
                // GTX = post-only: the order is rejected instead of crossing.
                let tif = if post_only { "GTX" } else { "GTC" };
                params.push(("timeInForce".to_string(), tif.to_string()));
            }
            OrderType::StopLimit => {
                let Some(price) = price else {
                    return Err("stop-limit orders require a price".to_string());
                };
                let Some(stop) = request.stop_price else {
                    return Err("stop-limit orders require a stop price".to_string());
                };
                params.push(("type".to_string(), "STOP".to_string()));
                params.push(("price".to_string(), price));
                params.push(("stopPrice".to_string(), stop.normalize().to_string()));
                params.push(("timeInForce".to_string(), "GTC".to_string()));
            }
        }

        if request.params.reduce_only {
            params.push(("reduceOnly".to_string(), "true".to_string()));
        }
        Ok(params)
    }

    fn load_market_table(info: &Value) -> HashMap<Symbol, MarketMeta> {
        let mut table = HashMap::new();
        let Some(symbols) = info["symbols"].as_array() else {
            return table;
        };

        for entry in symbols {
            let Some(symbol) = entry["symbol"].as_str().and_then(|s| Symbol::parse(s).ok())
            else {
                continue;
            };
            let mut meta = MarketMeta {
                quantity_precision: entry["quantityPrecision"].as_u64().unwrap_or(8) as u32,
                ..MarketMeta::default()
            };
            if let Some(filters) = entry["filters"].as_array() {
                for filter in filters {
                    match filter["filterType"].as_str() {
                        Some("LOT_SIZE") => {
                            meta.step_size = dec_field(filter, "stepSize")
                                .filter(|step| *step > Decimal::ZERO);
                            meta.min_qty = dec_field(filter, "minQty");
                            meta.max_qty = dec_field(filter, "maxQty");
                        }
                        Some("MIN_NOTIONAL") => {
                            meta.min_notional = dec_field(filter, "notional");
                        }
                        _ => {}
                    }
                }
            }
            table.insert(symbol, meta);
        }
        table
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn exchange_id(&self) -> &str {
        &self.descriptor.exchange_id
    }

    fn user_id(&self) -> &str {
        &self.descriptor.user_id
    }

    async fn connect(&self) -> Result<(), ExchangeError> {
        if self.markets.read().is_some() {
            return Ok(());
        }
        if self.descriptor.credentials.api_key.is_empty()
            || self.descriptor.credentials.api_secret.is_empty()
        {
            return Err(ExchangeError::Auth("missing API key or secret".to_string()));
        }

        let info = self.public_request("/fapi/v1/exchangeInfo", "").await?;
        let table = Self::load_market_table(&info);
        if table.is_empty() {
            return Err(ExchangeError::Payload("exchange info carried no symbols".to_string()));
        }
        debug!(
            user_id = %self.descriptor.user_id,
            markets = table.len(),
            "Binance adapter connected"
        );
        *self.markets.write() = Some(table);
        Ok(())
    }

    async fn close(&self) -> Result<(), ExchangeError> {
        *self.markets.write() = None;
        debug!(user_id = %self.descriptor.user_id, "Binance adapter closed");
        Ok(())
    }

    async fn get_positions(
        &self,
        symbols: Option<&[Symbol]>,
    ) -> Result<Vec<Position>, ExchangeError> {
        let mut params = Vec::new();
        if let Some([symbol]) = symbols {
            params.push(("symbol".to_string(), symbol.to_pair()));
        }
        let body = self
            .signed_request(reqwest::Method::GET, "/fapi/v2/positionRisk", params)
            .await?;

        let entries = body
            .as_array()
            .ok_or_else(|| ExchangeError::Payload("positionRisk is not an array".to_string()))?;

        let mut positions: Vec<Position> = entries
            .iter()
            .filter_map(|entry| self.parse_position(entry))
            .collect();
        if let Some(wanted) = symbols {
            positions.retain(|pos| wanted.contains(&pos.symbol));
        }
        Ok(positions)
    }

    async fn place_order(&self, request: OrderRequest) -> Result<Order, ExchangeError> {
        let params = match Self::order_params(&request) {
            Ok(params) => params,
            Err(message) => {
                return Ok(Order::failed(
                    request.symbol.clone(),
                    request.side,
                    request.amount,
                    self.descriptor.exchange_id.clone(),
                    message,
                ));
            }
        };

        match self
            .signed_request(reqwest::Method::POST, "/fapi/v1/order", params)
            .await
        {
            Ok(body) => Ok(self.parse_order(body, &request)),
            Err(e) if e.is_business_reject() => {
                error!(
                    user_id = %self.descriptor.user_id,
                    symbol = %request.symbol,
                    error = %e,
                    "Order rejected"
                );
                Ok(Order::failed(
                    request.symbol.clone(),
                    request.side,
                    request.amount,
                    self.descriptor.exchange_id.clone(),
                    e.to_string(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        symbol: &Symbol,
    ) -> Result<Value, ExchangeError> {
        self.signed_request(
            reqwest::Method::DELETE,
            "/fapi/v1/order",
            vec![
                ("symbol".to_string(), symbol.to_pair()),
                ("orderId".to_string(), order_id.to_string()),
            ],
        )
        .await
    }

    async fn set_leverage(
        &self,
        symbol: &Symbol,
        leverage: u32,
        margin_mode: MarginMode,
    ) -> Result<(), ExchangeError> {
        let margin_type = match margin_mode {
            MarginMode::Isolated => "ISOLATED",
            MarginMode::Cross => "CROSSED",
        };
        let margin_result = self
            .signed_request(
                reqwest::Method::POST,
                "/fapi/v1/marginType",
                vec![
                    ("symbol".to_string(), symbol.to_pair()),
                    ("marginType".to_string(), margin_type.to_string()),
                ],
            )
            .await;

        match margin_result {
            Ok(_) => {}
            // Already at the requested margin mode: not an error, continue
            // with the leverage-only portion.
            Err(ExchangeError::Api { code, ref message })
                if code == MARGIN_TYPE_UNCHANGED
                    || message.contains("No need to change margin type") =>
            {
                debug!(symbol = %symbol, margin_mode = margin_type, "Margin mode already set");
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Failed to set margin mode");
                return Err(e);
            }
        }

        self.signed_request(
            reqwest::Method::POST,
            "/fapi/v1/leverage",
            vec![
                ("symbol".to_string(), symbol.to_pair()),
                ("leverage".to_string(), leverage.to_string()),
            ],
        )
        .await?;
        debug!(symbol = %symbol, leverage, "Leverage set");
        Ok(())
    }

    async fn get_total_account_value_usdt(&self) -> Result<Decimal, ExchangeError> {
        let body = self
            .signed_request(reqwest::Method::GET, "/fapi/v2/account", Vec::new())
            .await?;
        dec_field(&body, "totalWalletBalance")
            .ok_or_else(|| ExchangeError::Payload("account carried no totalWalletBalance".to_string()))
    }

    async fn get_ticker(&self, symbol: &Symbol) -> Result<Ticker, ExchangeError> {
        self.ensure_connected()?;
        let pair = symbol.to_pair();

        let last = self
            .public_request("/fapi/v1/ticker/price", &format!("symbol={pair}"))
            .await
            .map(|body| dec_field(&body, "price"))?;

        // Mark price is a best-effort fallback; its absence is not an error.
        let mark_price = self
            .public_request("/fapi/v1/premiumIndex", &format!("symbol={pair}"))
            .await
            .ok()
            .and_then(|body| dec_field(&body, "markPrice"));

        Ok(Ticker { last, mark_price })
    }

    async fn normalize_amount(
        &self,
        symbol: &Symbol,
        amount: Decimal,
    ) -> Result<Decimal, ExchangeError> {
        let meta = self.market_meta(symbol)?;
        let normalized = match meta.step_size {
            Some(step) => ((amount / step).floor() * step).normalize(),
            None => amount
                .round_dp_with_strategy(meta.quantity_precision, RoundingStrategy::ToZero)
                .normalize(),
        };
        Ok(normalized)
    }

    async fn get_market_info(&self, symbol: &Symbol) -> Result<MarketLimits, ExchangeError> {
        let meta = self.market_meta(symbol)?;
        Ok(MarketLimits {
            min_amount: meta.min_qty,
            min_cost: meta.min_notional,
            amount_step: meta.step_size,
            max_amount: meta.max_qty,
        })
    }
}

/// Read a decimal that Binance may encode as either a JSON string or number.
fn dec_field(value: &Value, key: &str) -> Option<Decimal> {
    match &value[key] {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}
