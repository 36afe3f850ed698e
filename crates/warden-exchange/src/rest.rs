//! Signed REST client for a USDⓈ-M style futures API.
//!
//! Signed endpoints carry `timestamp` and `recvWindow` and an HMAC-SHA256
//! signature of the query string. Every response's used-weight header is
//! fed to the shared [`BackoffCoordinator`]; while it is suspended the
//! client refuses to send.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};
use warden_core::{
    ClientOrderId, Clock, Kline, OpenOrder, OrderKind, OrderRequest, OrderSide, PlacedOrder,
    Position, PositionSide, Price, Size, SymbolInfo,
};
use zeroize::Zeroizing;

use crate::api::{BoxFuture, ExchangeApi};
use crate::backoff::BackoffCoordinator;
use crate::error::{ExchangeError, ExchangeResult};

type HmacSha256 = Hmac<Sha256>;

const API_KEY_HEADER: &str = "X-MBX-APIKEY";
const USED_WEIGHT_HEADER: &str = "x-mbx-used-weight-1m";
const API_KEY_ENV: &str = "WARDEN_API_KEY";
const API_SECRET_ENV: &str = "WARDEN_API_SECRET";

/// API credentials. Both values are wiped from memory on drop.
pub struct Credentials {
    api_key: Zeroizing<String>,
    api_secret: Zeroizing<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: Zeroizing::new(api_key.into()),
            api_secret: Zeroizing::new(api_secret.into()),
        }
    }

    /// Read `WARDEN_API_KEY` / `WARDEN_API_SECRET`.
    pub fn from_env() -> ExchangeResult<Self> {
        let api_key =
            std::env::var(API_KEY_ENV).map_err(|_| ExchangeError::MissingCredentials(API_KEY_ENV))?;
        let api_secret = std::env::var(API_SECRET_ENV)
            .map_err(|_| ExchangeError::MissingCredentials(API_SECRET_ENV))?;
        Ok(Self::new(api_key, api_secret))
    }

    /// Hex HMAC-SHA256 of `payload` keyed by the API secret.
    pub fn sign(&self, payload: &str) -> ExchangeResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Signature(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub recv_window_ms: u64,
    pub request_timeout_ms: u64,
}

pub struct RestExchangeClient {
    http: Client,
    base_url: String,
    recv_window_ms: u64,
    credentials: Credentials,
    backoff: Arc<BackoffCoordinator>,
    clock: Arc<dyn Clock>,
    symbol_cache: RwLock<HashMap<String, SymbolInfo>>,
}

impl RestExchangeClient {
    pub fn new(
        config: RestConfig,
        credentials: Credentials,
        backoff: Arc<BackoffCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> ExchangeResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ExchangeError::Transport(format!("Failed to create HTTP client: {e}")))?;

        info!(base_url = %config.base_url, "Exchange REST client created");

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            recv_window_ms: config.recv_window_ms,
            credentials,
            backoff,
            clock,
            symbol_cache: RwLock::new(HashMap::new()),
        })
    }

    async fn send_public(&self, path: &str, params: Vec<(&str, String)>) -> ExchangeResult<Response> {
        let query = build_query_string(&params);
        let url = build_url(&self.base_url, path, &query);
        self.dispatch(Method::GET, path, url, false).await
    }

    async fn send_signed(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> ExchangeResult<Response> {
        params.push(("timestamp", self.clock.now_ms().to_string()));
        params.push(("recvWindow", self.recv_window_ms.to_string()));
        let mut query = build_query_string(&params);
        let signature = self.credentials.sign(&query)?;
        query.push_str("&signature=");
        query.push_str(&signature);
        let url = build_url(&self.base_url, path, &query);
        self.dispatch(method, path, url, true).await
    }

    async fn dispatch(
        &self,
        method: Method,
        path: &str,
        url: String,
        signed: bool,
    ) -> ExchangeResult<Response> {
        if let Some(remaining_ms) = self.backoff.remaining_ms() {
            return Err(ExchangeError::Suspended { remaining_ms });
        }

        let mut request = self.http.request(method, url);
        if signed {
            request = request.header(API_KEY_HEADER, self.credentials.api_key.as_str());
        }
        let response = request.send().await?;

        if let Some(weight) = header_u64(&response, USED_WEIGHT_HEADER) {
            self.backoff.observe_used_weight(weight.min(u64::from(u32::MAX)) as u32);
        }

        let status = response.status().as_u16();
        if response.status().is_success() {
            debug!(path, status, "Exchange request ok");
            return Ok(response);
        }

        let retry_after_ms = header_u64(&response, "retry-after").map(|s| s * 1000);
        let body = response.text().await.unwrap_or_default();
        let api_error: Option<ApiErrorBody> = serde_json::from_str(&body).ok();

        if status == 429 || status == 418 {
            let ban_until = api_error.as_ref().and_then(|e| parse_ban_until(&e.msg));
            self.backoff.observe_status(status, retry_after_ms, ban_until);
            return Err(ExchangeError::RateLimited {
                status,
                retry_after_ms,
            });
        }

        warn!(path, status, body = %truncate(&body, 256), "Exchange request failed");
        Err(match api_error {
            Some(e) => ExchangeError::Api {
                status,
                code: Some(e.code),
                msg: e.msg,
            },
            None => ExchangeError::Api {
                status,
                code: None,
                msg: truncate(&body, 256).to_string(),
            },
        })
    }

    async fn fetch_symbol_info(&self, symbol: &str) -> ExchangeResult<SymbolInfo> {
        let response = self
            .send_public("/fapi/v1/exchangeInfo", vec![("symbol", symbol.to_string())])
            .await?;
        let payload: RawExchangeInfo = response.json().await?;
        let raw = payload
            .symbols
            .into_iter()
            .find(|s| s.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))?;
        parse_symbol_info(raw)
    }
}

impl ExchangeApi for RestExchangeClient {
    fn list_positions(&self) -> BoxFuture<'_, ExchangeResult<Vec<Position>>> {
        Box::pin(async move {
            let response = self
                .send_signed(Method::GET, "/fapi/v2/positionRisk", Vec::new())
                .await?;
            let rows: Vec<RawPosition> = response.json().await?;
            let mut positions = Vec::new();
            for row in rows {
                if let Some(p) = parse_position(row)? {
                    positions.push(p);
                }
            }
            Ok(positions)
        })
    }

    fn list_open_orders<'a>(
        &'a self,
        symbol: Option<&'a str>,
    ) -> BoxFuture<'a, ExchangeResult<Vec<OpenOrder>>> {
        Box::pin(async move {
            let params = symbol
                .map(|s| vec![("symbol", s.to_string())])
                .unwrap_or_default();
            let response = self
                .send_signed(Method::GET, "/fapi/v1/openOrders", params)
                .await?;
            let rows: Vec<RawOrder> = response.json().await?;
            rows.into_iter().filter_map(|r| parse_order(r).transpose()).collect()
        })
    }

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, ExchangeResult<PlacedOrder>> {
        Box::pin(async move {
            let params = order_params(&request);
            let response = self
                .send_signed(Method::POST, "/fapi/v1/order", params)
                .await?;
            let ack: RawOrderAck = response.json().await?;
            info!(
                symbol = %request.symbol,
                side = %request.side,
                kind = %request.kind,
                quantity = %request.quantity,
                client_order_id = %ack.client_order_id,
                order_id = ack.order_id,
                "Order placed"
            );
            Ok(PlacedOrder {
                symbol: ack.symbol,
                order_id: ack.order_id.to_string(),
                client_order_id: ClientOrderId::from_string(ack.client_order_id),
            })
        })
    }

    fn cancel_order<'a>(
        &'a self,
        symbol: &'a str,
        order_id: &'a str,
    ) -> BoxFuture<'a, ExchangeResult<()>> {
        Box::pin(async move {
            let params = vec![
                ("symbol", symbol.to_string()),
                ("orderId", order_id.to_string()),
            ];
            match self
                .send_signed(Method::DELETE, "/fapi/v1/order", params)
                .await
            {
                Ok(_) => {
                    info!(symbol, order_id, "Order cancelled");
                    Ok(())
                }
                // -2011: unknown order
                Err(ExchangeError::Api {
                    code: Some(-2011), ..
                }) => Err(ExchangeError::OrderNotFound {
                    symbol: symbol.to_string(),
                    order_id: order_id.to_string(),
                }),
                Err(e) => Err(e),
            }
        })
    }

    fn get_symbol_info<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<SymbolInfo>> {
        Box::pin(async move {
            if let Some(info) = self.symbol_cache.read().get(symbol) {
                return Ok(info.clone());
            }
            let info = self.fetch_symbol_info(symbol).await?;
            self.symbol_cache
                .write()
                .insert(symbol.to_string(), info.clone());
            Ok(info)
        })
    }

    fn get_mark_price<'a>(&'a self, symbol: &'a str) -> BoxFuture<'a, ExchangeResult<Price>> {
        Box::pin(async move {
            let response = self
                .send_public("/fapi/v1/premiumIndex", vec![("symbol", symbol.to_string())])
                .await?;
            let raw: RawPremiumIndex = response.json().await?;
            Ok(Price::new(parse_decimal("markPrice", &raw.mark_price)?))
        })
    }

    fn get_klines<'a>(
        &'a self,
        symbol: &'a str,
        interval: &'a str,
        limit: u32,
    ) -> BoxFuture<'a, ExchangeResult<Vec<Kline>>> {
        Box::pin(async move {
            let response = self
                .send_public(
                    "/fapi/v1/klines",
                    vec![
                        ("symbol", symbol.to_string()),
                        ("interval", interval.to_string()),
                        ("limit", limit.to_string()),
                    ],
                )
                .await?;
            let rows: Vec<Vec<serde_json::Value>> = response.json().await?;
            rows.iter().map(|r| parse_kline(r)).collect()
        })
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    symbol: String,
    position_amt: String,
    entry_price: String,
    mark_price: String,
    #[serde(rename = "unRealizedProfit")]
    unrealized_profit: String,
    #[serde(default)]
    update_time: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    symbol: String,
    order_id: u64,
    client_order_id: String,
    side: String,
    #[serde(rename = "type")]
    kind: String,
    price: String,
    #[serde(default)]
    stop_price: Option<String>,
    orig_qty: String,
    #[serde(default)]
    reduce_only: bool,
    #[serde(default)]
    time: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrderAck {
    symbol: String,
    order_id: u64,
    client_order_id: String,
}

#[derive(Debug, Deserialize)]
struct RawExchangeInfo {
    symbols: Vec<RawSymbol>,
}

#[derive(Debug, Deserialize)]
struct RawSymbol {
    symbol: String,
    filters: Vec<RawFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFilter {
    filter_type: String,
    tick_size: Option<String>,
    step_size: Option<String>,
    min_qty: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPremiumIndex {
    mark_price: String,
}

fn parse_decimal(field: &str, raw: &str) -> ExchangeResult<Decimal> {
    raw.parse::<Decimal>()
        .map_err(|e| ExchangeError::Decode(format!("{field}={raw}: {e}")))
}

fn parse_position(raw: RawPosition) -> ExchangeResult<Option<Position>> {
    let amount = parse_decimal("positionAmt", &raw.position_amt)?;
    if amount.is_zero() {
        return Ok(None);
    }
    let side = if amount.is_sign_positive() {
        PositionSide::Long
    } else {
        PositionSide::Short
    };
    Ok(Some(Position {
        symbol: raw.symbol,
        side,
        size: Size::new(amount.abs()),
        entry_price: Price::new(parse_decimal("entryPrice", &raw.entry_price)?),
        mark_price: Price::new(parse_decimal("markPrice", &raw.mark_price)?),
        unrealized_pnl: parse_decimal("unRealizedProfit", &raw.unrealized_profit)?,
        updated_at_ms: raw.update_time,
    }))
}

/// `None` for order types we do not model (trailing stops and the like).
fn parse_order(raw: RawOrder) -> ExchangeResult<Option<OpenOrder>> {
    let Some(kind) = OrderKind::from_exchange(&raw.kind) else {
        debug!(order_type = %raw.kind, order_id = raw.order_id, "Skipping unsupported order type");
        return Ok(None);
    };
    let side = match raw.side.as_str() {
        "BUY" => OrderSide::Buy,
        "SELL" => OrderSide::Sell,
        other => return Err(ExchangeError::Decode(format!("side={other}"))),
    };
    let price = Price::new(parse_decimal("price", &raw.price)?);
    let stop_price = raw
        .stop_price
        .as_deref()
        .map(|s| parse_decimal("stopPrice", s).map(Price::new))
        .transpose()?;
    Ok(Some(OpenOrder {
        symbol: raw.symbol,
        order_id: raw.order_id.to_string(),
        client_order_id: raw.client_order_id,
        side,
        kind,
        price: price.is_positive().then_some(price),
        stop_price: stop_price.filter(Price::is_positive),
        quantity: Size::new(parse_decimal("origQty", &raw.orig_qty)?),
        reduce_only: raw.reduce_only,
        created_at_ms: raw.time,
    }))
}

fn parse_symbol_info(raw: RawSymbol) -> ExchangeResult<SymbolInfo> {
    let mut tick_size = None;
    let mut step_size = None;
    let mut min_qty = None;
    for filter in raw.filters {
        match filter.filter_type.as_str() {
            "PRICE_FILTER" => {
                if let Some(v) = filter.tick_size.as_deref() {
                    tick_size = Some(Price::new(parse_decimal("tickSize", v)?));
                }
            }
            "LOT_SIZE" => {
                if let Some(v) = filter.step_size.as_deref() {
                    step_size = Some(Size::new(parse_decimal("stepSize", v)?));
                }
                if let Some(v) = filter.min_qty.as_deref() {
                    min_qty = Some(Size::new(parse_decimal("minQty", v)?));
                }
            }
            _ => {}
        }
    }
    let missing = |name: &str| ExchangeError::Decode(format!("{} missing {name}", raw.symbol));
    Ok(SymbolInfo {
        tick_size: tick_size.ok_or_else(|| missing("PRICE_FILTER.tickSize"))?,
        step_size: step_size.ok_or_else(|| missing("LOT_SIZE.stepSize"))?,
        min_qty: min_qty.unwrap_or(Size::ZERO),
        symbol: raw.symbol,
    })
}

/// `[openTime, open, high, low, close, ...]`
fn parse_kline(row: &[serde_json::Value]) -> ExchangeResult<Kline> {
    let text = |idx: usize, name: &str| -> ExchangeResult<Decimal> {
        let raw = row
            .get(idx)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ExchangeError::Decode(format!("kline field {name} missing")))?;
        parse_decimal(name, raw)
    };
    let open_time_ms = row
        .first()
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| ExchangeError::Decode("kline openTime missing".to_string()))?;
    Ok(Kline {
        open_time_ms,
        high: Price::new(text(2, "high")?),
        low: Price::new(text(3, "low")?),
        close: Price::new(text(4, "close")?),
    })
}

fn order_params(request: &OrderRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("symbol", request.symbol.clone()),
        ("side", request.side.as_exchange().to_string()),
        ("type", request.kind.as_exchange().to_string()),
        ("quantity", request.quantity.canonical()),
        ("newClientOrderId", request.client_order_id.to_string()),
    ];
    if let Some(price) = request.price {
        params.push(("price", price.canonical()));
    }
    if request.kind == OrderKind::Limit {
        params.push(("timeInForce", "GTC".to_string()));
    }
    if let Some(stop) = request.stop_price {
        params.push(("stopPrice", stop.canonical()));
        params.push(("workingType", "MARK_PRICE".to_string()));
    }
    if request.reduce_only {
        params.push(("reduceOnly", "true".to_string()));
    }
    params
}

fn build_query_string(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn build_url(base: &str, path: &str, query: &str) -> String {
    if query.is_empty() {
        format!("{base}{path}")
    } else {
        format!("{base}{path}?{query}")
    }
}

fn header_u64(response: &Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Extract the epoch-ms deadline from a 418 message such as
/// `"Way too many requests; IP banned until 1712345678901."`.
fn parse_ban_until(msg: &str) -> Option<u64> {
    let rest = &msg[msg.find("until")? + "until".len()..];
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
