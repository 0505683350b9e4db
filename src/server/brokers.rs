//! `/{broker}/...` proxy routes.
//!
//! The broker path segment is one of `flattrade`, `shoonya`, `kotakneo` or
//! `virtual` (case-insensitive). Credentials carried by a request, in headers
//! or the query string, are adopted into the session store before the call.

use std::collections::HashMap;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::error::ApiError;
use super::state::AppState;
use crate::constants::{POSITION_SETTLE_SECS, websocket_ports};
use crate::error::SteadfastError;
use crate::orders::{CloseSummary, SellerMode, SellerOrderOutcome};
use crate::session::SyncOutcome;
use crate::types::auth::Credentials;
use crate::types::funds::FundLimits;
use crate::types::instruments::SymbolsResponse;
use crate::types::orders::*;
use crate::types::portfolio::Position;
use crate::types::{Broker, Exchange, OptionType};

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_broker(raw: &str) -> Result<Broker, ApiError> {
    raw.parse().map_err(ApiError::context("Unknown broker"))
}

// ---------------------------------------------------------------------------
// Request credentials
// ---------------------------------------------------------------------------

/// Session fields a request carries in its headers, falling back to its
/// query string.
pub fn request_credentials(headers: &HeaderMap, query: &HashMap<String, String>) -> Credentials {
    let pick = |header_names: &[&str], query_names: &[&str]| {
        header_names
            .iter()
            .find_map(|h| headers.get(*h).and_then(|v| v.to_str().ok()))
            .map(str::to_owned)
            .or_else(|| query_names.iter().find_map(|q| query.get(*q).cloned()))
    };
    let token = pick(&["authorization", "auth"], &["accessToken", "usersession", "auth"]).unwrap_or_default();
    Credentials {
        session_token: token.trim_start_matches("Bearer ").trim().to_owned(),
        client_id: pick(&["userid"], &["userId", "userid"]),
        sid: pick(&["sid"], &["sid"]),
        base_url: pick(&["baseurl"], &["baseUrl", "baseurl"]),
        consumer_key: pick(&["consumerkey"], &["consumerKey", "consumerkey"]),
        server_id: pick(&["serverid"], &["serverId", "serverid"]),
    }
    .normalized()
}

async fn adopt_request_credentials(state: &AppState, broker: Broker, headers: &HeaderMap, query: &HashMap<String, String>) {
    let incoming = request_credentials(headers, query);
    if !incoming.has_session() {
        return;
    }
    match broker {
        Broker::Paper => {}
        Broker::KotakNeo => {
            if state.sessions.sync_kotak(incoming).await == SyncOutcome::Adopted {
                state.resolver.clear_cache().await;
            }
        }
        Broker::Flattrade | Broker::Shoonya => {
            let stored = state.sessions.get(broker).await.unwrap_or_default();
            if stored.session_token != incoming.session_token {
                let merged = Credentials {
                    client_id: incoming.client_id.clone().or(stored.client_id),
                    ..incoming
                };
                state.sessions.set(broker, merged).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Body of `placeOrder`.
///
/// Without `lots` the order is sent once with its own quantity. With `lots`
/// it is chunked by the instrument's freeze limit, and `sellerMode` adds a
/// hedge buy ahead of a sell.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderBody {
    #[serde(flatten)]
    pub order: PlaceOrderRequest,
    #[serde(default)]
    pub lots: Option<u32>,
    #[serde(default)]
    pub seller_mode: Option<SellerMode>,
    /// Arm the configured stoploss and target once the position shows up.
    #[serde(default)]
    pub apply_risk: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Placed {
    Single(OrderAck),
    Chunked { orders: Vec<OrderAck> },
    Seller(SellerOrderOutcome),
}

pub async fn place_order(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<PlaceOrderBody>,
) -> ApiResult<Placed> {
    let broker = parse_broker(&broker)?;
    adopt_request_credentials(&state, broker, &headers, &query).await;
    let placed = place(&state, broker, &body)
        .await
        .map_err(ApiError::context("Failed to place order"))?;

    if body.apply_risk {
        let risk = std::sync::Arc::clone(&state.risk);
        let tsym = body.order.trading_symbol.clone();
        tokio::spawn(async move {
            if let Err(e) = risk
                .arm_new_position(&tsym, Duration::from_secs(POSITION_SETTLE_SECS))
                .await
            {
                tracing::warn!(%tsym, error = %e, "could not arm stoploss / target");
            }
        });
    }
    Ok(Json(placed))
}

async fn place(state: &AppState, broker: Broker, body: &PlaceOrderBody) -> crate::Result<Placed> {
    let order = &body.order;
    let Some(lots) = body.lots else {
        return state.orchestrator.place_single(broker, order).await.map(Placed::Single);
    };
    let (underlying, spec) = state
        .orchestrator
        .specs()
        .for_trading_symbol(&order.trading_symbol)
        .map(|(name, spec)| (name.to_owned(), spec))
        .ok_or_else(|| {
            SteadfastError::InvalidArgument(format!("no instrument spec for {}", order.trading_symbol))
        })?;

    let Some(seller) = body.seller_mode else {
        let orders = state.orchestrator.place_order(broker, order, lots, spec).await?;
        return Ok(Placed::Chunked { orders });
    };

    let symbols = state.resolver.resolve(order.exchange, &underlying).await?;
    let in_list = |list: &[crate::types::instruments::StrikeData]| {
        list.iter().any(|s| s.trading_symbol == order.trading_symbol)
    };
    let (option_type, strikes) = if in_list(&symbols.call_strikes) {
        (OptionType::Call, &symbols.call_strikes)
    } else if in_list(&symbols.put_strikes) {
        (OptionType::Put, &symbols.put_strikes)
    } else {
        return Err(SteadfastError::NotFound(format!(
            "{} is not in the {underlying} strike list",
            order.trading_symbol
        )));
    };
    // Only one expiry's strikes form a ladder.
    let expiry = strikes
        .iter()
        .find(|s| s.trading_symbol == order.trading_symbol)
        .map(|s| s.expiry_date.clone())
        .unwrap_or_default();
    let ladder: Vec<_> = strikes.iter().filter(|s| s.expiry_date == expiry).cloned().collect();

    state
        .orchestrator
        .place_seller_order(broker, order, lots, spec, option_type, &ladder, &seller)
        .await
        .map(Placed::Seller)
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(req): Json<CancelOrderRequest>,
) -> ApiResult<OrderAck> {
    let broker = parse_broker(&broker)?;
    adopt_request_credentials(&state, broker, &headers, &query).await;
    let ack = state
        .orchestrator
        .cancel_order(broker, &req)
        .await
        .map_err(ApiError::context("Failed to cancel order"))?;
    Ok(Json(ack))
}

pub async fn modify_order(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(req): Json<ModifyOrderRequest>,
) -> ApiResult<OrderAck> {
    let broker = parse_broker(&broker)?;
    adopt_request_credentials(&state, broker, &headers, &query).await;
    let ack = state
        .orchestrator
        .modify_order(broker, &req)
        .await
        .map_err(ApiError::context("Failed to modify order"))?;
    Ok(Json(ack))
}

pub async fn orders_and_trades(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<OrderBook> {
    let broker = parse_broker(&broker)?;
    adopt_request_credentials(&state, broker, &headers, &query).await;
    let book = state
        .orchestrator
        .orders_and_trades(broker)
        .await
        .map_err(ApiError::context("Failed to get orders and trades"))?;
    Ok(Json(book))
}

pub async fn positions(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Vec<Position>> {
    let broker = parse_broker(&broker)?;
    adopt_request_credentials(&state, broker, &headers, &query).await;
    let positions = state
        .orchestrator
        .positions(broker)
        .await
        .map_err(ApiError::context("Failed to get positions"))?;
    Ok(Json(positions))
}

pub async fn fund_limit(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<FundLimits> {
    let broker = parse_broker(&broker)?;
    adopt_request_credentials(&state, broker, &headers, &query).await;
    let limits = state
        .orchestrator
        .fund_limits(broker)
        .await
        .map_err(ApiError::context("Failed to get fund limits"))?;
    Ok(Json(limits))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloseAllQuery {
    pub seller_mode: bool,
}

pub async fn close_all_positions(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    Query(params): Query<CloseAllQuery>,
) -> ApiResult<CloseSummary> {
    let broker = parse_broker(&broker)?;
    let summary = state
        .orchestrator
        .close_positions(broker, params.seller_mode)
        .await
        .map_err(ApiError::context("Failed to close positions"))?;
    Ok(Json(summary))
}

pub async fn cancel_pending_orders(State(state): State<AppState>, Path(broker): Path<String>) -> ApiResult<Value> {
    let broker = parse_broker(&broker)?;
    let cancelled = state
        .orchestrator
        .cancel_pending_orders(broker)
        .await
        .map_err(ApiError::context("Failed to cancel pending orders"))?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolsQuery {
    #[serde(default)]
    pub exchange_symbol: Option<String>,
    #[serde(default)]
    pub master_symbol: String,
}

pub async fn symbols(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    Query(params): Query<SymbolsQuery>,
) -> ApiResult<SymbolsResponse> {
    parse_broker(&broker)?;
    let exchange = match params.exchange_symbol.as_deref() {
        Some(raw) => raw.parse::<Exchange>().map_err(ApiError::context("Unknown exchange"))?,
        None => Exchange::for_underlying(&params.master_symbol),
    };
    let resolved = state
        .resolver
        .resolve(exchange, &params.master_symbol)
        .await
        .map_err(ApiError::context("Failed to resolve symbols"))?;
    Ok(Json(SymbolsResponse::clone(&resolved)))
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

pub async fn set_credentials(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    Json(creds): Json<Credentials>,
) -> ApiResult<Value> {
    let broker = parse_broker(&broker)?;
    if broker == Broker::Paper {
        return Err(ApiError::new(
            "Failed to set credentials",
            SteadfastError::InvalidArgument("the virtual broker has no session".into()),
        ));
    }
    state.sessions.set(broker, creds).await;
    if broker == Broker::KotakNeo {
        state.resolver.clear_cache().await;
    }
    Ok(Json(json!({ "message": format!("{broker} credentials updated successfully") })))
}

pub async fn generate_token(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    Json(request): Json<Value>,
) -> ApiResult<Credentials> {
    let broker = parse_broker(&broker)?;
    let adapter = state
        .orchestrator
        .adapter(broker)
        .map_err(ApiError::context("Failed to generate token"))?;
    let creds = adapter
        .generate_token(request)
        .await
        .map_err(ApiError::context("Failed to generate token"))?;
    state.sessions.set(broker, creds).await;
    let stored = state.sessions.get(broker).await.unwrap_or_default();
    Ok(Json(stored))
}

/// Stored session of `broker`, as read by the websocket bridge.
pub async fn websocket_data(State(state): State<AppState>, Path(broker): Path<String>) -> ApiResult<Credentials> {
    let broker = parse_broker(&broker)?;
    let creds = state.sessions.get(broker).await.unwrap_or_default();
    tracing::debug!(
        %broker,
        has_session = creds.has_session(),
        has_consumer_key = creds.consumer_key.is_some(),
        "serving websocket data"
    );
    Ok(Json(creds))
}

// ---------------------------------------------------------------------------
// Broker selection
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SetBrokerBody {
    #[serde(default)]
    pub broker: String,
}

/// Websocket bridge port of a live broker.
pub fn websocket_port(broker: Broker) -> Option<u16> {
    match broker {
        Broker::Flattrade => Some(websocket_ports::FLATTRADE),
        Broker::Shoonya => Some(websocket_ports::SHOONYA),
        Broker::KotakNeo => Some(websocket_ports::KOTAK_NEO),
        Broker::Paper => None,
    }
}

pub async fn set_broker(State(state): State<AppState>, Json(body): Json<SetBrokerBody>) -> ApiResult<Value> {
    let invalid = || ApiError::new(
        "Invalid broker selection",
        SteadfastError::InvalidArgument(format!("cannot select broker {:?}", body.broker)),
    );
    let broker: Broker = body.broker.parse().map_err(|_| invalid())?;
    let port = websocket_port(broker).ok_or_else(invalid)?;
    state.sessions.select(broker).await;
    tracing::info!(%broker, port, "broker selected");
    Ok(Json(json!({
        "message": format!("Selected broker set to {broker}, WebSocket running on port {port}"),
        "port": port,
    })))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PaperTrading {
    pub enabled: bool,
}

pub async fn paper_trading(State(state): State<AppState>) -> Json<PaperTrading> {
    Json(PaperTrading {
        enabled: state.orchestrator.paper_trading(),
    })
}

pub async fn set_paper_trading(State(state): State<AppState>, Json(body): Json<PaperTrading>) -> Json<PaperTrading> {
    state.orchestrator.set_paper_trading(body.enabled);
    Json(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn headers_take_precedence_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer tok-h"));
        headers.insert("consumerkey", HeaderValue::from_static("ck"));
        let query = HashMap::from([
            ("accessToken".to_string(), "tok-q".to_string()),
            ("serverId".to_string(), "srv".to_string()),
            ("sid".to_string(), "undefined".to_string()),
        ]);
        let creds = request_credentials(&headers, &query);
        assert_eq!(creds.session_token, "tok-h");
        assert_eq!(creds.consumer_key.as_deref(), Some("ck"));
        assert_eq!(creds.server_id.as_deref(), Some("srv"));
        assert_eq!(creds.sid, None);
    }

    #[test]
    fn paper_has_no_websocket() {
        assert_eq!(websocket_port(Broker::KotakNeo), Some(8767));
        assert_eq!(websocket_port(Broker::Paper), None);
    }

    #[test]
    fn place_body_flattens_order() {
        let body: PlaceOrderBody = serde_json::from_value(json!({
            "exchange": "NFO",
            "tradingSymbol": "NIFTY24MAR22000CE",
            "transactionType": "SELL",
            "quantity": 75,
            "lots": 2,
            "sellerMode": { "offset": 2 }
        }))
        .unwrap();
        assert_eq!(body.lots, Some(2));
        assert_eq!(body.seller_mode.map(|s| s.offset), Some(2));
        assert!(!body.apply_risk);
    }
}
