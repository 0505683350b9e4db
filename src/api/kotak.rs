//! Kotak Neo v2 adapter.
//!
//! Requests carry the consumer key in `Authorization`, the session token in
//! `Auth` and the session id in `sid`. Order actions send a form body with a
//! single `jData` field. The trading host comes from the session; on `napi`
//! and `cnapi` hosts every path sits under `/Orders/2.0`.

use async_trait::async_trait;
use reqwest::RequestBuilder;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Map, Value, json};

use super::{BrokerAdapter, order_from_record, order_id_from, price_str, records, trade_from_record};
use crate::client::{BrokerHttp, error_message};
use crate::constants::{
    BROWSER_USER_AGENT, KOTAK_DEFAULT_BASE_URL, KOTAK_LOGIN_BASE_URL, KOTAK_NEO_FIN_KEY,
    KOTAK_USER_AGENT, KOTAK_V2_PATH_PREFIX,
};
use crate::error::{Result, SteadfastError};
use crate::types::auth::{Credentials, KotakLoginRequest};
use crate::types::funds::FundLimits;
use crate::types::mapping::{FieldMap, OrderField, PositionField, RawRecord, TradeField, alias};
use crate::types::orders::*;
use crate::types::portfolio::Position;
use crate::types::*;

// ---------------------------------------------------------------------------
// Field tables
// ---------------------------------------------------------------------------

const ORDERS: FieldMap<OrderField> = FieldMap::new(&[
    alias("nOrdNo", OrderField::OrderId),
    alias("trdSym", OrderField::TradingSymbol),
    alias("trnsTp", OrderField::TransactionType),
    alias("qty", OrderField::Quantity),
    alias("prc", OrderField::Price),
    alias("trgPrc", OrderField::TriggerPrice),
    alias("prcTp", OrderField::OrderType),
    alias("ordSt", OrderField::Status),
    alias("stat", OrderField::Status),
    alias("exSeg", OrderField::Exchange),
    alias("prod", OrderField::Product),
    alias("tok", OrderField::SecurityId),
    alias("ordDtTm", OrderField::Timestamp),
    alias("ordEntTm", OrderField::Timestamp),
    alias("rejRes", OrderField::RejectionReason),
]);

const TRADES: FieldMap<TradeField> = FieldMap::new(&[
    alias("nOrdNo", TradeField::OrderId),
    alias("trdSym", TradeField::TradingSymbol),
    alias("trnsTp", TradeField::TransactionType),
    alias("fldQty", TradeField::Quantity),
    alias("avgPrc", TradeField::FillPrice),
    alias("flTm", TradeField::Timestamp),
    alias("exTm", TradeField::Timestamp),
]);

const POSITIONS: FieldMap<PositionField> = FieldMap::new(&[
    alias("trdSym", PositionField::TradingSymbol),
    alias("tradingSymbol", PositionField::TradingSymbol),
    alias("symbol", PositionField::TradingSymbol),
    alias("tok", PositionField::SecurityId),
    alias("token", PositionField::SecurityId),
    alias("instrumentToken", PositionField::SecurityId),
    alias("netQty", PositionField::NetQuantity),
    alias("netQuantity", PositionField::NetQuantity),
    alias("NetQty", PositionField::NetQuantity),
    alias("qty", PositionField::NetQuantity),
    alias("ltp", PositionField::LastTradedPrice),
    alias("LTP", PositionField::LastTradedPrice),
    alias("lastPrice", PositionField::LastTradedPrice),
    alias("prod", PositionField::Product),
    alias("product", PositionField::Product),
    alias("prd", PositionField::Product),
    alias("exSeg", PositionField::Exchange),
    alias("exch", PositionField::Exchange),
    alias("flBuyQty", PositionField::DayBuyQuantity),
    alias("cfBuyQty", PositionField::CarryBuyQuantity),
    alias("flSellQty", PositionField::DaySellQuantity),
    alias("cfSellQty", PositionField::CarrySellQuantity),
    alias("buyAmt", PositionField::BuyAmount),
    alias("sellAmt", PositionField::SellAmount),
]);

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Adapter for Kotak Neo.
#[derive(Debug, Clone)]
pub struct KotakAdapter {
    http: BrokerHttp,
    login_url: String,
}

impl KotakAdapter {
    pub fn new(http: BrokerHttp) -> Self {
        Self::with_login_url(http, KOTAK_LOGIN_BASE_URL)
    }

    pub fn with_login_url(http: BrokerHttp, login_url: impl Into<String>) -> Self {
        Self {
            http,
            login_url: login_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Trading host of a session, reduced to scheme and authority.
    pub fn effective_base_url(creds: &Credentials) -> String {
        let raw = creds
            .base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(KOTAK_DEFAULT_BASE_URL);
        match url::Url::parse(raw) {
            Ok(u) if u.has_host() => u.origin().ascii_serialization(),
            _ => {
                tracing::warn!(base_url = %raw, "unparseable Kotak base URL, using as is");
                raw.trim_end_matches('/').to_owned()
            }
        }
    }

    /// `/Orders/2.0` on v2 hosts, nothing elsewhere.
    pub fn path_prefix(base_url: &str) -> &'static str {
        if base_url.contains("napi.kotaksecurities.com") {
            KOTAK_V2_PATH_PREFIX
        } else {
            ""
        }
    }

    fn endpoint(creds: &Credentials, path: &str) -> String {
        let base = Self::effective_base_url(creds);
        let prefix = Self::path_prefix(&base);
        match creds.server_id.as_deref() {
            Some(sid) => format!("{base}{prefix}{path}?sId={sid}"),
            None => format!("{base}{prefix}{path}"),
        }
    }

    /// Headers shared by every trading call.
    pub(crate) fn session_headers(creds: &Credentials) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(6);
        if let Some(key) = &creds.consumer_key {
            headers.insert("authorization", header_value(key)?);
        } else {
            tracing::warn!("Kotak Neo consumer key missing; request will likely be rejected");
        }
        headers.insert("neo-fin-key", HeaderValue::from_static(KOTAK_NEO_FIN_KEY));
        headers.insert("auth", header_value(&creds.session_token)?);
        if let Some(sid) = &creds.sid {
            headers.insert("sid", header_value(sid)?);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(KOTAK_USER_AGENT));
        Ok(headers)
    }

    /// Headers for the scrip master download.
    pub(crate) fn download_headers(creds: &Credentials) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(3);
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert("authorization", header_value(&creds.session_token)?);
        headers.insert("neo-fin-key", HeaderValue::from_static(KOTAK_NEO_FIN_KEY));
        Ok(headers)
    }

    fn form(&self, creds: &Credentials, path: &str, jdata: &Value) -> Result<RequestBuilder> {
        Ok(self
            .http
            .http()
            .post(Self::endpoint(creds, path))
            .headers(Self::session_headers(creds)?)
            .form(&[("jData", jdata.to_string())]))
    }

    /// Single-shot call for order actions.
    async fn action(&self, creds: &Credentials, path: &str, jdata: Value) -> Result<Value> {
        let req = self.form(creds, path, &jdata)?;
        let v = self.http.execute(Broker::KotakNeo, req).await?;
        check_stat(v)
    }

    /// Retried GET.
    async fn read(&self, creds: &Credentials, path: &str) -> Result<Value> {
        let url = Self::endpoint(creds, path);
        let headers = Self::session_headers(creds)?;
        let v = self
            .http
            .execute_with_retry(Broker::KotakNeo, path, || {
                self.http.http().get(&url).headers(headers.clone())
            })
            .await?;
        check_stat(v)
    }

    pub(crate) fn position_from_record<R: RawRecord + ?Sized>(rec: &R) -> Option<Position> {
        let qty = |f| POSITIONS.f64(rec, f).unwrap_or(0.0);
        let buy_qty = qty(PositionField::DayBuyQuantity) + qty(PositionField::CarryBuyQuantity);
        let sell_qty = qty(PositionField::DaySellQuantity) + qty(PositionField::CarrySellQuantity);
        let buy_amount = qty(PositionField::BuyAmount);
        let sell_amount = qty(PositionField::SellAmount);

        let net_quantity = POSITIONS
            .i64(rec, PositionField::NetQuantity)
            .unwrap_or((buy_qty - sell_qty) as i64);

        let buy_average = if buy_qty > 0.0 { round2(buy_amount / buy_qty) } else { 0.0 };
        let sell_average = if sell_qty > 0.0 { round2(sell_amount / sell_qty) } else { 0.0 };

        // Only the squared-off part of the position has realized P&L.
        let realized_pnl = if buy_qty > 0.0 && sell_qty > 0.0 {
            let squared = buy_qty.min(sell_qty);
            round2((sell_amount / sell_qty - buy_amount / buy_qty) * squared)
        } else {
            0.0
        };

        Some(Position {
            broker: Broker::KotakNeo,
            trading_symbol: POSITIONS.string(rec, PositionField::TradingSymbol)?,
            security_id: POSITIONS.string(rec, PositionField::SecurityId),
            net_quantity,
            average_price: if net_quantity > 0 { buy_average } else { sell_average },
            last_traded_price: POSITIONS.f64(rec, PositionField::LastTradedPrice).unwrap_or(0.0),
            product: POSITIONS
                .string(rec, PositionField::Product)
                .map(|p| ProductType::from_broker_code(&p))
                .unwrap_or_default(),
            exchange: POSITIONS
                .string(rec, PositionField::Exchange)
                .and_then(|e| e.parse().ok())
                .unwrap_or(Exchange::NFO),
            buy_average,
            sell_average,
            realized_pnl,
        })
    }

    // -----------------------------------------------------------------------
    // Login
    // -----------------------------------------------------------------------

    /// Two-step login: TOTP, then MPIN.
    ///
    /// **Endpoints:** `POST {login}/tradeApiLogin`, `POST {login}/tradeApiValidate`
    pub async fn login(&self, req: &KotakLoginRequest) -> Result<Credentials> {
        let mut headers = HeaderMap::with_capacity(4);
        headers.insert("authorization", header_value(&req.consumer_key)?);
        headers.insert("neo-fin-key", HeaderValue::from_static(KOTAK_NEO_FIN_KEY));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(KOTAK_USER_AGENT));

        let login_body = json!({
            "mobileNumber": req.international_mobile(),
            "ucc": req.user_id,
            "totp": req.totp,
        });
        tracing::debug!(ucc = %req.user_id, "Kotak Neo tradeApiLogin");
        let resp = self
            .http
            .execute(
                Broker::KotakNeo,
                self.http
                    .http()
                    .post(format!("{}/tradeApiLogin", self.login_url))
                    .headers(headers.clone())
                    .json(&login_body),
            )
            .await?;
        let view = login_step_data(&resp, "login step failed")?;
        let view_token = str_field(view, "token")?;
        let view_sid = str_field(view, "sid")?;

        headers.insert("auth", header_value(&view_token)?);
        headers.insert("sid", header_value(&view_sid)?);
        tracing::debug!("Kotak Neo tradeApiValidate");
        let resp = self
            .http
            .execute(
                Broker::KotakNeo,
                self.http
                    .http()
                    .post(format!("{}/tradeApiValidate", self.login_url))
                    .headers(headers)
                    .json(&json!({ "mpin": req.mpin })),
            )
            .await?;
        let data = login_step_data(&resp, "validation step failed")?;

        let creds = Credentials {
            session_token: str_field(data, "token")?,
            client_id: Some(req.user_id.clone()),
            sid: Some(str_field(data, "sid")?),
            base_url: data
                .get("baseUrl")
                .and_then(Value::as_str)
                .map(str::to_owned),
            consumer_key: Some(req.consumer_key.clone()),
            server_id: data.raw("hsServerId").map(|s| s.into_owned()),
        }
        .normalized();
        tracing::info!(base_url = ?creds.base_url, token = %creds.masked_token(), "Kotak Neo session created");
        Ok(creds)
    }
}

fn header_value(v: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(v.trim())
        .map_err(|_| SteadfastError::InvalidArgument("credential contains invalid header characters".into()))
}

fn check_stat(v: Value) -> Result<Value> {
    let failed = v
        .get("stat")
        .and_then(Value::as_str)
        .is_some_and(|s| s.eq_ignore_ascii_case("not_ok"));
    if failed {
        return Err(SteadfastError::Api {
            broker: Broker::KotakNeo,
            message: error_message(&v).unwrap_or_else(|| "request rejected".into()),
        });
    }
    Ok(v)
}

/// `data` object of a login reply whose `data.status` is `success`.
fn login_step_data<'a>(resp: &'a Value, fallback: &str) -> Result<&'a Map<String, Value>> {
    resp.get("data")
        .and_then(Value::as_object)
        .filter(|d| d.get("status").and_then(Value::as_str) == Some("success"))
        .ok_or_else(|| SteadfastError::Api {
            broker: Broker::KotakNeo,
            message: error_message(resp).unwrap_or_else(|| fallback.to_owned()),
        })
}

fn str_field(data: &Map<String, Value>, key: &str) -> Result<String> {
    data.raw(key)
        .filter(|v| !v.is_empty())
        .map(|v| v.into_owned())
        .ok_or_else(|| SteadfastError::Api {
            broker: Broker::KotakNeo,
            message: format!("login reply is missing `{key}`"),
        })
}

fn kotak_price(order_type: OrderType, price: f64) -> String {
    match order_type {
        OrderType::Market | OrderType::StopLossMarket => "0".to_owned(),
        _ => price_str(price),
    }
}

fn trigger_str(order_type: OrderType, trigger: Option<f64>) -> String {
    match trigger {
        Some(t) if order_type.has_trigger() => price_str(t),
        _ => "0".to_owned(),
    }
}

#[async_trait]
impl BrokerAdapter for KotakAdapter {
    fn broker(&self) -> Broker {
        Broker::KotakNeo
    }

    /// **Endpoint:** `POST {base}/quick/order/rule/ms/place`
    async fn place_order(&self, creds: &Credentials, req: &PlaceOrderRequest) -> Result<OrderAck> {
        req.validate()?;
        let mut jdata = Map::new();
        jdata.insert("am".into(), json!("NO"));
        jdata.insert("dq".into(), json!("0"));
        jdata.insert("es".into(), json!(req.exchange.kotak_segment().as_str()));
        jdata.insert("mp".into(), json!("0"));
        jdata.insert("pc".into(), json!(req.product.kotak_code()));
        jdata.insert("pf".into(), json!("N"));
        jdata.insert("pr".into(), json!(kotak_price(req.order_type, req.effective_price())));
        jdata.insert("pt".into(), json!(req.order_type.kotak_code()));
        jdata.insert("qt".into(), json!(req.quantity.to_string()));
        jdata.insert("rt".into(), json!("DAY"));
        jdata.insert("tk".into(), json!(req.security_id.clone().unwrap_or_default()));
        jdata.insert("tp".into(), json!(trigger_str(req.order_type, req.trigger_price)));
        jdata.insert("ts".into(), json!(req.trading_symbol));
        jdata.insert("tt".into(), json!(req.transaction_type.code()));
        if let Some(tag) = &req.tag {
            jdata.insert("tag".into(), json!(tag));
        }

        let raw = self
            .action(creds, "/quick/order/rule/ms/place", Value::Object(jdata))
            .await?;
        let order_id = order_id_from(&raw, &["nOrdNo"]);
        tracing::info!(order_id = ?order_id, tsym = %req.trading_symbol, "Kotak Neo order placed");
        Ok(OrderAck {
            broker: Broker::KotakNeo,
            order_id,
            raw,
        })
    }

    /// **Endpoint:** `POST {base}/quick/order/cancel`
    async fn cancel_order(&self, creds: &Credentials, req: &CancelOrderRequest) -> Result<OrderAck> {
        let mut jdata = json!({ "on": req.order_id, "am": "NO" });
        if let Some(ts) = &req.trading_symbol {
            jdata["ts"] = json!(ts);
        }
        let raw = self.action(creds, "/quick/order/cancel", jdata).await?;
        Ok(OrderAck {
            broker: Broker::KotakNeo,
            order_id: Some(req.order_id.clone()),
            raw,
        })
    }

    /// **Endpoint:** `POST {base}/quick/order/vr/modify`
    async fn modify_order(&self, creds: &Credentials, req: &ModifyOrderRequest) -> Result<OrderAck> {
        if req.order_id.trim().is_empty() {
            return Err(SteadfastError::InvalidArgument(
                "missing order number for modify".into(),
            ));
        }
        let jdata = json!({
            "no": req.order_id,
            "tk": req.security_id.clone().unwrap_or_default(),
            "vd": "DAY",
            "ts": req.trading_symbol,
            "tt": req.transaction_type.code(),
            "qt": req.quantity.to_string(),
            "pr": kotak_price(req.order_type, req.effective_price()),
            "tp": trigger_str(req.order_type, req.trigger_price),
            "pt": req.order_type.kotak_code(),
            "es": req.exchange.kotak_segment().as_str(),
            "pc": req.product.kotak_code(),
            "mp": "0",
            "dq": "0",
            "dd": "NA",
            "am": "NO",
        });
        let raw = self.action(creds, "/quick/order/vr/modify", jdata).await?;
        Ok(OrderAck {
            broker: Broker::KotakNeo,
            order_id: Some(req.order_id.clone()),
            raw,
        })
    }

    /// **Endpoints:** `GET {base}/quick/user/orders`, `GET {base}/quick/user/trades`
    async fn orders_and_trades(&self, creds: &Credentials) -> Result<OrderBook> {
        let (orders, trades) = tokio::try_join!(
            self.read(creds, "/quick/user/orders"),
            self.read(creds, "/quick/user/trades"),
        )?;
        Ok(OrderBook {
            order_book: records(&orders)
                .into_iter()
                .filter_map(|r| order_from_record(&ORDERS, r))
                .collect(),
            trade_book: records(&trades)
                .into_iter()
                .filter_map(|r| trade_from_record(&TRADES, r))
                .collect(),
        })
    }

    /// **Endpoint:** `GET {base}/quick/user/positions`
    async fn positions(&self, creds: &Credentials) -> Result<Vec<Position>> {
        let v = self.read(creds, "/quick/user/positions").await?;
        Ok(records(&v)
            .into_iter()
            .filter_map(|r| Self::position_from_record(r))
            .collect())
    }

    /// **Endpoint:** `POST {base}/quick/user/limits`
    ///
    /// Reads are retried here even though the call is a POST; it has no side
    /// effects.
    async fn fund_limits(&self, creds: &Credentials) -> Result<FundLimits> {
        let jdata = json!({ "seg": "ALL", "exch": "ALL", "prod": "ALL" });
        let path = "/quick/user/limits";
        let (this, jdata) = (self, &jdata);
        let v = self
            .http
            .retry_policy()
            .run(path, move || async move {
                let req = this.form(creds, path, jdata)?;
                this.http.execute(Broker::KotakNeo, req).await
            })
            .await?;
        let v = check_stat(v)?;
        let obj = v.as_object().cloned().unwrap_or_default();
        let num = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| obj.raw(k).and_then(|s| s.trim().parse::<f64>().ok()))
                .unwrap_or(0.0)
        };
        Ok(FundLimits {
            cash: num(&["Net", "net", "CashBal", "cash"]),
            payin: num(&["PayIn", "PayinAmt", "payin"]),
            margin_used: num(&["MarginUsed", "marginUsed", "marginused"]),
        })
    }

    async fn generate_token(&self, request: Value) -> Result<Credentials> {
        let req: KotakLoginRequest = serde_json::from_value(request)?;
        self.login(&req).await
    }
}
