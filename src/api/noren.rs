//! Noren REST adapter, shared by Flattrade and Shoonya.
//!
//! Every call is a POST whose body is `jData=<json>&jKey=<session token>`.
//! Failures come back as `{"stat":"Not_Ok","emsg":"..."}`; book endpoints
//! report an empty book the same way with a "no data" message.

use async_trait::async_trait;
use reqwest::RequestBuilder;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use super::{BrokerAdapter, order_from_record, order_id_from, price_str, records, trade_from_record};
use crate::client::{BrokerHttp, error_message};
use crate::constants::{FLATTRADE_AUTH_URL, FLATTRADE_BASE_URL, SHOONYA_BASE_URL};
use crate::error::{Result, SteadfastError};
use crate::types::auth::{Credentials, FlattradeTokenRequest, ShoonyaLoginRequest};
use crate::types::funds::FundLimits;
use crate::types::mapping::{FieldMap, OrderField, PositionField, RawRecord, TradeField, alias};
use crate::types::orders::*;
use crate::types::portfolio::Position;
use crate::types::*;

// ---------------------------------------------------------------------------
// Field tables
// ---------------------------------------------------------------------------

const ORDERS: FieldMap<OrderField> = FieldMap::new(&[
    alias("norenordno", OrderField::OrderId),
    alias("tsym", OrderField::TradingSymbol),
    alias("trantype", OrderField::TransactionType),
    alias("qty", OrderField::Quantity),
    alias("prc", OrderField::Price),
    alias("trgprc", OrderField::TriggerPrice),
    alias("prctyp", OrderField::OrderType),
    alias("status", OrderField::Status),
    alias("exch", OrderField::Exchange),
    alias("prd", OrderField::Product),
    alias("token", OrderField::SecurityId),
    alias("norentm", OrderField::Timestamp),
    alias("rejreason", OrderField::RejectionReason),
]);

const TRADES: FieldMap<TradeField> = FieldMap::new(&[
    alias("norenordno", TradeField::OrderId),
    alias("tsym", TradeField::TradingSymbol),
    alias("trantype", TradeField::TransactionType),
    alias("flqty", TradeField::Quantity),
    alias("qty", TradeField::Quantity),
    alias("flprc", TradeField::FillPrice),
    alias("avgprc", TradeField::FillPrice),
    alias("fltm", TradeField::Timestamp),
    alias("norentm", TradeField::Timestamp),
]);

const POSITIONS: FieldMap<PositionField> = FieldMap::new(&[
    alias("tsym", PositionField::TradingSymbol),
    alias("token", PositionField::SecurityId),
    alias("netqty", PositionField::NetQuantity),
    alias("netavgprc", PositionField::AveragePrice),
    alias("lp", PositionField::LastTradedPrice),
    alias("prd", PositionField::Product),
    alias("exch", PositionField::Exchange),
    alias("totbuyavgprc", PositionField::BuyAverage),
    alias("daybuyavgprc", PositionField::BuyAverage),
    alias("totsellavgprc", PositionField::SellAverage),
    alias("daysellavgprc", PositionField::SellAverage),
    alias("rpnl", PositionField::RealizedPnl),
]);

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Adapter for a Noren-based broker.
#[derive(Debug, Clone)]
pub struct NorenAdapter {
    broker: Broker,
    base_url: String,
    /// Token endpoint; only Flattrade has a separate one.
    auth_url: String,
    http: BrokerHttp,
}

impl NorenAdapter {
    pub fn flattrade(http: BrokerHttp) -> Self {
        Self::with_urls(Broker::Flattrade, http, FLATTRADE_BASE_URL, FLATTRADE_AUTH_URL)
    }

    pub fn shoonya(http: BrokerHttp) -> Self {
        Self::with_urls(Broker::Shoonya, http, SHOONYA_BASE_URL, SHOONYA_BASE_URL)
    }

    /// Point the adapter at custom hosts (e.g. a mock server).
    pub fn with_urls(
        broker: Broker,
        http: BrokerHttp,
        base_url: impl Into<String>,
        auth_url: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            auth_url: auth_url.into(),
            http,
        }
    }

    fn request(&self, endpoint: &str, jdata: &Value, jkey: Option<&str>) -> RequestBuilder {
        let mut body = format!("jData={jdata}");
        if let Some(key) = jkey {
            body.push_str("&jKey=");
            body.push_str(key);
        }
        self.http
            .http()
            .post(format!("{}/{}", self.base_url, endpoint))
            .header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
            .body(body)
    }

    /// Single-shot call for order actions.
    async fn action(&self, endpoint: &str, jdata: Value, creds: &Credentials) -> Result<Value> {
        let v = self
            .http
            .execute(self.broker, self.request(endpoint, &jdata, Some(&creds.session_token)))
            .await?;
        self.check_stat(v)
    }

    /// Retried call for reads. A "no data" rejection becomes an empty list.
    async fn read(&self, endpoint: &str, jdata: Value, creds: &Credentials) -> Result<Value> {
        let v = self
            .http
            .execute_with_retry(self.broker, endpoint, || {
                self.request(endpoint, &jdata, Some(&creds.session_token))
            })
            .await?;
        match self.check_stat(v) {
            Err(SteadfastError::Api { message, .. })
                if message.to_ascii_lowercase().contains("no data") =>
            {
                Ok(Value::Array(Vec::new()))
            }
            other => other,
        }
    }

    fn check_stat(&self, v: Value) -> Result<Value> {
        let failed = v
            .get("stat")
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("not_ok"));
        if !failed {
            return Ok(v);
        }
        let message = v
            .get("emsg")
            .and_then(Value::as_str)
            .unwrap_or("request rejected")
            .to_owned();
        let lower = message.to_ascii_lowercase();
        if lower.contains("session expired") || lower.contains("invalid session") {
            return Err(SteadfastError::Unauthorized(message));
        }
        Err(SteadfastError::Api {
            broker: self.broker,
            message,
        })
    }

    fn account(&self, creds: &Credentials) -> Result<String> {
        let id = creds.client_id().trim();
        if id.is_empty() {
            return Err(SteadfastError::MissingCredentials(self.broker));
        }
        Ok(id.to_owned())
    }

    fn position_from_record<R: RawRecord + ?Sized>(&self, rec: &R) -> Option<Position> {
        Some(Position {
            broker: self.broker,
            trading_symbol: POSITIONS.string(rec, PositionField::TradingSymbol)?,
            security_id: POSITIONS.string(rec, PositionField::SecurityId),
            net_quantity: POSITIONS.i64(rec, PositionField::NetQuantity).unwrap_or(0),
            average_price: POSITIONS.f64(rec, PositionField::AveragePrice).unwrap_or(0.0),
            last_traded_price: POSITIONS.f64(rec, PositionField::LastTradedPrice).unwrap_or(0.0),
            product: POSITIONS
                .string(rec, PositionField::Product)
                .map(|p| ProductType::from_broker_code(&p))
                .unwrap_or_default(),
            exchange: POSITIONS
                .string(rec, PositionField::Exchange)
                .and_then(|e| e.parse().ok())
                .unwrap_or(Exchange::NFO),
            buy_average: POSITIONS.f64(rec, PositionField::BuyAverage).unwrap_or(0.0),
            sell_average: POSITIONS.f64(rec, PositionField::SellAverage).unwrap_or(0.0),
            realized_pnl: POSITIONS.f64(rec, PositionField::RealizedPnl).unwrap_or(0.0),
        })
    }

    fn ack(&self, raw: Value) -> OrderAck {
        OrderAck {
            broker: self.broker,
            order_id: order_id_from(&raw, &["norenordno", "result"]),
            raw,
        }
    }

    // -----------------------------------------------------------------------
    // Login
    // -----------------------------------------------------------------------

    /// Flattrade: trade the OAuth request code for a session token.
    ///
    /// **Endpoint:** `POST https://authapi.flattrade.in/trade/apitoken`
    pub async fn flattrade_token(&self, req: &FlattradeTokenRequest) -> Result<Credentials> {
        let secret = sha256_hex(&format!("{}{}{}", req.api_key, req.request_code, req.api_secret));
        let body = json!({
            "api_key": req.api_key,
            "request_code": req.request_code,
            "api_secret": secret,
        });
        let resp = self
            .http
            .execute(self.broker, self.http.http().post(&self.auth_url).json(&body))
            .await?;

        let token = resp.get("token").and_then(Value::as_str).unwrap_or_default();
        let ok = resp
            .get("stat")
            .or_else(|| resp.get("status"))
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("ok"));
        if !ok || token.is_empty() {
            return Err(SteadfastError::Api {
                broker: self.broker,
                message: error_message(&resp)
                    .unwrap_or_else(|| "token generation failed".into()),
            });
        }
        let client = resp
            .get("client")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| req.client_id.clone())
            .unwrap_or_default();
        tracing::info!(broker = %self.broker, %client, "session token generated");
        Ok(Credentials::new(token, client))
    }

    /// Shoonya: QuickAuth with password, TOTP and app key hashes.
    ///
    /// **Endpoint:** `POST {base}/QuickAuth`
    pub async fn shoonya_login(&self, req: &ShoonyaLoginRequest) -> Result<Credentials> {
        let jdata = json!({
            "apkversion": "1.0.0",
            "uid": req.user_id,
            "pwd": sha256_hex(&req.password),
            "factor2": req.totp,
            "vc": req.vendor_code,
            "appkey": sha256_hex(&format!("{}|{}", req.user_id, req.api_key)),
            "imei": req.imei,
            "source": "API",
        });
        let resp = self
            .http
            .execute(self.broker, self.request("QuickAuth", &jdata, None))
            .await?;
        let resp = self.check_stat(resp)?;
        let token = resp
            .get("susertoken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SteadfastError::Api {
                broker: self.broker,
                message: "login reply carried no session token".into(),
            })?;
        let account = resp
            .get("actid")
            .and_then(Value::as_str)
            .unwrap_or(&req.user_id);
        tracing::info!(broker = %self.broker, %account, "session token generated");
        Ok(Credentials::new(token, account))
    }
}

pub(crate) fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[async_trait]
impl BrokerAdapter for NorenAdapter {
    fn broker(&self) -> Broker {
        self.broker
    }

    /// **Endpoint:** `POST {base}/PlaceOrder`
    async fn place_order(&self, creds: &Credentials, req: &PlaceOrderRequest) -> Result<OrderAck> {
        req.validate()?;
        let uid = self.account(creds)?;
        let mut jdata = Map::new();
        jdata.insert("uid".into(), json!(uid));
        jdata.insert("actid".into(), json!(uid));
        jdata.insert("exch".into(), json!(req.exchange.as_str()));
        jdata.insert("tsym".into(), json!(req.trading_symbol));
        jdata.insert("qty".into(), json!(req.quantity.to_string()));
        jdata.insert("prc".into(), json!(noren_price(req.order_type, req.effective_price())));
        jdata.insert("prd".into(), json!(req.product.noren_code()));
        jdata.insert("trantype".into(), json!(req.transaction_type.code()));
        jdata.insert("prctyp".into(), json!(req.order_type.noren_code()));
        jdata.insert("ret".into(), json!("DAY"));
        jdata.insert("ordersource".into(), json!("API"));
        if let Some(trigger) = req.trigger_price.filter(|_| req.order_type.has_trigger()) {
            jdata.insert("trgprc".into(), json!(price_str(trigger)));
        }
        if let Some(tag) = &req.tag {
            jdata.insert("remarks".into(), json!(tag));
        }

        let raw = self.action("PlaceOrder", Value::Object(jdata), creds).await?;
        let ack = self.ack(raw);
        tracing::info!(broker = %self.broker, order_id = ?ack.order_id, tsym = %req.trading_symbol, "order placed");
        Ok(ack)
    }

    /// **Endpoint:** `POST {base}/CancelOrder`
    async fn cancel_order(&self, creds: &Credentials, req: &CancelOrderRequest) -> Result<OrderAck> {
        let uid = self.account(creds)?;
        let jdata = json!({ "uid": uid, "norenordno": req.order_id });
        let raw = self.action("CancelOrder", jdata, creds).await?;
        Ok(OrderAck {
            broker: self.broker,
            order_id: Some(req.order_id.clone()),
            raw,
        })
    }

    /// **Endpoint:** `POST {base}/ModifyOrder`
    async fn modify_order(&self, creds: &Credentials, req: &ModifyOrderRequest) -> Result<OrderAck> {
        if req.order_id.trim().is_empty() {
            return Err(SteadfastError::InvalidArgument("order id is required".into()));
        }
        let uid = self.account(creds)?;
        let mut jdata = Map::new();
        jdata.insert("uid".into(), json!(uid));
        jdata.insert("actid".into(), json!(uid));
        jdata.insert("norenordno".into(), json!(req.order_id));
        jdata.insert("exch".into(), json!(req.exchange.as_str()));
        jdata.insert("tsym".into(), json!(req.trading_symbol));
        jdata.insert("qty".into(), json!(req.quantity.to_string()));
        jdata.insert("prc".into(), json!(noren_price(req.order_type, req.effective_price())));
        jdata.insert("prctyp".into(), json!(req.order_type.noren_code()));
        jdata.insert("ret".into(), json!("DAY"));
        if let Some(trigger) = req.trigger_price.filter(|_| req.order_type.has_trigger()) {
            jdata.insert("trgprc".into(), json!(price_str(trigger)));
        }

        let raw = self.action("ModifyOrder", Value::Object(jdata), creds).await?;
        Ok(OrderAck {
            broker: self.broker,
            order_id: Some(req.order_id.clone()),
            raw,
        })
    }

    /// **Endpoints:** `POST {base}/OrderBook`, `POST {base}/TradeBook`
    async fn orders_and_trades(&self, creds: &Credentials) -> Result<OrderBook> {
        let uid = self.account(creds)?;
        let (orders, trades) = tokio::try_join!(
            self.read("OrderBook", json!({ "uid": uid }), creds),
            self.read("TradeBook", json!({ "uid": uid, "actid": uid }), creds),
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

    /// **Endpoint:** `POST {base}/PositionBook`
    async fn positions(&self, creds: &Credentials) -> Result<Vec<Position>> {
        let uid = self.account(creds)?;
        let v = self
            .read("PositionBook", json!({ "uid": uid, "actid": uid }), creds)
            .await?;
        Ok(records(&v)
            .into_iter()
            .filter_map(|r| self.position_from_record(r))
            .collect())
    }

    /// **Endpoint:** `POST {base}/Limits`
    async fn fund_limits(&self, creds: &Credentials) -> Result<FundLimits> {
        let uid = self.account(creds)?;
        let v = self.read("Limits", json!({ "uid": uid, "actid": uid }), creds).await?;
        let num = |key: &str| {
            v.as_object()
                .and_then(|o| o.raw(key))
                .and_then(|s| s.trim().parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        Ok(FundLimits {
            cash: num("cash"),
            payin: num("payin"),
            margin_used: num("marginused"),
        })
    }

    async fn generate_token(&self, request: Value) -> Result<Credentials> {
        match self.broker {
            Broker::Flattrade => {
                let req: FlattradeTokenRequest = serde_json::from_value(request)?;
                self.flattrade_token(&req).await
            }
            _ => {
                let req: ShoonyaLoginRequest = serde_json::from_value(request)?;
                self.shoonya_login(&req).await
            }
        }
    }
}

fn noren_price(order_type: OrderType, price: f64) -> String {
    match order_type {
        OrderType::Market | OrderType::StopLossMarket => "0".to_owned(),
        _ => price_str(price),
    }
}
