//! Broker adapters.
//!
//! Each adapter implements [`BrokerAdapter`], translating canonical requests
//! into one broker's dialect and its responses back into canonical records.
//!
//! ## Modules
//!
//! | Module | Brokers | Description |
//! |---|---|---|
//! | [`noren`] | Flattrade, Shoonya | Noren REST (`jData` / `jKey` form bodies) |
//! | [`kotak`] | Kotak Neo | Neo v2 REST plus TOTP / MPIN login |
//! | [`paper`] | virtual | In-memory paper broker |
//!
//! Adapters never retry order actions. Reads (books, positions, limits) go
//! through [`BrokerHttp::execute_with_retry`](crate::client::BrokerHttp::execute_with_retry).

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{Result, SteadfastError};
use crate::types::auth::Credentials;
use crate::types::funds::FundLimits;
use crate::types::mapping::{FieldMap, OrderField, RawRecord, TradeField};
use crate::types::orders::*;
use crate::types::portfolio::Position;
use crate::types::*;

pub mod kotak;
pub mod noren;
pub mod paper;

pub use kotak::KotakAdapter;
pub use noren::NorenAdapter;
pub use paper::PaperBroker;

/// Uniform interface over every broker.
///
/// Each call takes a snapshot of the session it should use, so adapters hold
/// no credentials of their own.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    fn broker(&self) -> Broker;

    async fn place_order(&self, creds: &Credentials, req: &PlaceOrderRequest) -> Result<OrderAck>;

    async fn cancel_order(&self, creds: &Credentials, req: &CancelOrderRequest) -> Result<OrderAck>;

    async fn modify_order(&self, creds: &Credentials, req: &ModifyOrderRequest) -> Result<OrderAck>;

    async fn orders_and_trades(&self, creds: &Credentials) -> Result<OrderBook>;

    async fn positions(&self, creds: &Credentials) -> Result<Vec<Position>>;

    async fn fund_limits(&self, creds: &Credentials) -> Result<FundLimits>;

    /// Exchange broker-specific login parameters for a session.
    async fn generate_token(&self, request: Value) -> Result<Credentials> {
        let _ = request;
        Err(SteadfastError::InvalidArgument(format!(
            "{} does not support token generation",
            self.broker()
        )))
    }
}

// ---------------------------------------------------------------------------
// Record mapping shared by the live adapters
// ---------------------------------------------------------------------------

/// JSON objects in `v`, whether `v` is an array or an object holding one
/// under `data`.
pub(crate) fn records(v: &Value) -> Vec<&Map<String, Value>> {
    let list = match v {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => match obj.get("data") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };
    list.iter().filter_map(Value::as_object).collect()
}

/// Map an order-book record; `None` when id, symbol or side is missing.
pub(crate) fn order_from_record<R: RawRecord + ?Sized>(
    table: &FieldMap<OrderField>,
    rec: &R,
) -> Option<Order> {
    let transaction_type =
        TransactionType::from_broker_code(&table.string(rec, OrderField::TransactionType)?)?;
    Some(Order {
        order_id: table.string(rec, OrderField::OrderId)?,
        trading_symbol: table.string(rec, OrderField::TradingSymbol)?,
        transaction_type,
        quantity: table
            .i64(rec, OrderField::Quantity)
            .map_or(0, |q| q.unsigned_abs()),
        price: table.f64(rec, OrderField::Price).unwrap_or(0.0),
        trigger_price: table
            .f64(rec, OrderField::TriggerPrice)
            .filter(|p| *p > 0.0),
        order_type: table
            .string(rec, OrderField::OrderType)
            .map(|c| OrderType::from_broker_code(&c))
            .unwrap_or_default(),
        status: table
            .string(rec, OrderField::Status)
            .map_or(OrderStatus::Pending, |s| OrderStatus::from_broker_status(&s)),
        exchange: table
            .string(rec, OrderField::Exchange)
            .and_then(|e| e.parse().ok()),
        product: table
            .string(rec, OrderField::Product)
            .map(|p| ProductType::from_broker_code(&p)),
        security_id: table.string(rec, OrderField::SecurityId),
        timestamp: table
            .string(rec, OrderField::Timestamp)
            .map(|t| time_of_day(&t)),
        rejection_reason: table.string(rec, OrderField::RejectionReason),
    })
}

/// Map a trade-book record; `None` when id, symbol or side is missing.
pub(crate) fn trade_from_record<R: RawRecord + ?Sized>(
    table: &FieldMap<TradeField>,
    rec: &R,
) -> Option<Trade> {
    let transaction_type =
        TransactionType::from_broker_code(&table.string(rec, TradeField::TransactionType)?)?;
    Some(Trade {
        order_id: table.string(rec, TradeField::OrderId)?,
        trading_symbol: table.string(rec, TradeField::TradingSymbol)?,
        transaction_type,
        quantity: table
            .i64(rec, TradeField::Quantity)
            .map_or(0, |q| q.unsigned_abs()),
        fill_price: table.f64(rec, TradeField::FillPrice).unwrap_or(0.0),
        timestamp: table
            .string(rec, TradeField::Timestamp)
            .map(|t| time_of_day(&t)),
    })
}

/// Order id from a place-order reply, under any of `keys`.
pub(crate) fn order_id_from(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match v.get(k)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Format a price the way the brokers expect it in string fields.
pub(crate) fn price_str(p: f64) -> String {
    format!("{:.2}", round2(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::mapping::alias;
    use serde_json::json;

    const ORDERS: FieldMap<OrderField> = FieldMap::new(&[
        alias("id", OrderField::OrderId),
        alias("sym", OrderField::TradingSymbol),
        alias("side", OrderField::TransactionType),
        alias("qty", OrderField::Quantity),
        alias("st", OrderField::Status),
        alias("tm", OrderField::Timestamp),
    ]);

    #[test]
    fn records_accept_array_or_data_wrapper() {
        let wrapped = json!({ "stat": "Ok", "data": [{ "a": 1 }, 5, { "b": 2 }] });
        assert_eq!(records(&wrapped).len(), 2);
        assert_eq!(records(&json!([{ "a": 1 }])).len(), 1);
        assert!(records(&json!({ "stat": "Not_Ok" })).is_empty());
    }

    #[test]
    fn order_mapping_drops_incomplete_records() {
        let good = json!({ "id": 7, "sym": "NIFTY", "side": "B", "qty": "75", "st": "open", "tm": "14-Mar-2024 09:15:01" });
        let order = order_from_record(&ORDERS, good.as_object().unwrap()).unwrap();
        assert_eq!(order.order_id, "7");
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.timestamp.as_deref(), Some("09:15:01"));
        assert_eq!(order.order_type, OrderType::Market);

        let no_side = json!({ "id": 7, "sym": "NIFTY" });
        assert!(order_from_record(&ORDERS, no_side.as_object().unwrap()).is_none());
    }

    #[test]
    fn order_ids_and_prices() {
        assert_eq!(order_id_from(&json!({ "nOrdNo": 123 }), &["nOrdNo"]).as_deref(), Some("123"));
        assert_eq!(order_id_from(&json!({ "norenordno": "" }), &["norenordno"]), None);
        assert_eq!(price_str(98.0), "98.00");
    }
}
