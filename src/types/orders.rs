#![allow(missing_docs)]
//! Order types: requests, acknowledgements, order book and trade book.

use serde::{Deserialize, Serialize};

use crate::constants::STOPLOSS_LIMIT_BUFFER;
use crate::types::enums::*;
use crate::types::round2;

// ---------------------------------------------------------------------------
// Place Order
// ---------------------------------------------------------------------------

/// Canonical order placement request.
///
/// Adapters rename these fields into each broker's dialect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub exchange: Exchange,
    pub trading_symbol: String,
    /// Instrument token; required by Kotak Neo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_id: Option<String>,
    pub transaction_type: TransactionType,
    pub quantity: u64,
    #[serde(default)]
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<f64>,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub product: ProductType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl PlaceOrderRequest {
    /// Market order for `quantity` units.
    pub fn market(
        exchange: Exchange,
        trading_symbol: impl Into<String>,
        transaction_type: TransactionType,
        quantity: u64,
        product: ProductType,
    ) -> Self {
        Self {
            exchange,
            trading_symbol: trading_symbol.into(),
            security_id: None,
            transaction_type,
            quantity,
            price: 0.0,
            trigger_price: None,
            order_type: OrderType::Market,
            product,
            tag: None,
        }
    }

    /// Limit price sent to a broker.
    ///
    /// A stoploss-limit order without a limit price of its own gets one two
    /// points through the trigger; everything else keeps `price`.
    pub fn effective_price(&self) -> f64 {
        limit_price(self.order_type, self.transaction_type, self.price, self.trigger_price)
    }

    /// Fill price on the paper book. Stoploss-limit orders always fill two
    /// points through the trigger.
    pub fn paper_fill_price(&self) -> f64 {
        through_trigger(self.order_type, self.transaction_type, self.trigger_price).unwrap_or(self.price)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.trading_symbol.trim().is_empty() {
            return Err(crate::SteadfastError::InvalidArgument(
                "trading symbol is required".into(),
            ));
        }
        if self.quantity == 0 {
            return Err(crate::SteadfastError::InvalidArgument(
                "quantity must be positive".into(),
            ));
        }
        if self.order_type.has_trigger() && self.trigger_price.is_none() {
            return Err(crate::SteadfastError::InvalidArgument(
                "stoploss orders need a trigger price".into(),
            ));
        }
        Ok(())
    }
}

fn through_trigger(order_type: OrderType, side: TransactionType, trigger: Option<f64>) -> Option<f64> {
    match (order_type, trigger) {
        (OrderType::StopLossLimit, Some(t)) if t.is_finite() => Some(match side {
            TransactionType::Buy => round2(t + STOPLOSS_LIMIT_BUFFER),
            TransactionType::Sell => round2(t - STOPLOSS_LIMIT_BUFFER),
        }),
        _ => None,
    }
}

/// Price a live order is sent with; only an SL-limit without one is buffered.
pub(crate) fn limit_price(order_type: OrderType, side: TransactionType, price: f64, trigger: Option<f64>) -> f64 {
    if price.is_finite() && price > 0.0 {
        return price;
    }
    through_trigger(order_type, side, trigger).unwrap_or(price)
}

// ---------------------------------------------------------------------------
// Cancel / Modify
// ---------------------------------------------------------------------------

/// Request to cancel an open order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    #[serde(alias = "norenordno")]
    pub order_id: String,
    /// Kotak Neo wants the symbol alongside the order number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trading_symbol: Option<String>,
}

/// Request to modify an open order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyOrderRequest {
    #[serde(default)]
    pub order_id: String,
    pub exchange: Exchange,
    pub trading_symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_id: Option<String>,
    pub transaction_type: TransactionType,
    pub quantity: u64,
    #[serde(default)]
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<f64>,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub product: ProductType,
}

impl ModifyOrderRequest {
    pub fn effective_price(&self) -> f64 {
        limit_price(self.order_type, self.transaction_type, self.price, self.trigger_price)
    }

    pub fn paper_fill_price(&self) -> f64 {
        through_trigger(self.order_type, self.transaction_type, self.trigger_price).unwrap_or(self.price)
    }
}

/// Broker acknowledgement for place / cancel / modify.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub broker: Broker,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Broker response, untouched.
    #[serde(default)]
    pub raw: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Order book / Trade book
// ---------------------------------------------------------------------------

/// A single entry in the order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub trading_symbol: String,
    pub transaction_type: TransactionType,
    pub quantity: u64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub trigger_price: Option<f64>,
    pub order_type: OrderType,
    pub status: OrderStatus,
    #[serde(default)]
    pub exchange: Option<Exchange>,
    #[serde(default)]
    pub product: Option<ProductType>,
    #[serde(default)]
    pub security_id: Option<String>,
    /// Time of day (`HH:MM:SS`) the order was entered.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

/// A single fill in the trade book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub order_id: String,
    pub trading_symbol: String,
    pub transaction_type: TransactionType,
    pub quantity: u64,
    pub fill_price: f64,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Order book and trade book fetched together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBook {
    pub order_book: Vec<Order>,
    pub trade_book: Vec<Trade>,
}

/// Keep only the time part of a broker timestamp.
///
/// Kotak puts the date first (`14-Mar-2024 09:15:01`), Noren puts it last
/// (`09:15:01 14-03-2024`).
pub(crate) fn time_of_day(stamp: &str) -> String {
    let stamp = stamp.trim();
    stamp
        .split_whitespace()
        .find(|part| part.contains(':'))
        .unwrap_or(stamp)
        .to_owned()
}
