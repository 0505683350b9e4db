//! In-memory paper broker.
//!
//! Every order fills immediately at its effective price. Positions are
//! derived from the filled orders, so the risk loop and the orchestrator run
//! against paper trading exactly as against a live broker.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Local;
use serde_json::json;

use super::BrokerAdapter;
use crate::error::{Result, SteadfastError};
use crate::types::auth::Credentials;
use crate::types::funds::FundLimits;
use crate::types::orders::*;
use crate::types::portfolio::Position;
use crate::types::*;

/// Paper broker state. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct PaperBroker {
    next_id: AtomicU64,
    orders: Mutex<BTreeMap<u64, Order>>,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            orders: Mutex::new(BTreeMap::new()),
        }
    }
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Order>> {
        // Entries are replaced whole, so a poisoned map is still consistent.
        self.orders.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Orders placed so far, in placement order.
    pub fn orders(&self) -> Vec<Order> {
        self.book().values().cloned().collect()
    }

    fn parse_id(order_id: &str) -> Result<u64> {
        order_id
            .trim()
            .parse()
            .map_err(|_| SteadfastError::NotFound(format!("order {order_id}")))
    }

    fn ack(order_id: u64, result: &str) -> OrderAck {
        OrderAck {
            broker: Broker::Paper,
            order_id: Some(order_id.to_string()),
            raw: json!({ "status": "success", "norenordno": order_id, "result": result }),
        }
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    fn broker(&self) -> Broker {
        Broker::Paper
    }

    async fn place_order(&self, _creds: &Credentials, req: &PlaceOrderRequest) -> Result<OrderAck> {
        req.validate()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let order = Order {
            order_id: id.to_string(),
            trading_symbol: req.trading_symbol.clone(),
            transaction_type: req.transaction_type,
            quantity: req.quantity,
            price: req.paper_fill_price(),
            trigger_price: req.trigger_price,
            order_type: req.order_type,
            status: OrderStatus::Complete,
            exchange: Some(req.exchange),
            product: Some(req.product),
            security_id: req.security_id.clone(),
            timestamp: Some(Local::now().format("%H:%M:%S").to_string()),
            rejection_reason: None,
        };
        tracing::info!(
            order_id = id,
            tsym = %order.trading_symbol,
            side = ?order.transaction_type,
            qty = order.quantity,
            price = order.price,
            "paper order filled"
        );
        self.book().insert(id, order);
        Ok(Self::ack(id, "placed"))
    }

    async fn cancel_order(&self, _creds: &Credentials, req: &CancelOrderRequest) -> Result<OrderAck> {
        let id = Self::parse_id(&req.order_id)?;
        let mut book = self.book();
        let order = book
            .get_mut(&id)
            .ok_or_else(|| SteadfastError::NotFound(format!("order {id}")))?;
        if !order.status.is_cancellable() {
            return Err(SteadfastError::InvalidArgument(format!(
                "order {id} is {:?} and can no longer be cancelled",
                order.status
            )));
        }
        order.status = OrderStatus::Cancelled;
        tracing::info!(order_id = id, "paper order cancelled");
        Ok(Self::ack(id, "cancelled"))
    }

    async fn modify_order(&self, _creds: &Credentials, req: &ModifyOrderRequest) -> Result<OrderAck> {
        let id = Self::parse_id(&req.order_id)?;
        let mut book = self.book();
        let order = book
            .get_mut(&id)
            .ok_or_else(|| SteadfastError::NotFound(format!("order {id}")))?;
        if !order.status.is_cancellable() {
            return Err(SteadfastError::InvalidArgument(format!(
                "order {id} is {:?} and can no longer be modified",
                order.status
            )));
        }
        order.quantity = req.quantity;
        order.price = req.paper_fill_price();
        order.trigger_price = req.trigger_price;
        order.order_type = req.order_type;
        Ok(Self::ack(id, "modified"))
    }

    async fn orders_and_trades(&self, _creds: &Credentials) -> Result<OrderBook> {
        let order_book = self.orders();
        let trade_book = order_book
            .iter()
            .filter(|o| o.status == OrderStatus::Complete)
            .map(|o| Trade {
                order_id: o.order_id.clone(),
                trading_symbol: o.trading_symbol.clone(),
                transaction_type: o.transaction_type,
                quantity: o.quantity,
                fill_price: o.price,
                timestamp: o.timestamp.clone(),
            })
            .collect();
        Ok(OrderBook {
            order_book,
            trade_book,
        })
    }

    /// Net positions from the filled orders, one per symbol.
    async fn positions(&self, _creds: &Credentials) -> Result<Vec<Position>> {
        #[derive(Default)]
        struct Acc {
            exchange: Option<Exchange>,
            product: Option<ProductType>,
            security_id: Option<String>,
            buy_qty: u64,
            buy_amount: f64,
            sell_qty: u64,
            sell_amount: f64,
        }

        let mut by_symbol: BTreeMap<String, Acc> = BTreeMap::new();
        for order in self.orders().into_iter().filter(|o| o.status == OrderStatus::Complete) {
            let acc = by_symbol.entry(order.trading_symbol.clone()).or_default();
            acc.exchange = acc.exchange.or(order.exchange);
            acc.product = acc.product.or(order.product);
            if acc.security_id.is_none() {
                acc.security_id = order.security_id.clone();
            }
            let amount = order.price * order.quantity as f64;
            match order.transaction_type {
                TransactionType::Buy => {
                    acc.buy_qty += order.quantity;
                    acc.buy_amount += amount;
                }
                TransactionType::Sell => {
                    acc.sell_qty += order.quantity;
                    acc.sell_amount += amount;
                }
            }
        }

        Ok(by_symbol
            .into_iter()
            .map(|(trading_symbol, acc)| {
                let avg = |amount: f64, qty: u64| if qty > 0 { round2(amount / qty as f64) } else { 0.0 };
                let buy_average = avg(acc.buy_amount, acc.buy_qty);
                let sell_average = avg(acc.sell_amount, acc.sell_qty);
                let net_quantity = acc.buy_qty as i64 - acc.sell_qty as i64;
                let squared = acc.buy_qty.min(acc.sell_qty) as f64;
                Position {
                    broker: Broker::Paper,
                    trading_symbol,
                    security_id: acc.security_id,
                    net_quantity,
                    average_price: if net_quantity > 0 { buy_average } else { sell_average },
                    last_traded_price: 0.0,
                    product: acc.product.unwrap_or_default(),
                    exchange: acc.exchange.unwrap_or(Exchange::NFO),
                    buy_average,
                    sell_average,
                    realized_pnl: round2((sell_average - buy_average) * squared),
                }
            })
            .collect())
    }

    async fn fund_limits(&self, _creds: &Credentials) -> Result<FundLimits> {
        Ok(FundLimits::default())
    }
}
