//! Order orchestration on top of the broker adapters.
//!
//! [`OrderOrchestrator`] owns one adapter per broker and the session store.
//! It splits large orders into freeze-limit chunks, places seller-mode hedges
//! ahead of the main sell, closes positions, and fans out cancels. With paper
//! trading on, every call goes to the in-memory [`PaperBroker`].

pub mod specs;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

pub use self::specs::{InstrumentSpec, InstrumentSpecs, lot_chunks, quantity_chunks};
use crate::api::{BrokerAdapter, KotakAdapter, NorenAdapter, PaperBroker};
use crate::client::BrokerHttp;
use crate::error::{Result, SteadfastError};
use crate::session::SessionStore;
use crate::types::auth::Credentials;
use crate::types::funds::FundLimits;
use crate::types::instruments::StrikeData;
use crate::types::orders::*;
use crate::types::portfolio::Position;
use crate::types::*;

/// Tag carried by closing orders.
const CLOSE_TAG: &str = "Steadfast";

// ---------------------------------------------------------------------------
// Seller mode
// ---------------------------------------------------------------------------

/// What to do with the main sell when no hedge strike exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnhedgedPolicy {
    /// Place the sell without a hedge and log a warning.
    #[default]
    Skip,
    /// Refuse the sell with [`SteadfastError::HedgeUnavailable`].
    Block,
}

/// Seller-mode settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SellerMode {
    /// Strikes between the sold strike and its hedge.
    pub offset: usize,
    /// Lots bought on top of the sold lots.
    pub extra_lots: u32,
    pub unhedged: UnhedgedPolicy,
    /// Wait between the hedge and the main sell.
    #[serde(with = "millis")]
    pub hedge_pause: Duration,
}

impl Default for SellerMode {
    fn default() -> Self {
        Self {
            offset: 1,
            extra_lots: 0,
            unhedged: UnhedgedPolicy::Skip,
            hedge_pause: Duration::from_secs(1),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Index of the hedge strike `offset` strikes out of the money from
/// `sold_index` in an ascending strike list: higher for calls, lower for puts.
pub fn hedge_index(option_type: OptionType, sold_index: usize, offset: usize, len: usize) -> Option<usize> {
    let idx = match option_type {
        OptionType::Call => sold_index.checked_add(offset)?,
        OptionType::Put => sold_index.checked_sub(offset)?,
    };
    (idx < len).then_some(idx)
}

/// Orders placed by [`OrderOrchestrator::place_seller_order`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerOrderOutcome {
    pub hedge: Vec<OrderAck>,
    pub main: Vec<OrderAck>,
}

/// Result of [`OrderOrchestrator::close_positions`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseSummary {
    pub cancelled_orders: usize,
    pub closed: Vec<String>,
    /// `(trading symbol, error)` of positions that could not be closed.
    pub failed: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Routes canonical order calls to the right adapter and session.
pub struct OrderOrchestrator {
    adapters: HashMap<Broker, Arc<dyn BrokerAdapter>>,
    paper: Arc<PaperBroker>,
    sessions: Arc<SessionStore>,
    specs: InstrumentSpecs,
    paper_trading: AtomicBool,
}

impl std::fmt::Debug for OrderOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderOrchestrator")
            .field("brokers", &self.adapters.keys().collect::<Vec<_>>())
            .field("paper_trading", &self.paper_trading())
            .finish_non_exhaustive()
    }
}

impl OrderOrchestrator {
    /// Orchestrator with only the paper broker registered.
    pub fn new(sessions: Arc<SessionStore>, specs: InstrumentSpecs) -> Self {
        let paper = Arc::new(PaperBroker::new());
        let mut adapters: HashMap<Broker, Arc<dyn BrokerAdapter>> = HashMap::new();
        adapters.insert(Broker::Paper, paper.clone());
        Self {
            adapters,
            paper,
            sessions,
            specs,
            paper_trading: AtomicBool::new(false),
        }
    }

    /// Orchestrator wired to the live Flattrade, Shoonya and Kotak Neo APIs.
    pub fn live(http: BrokerHttp, sessions: Arc<SessionStore>, specs: InstrumentSpecs) -> Self {
        Self::new(sessions, specs)
            .with_adapter(Arc::new(NorenAdapter::flattrade(http.clone())))
            .with_adapter(Arc::new(NorenAdapter::shoonya(http.clone())))
            .with_adapter(Arc::new(KotakAdapter::new(http)))
    }

    /// Register (or replace) the adapter for its broker.
    pub fn with_adapter(mut self, adapter: Arc<dyn BrokerAdapter>) -> Self {
        self.adapters.insert(adapter.broker(), adapter);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn specs(&self) -> &InstrumentSpecs {
        &self.specs
    }

    pub fn paper(&self) -> &Arc<PaperBroker> {
        &self.paper
    }

    pub fn paper_trading(&self) -> bool {
        self.paper_trading.load(Ordering::Relaxed)
    }

    pub fn set_paper_trading(&self, enabled: bool) {
        self.paper_trading.store(enabled, Ordering::Relaxed);
        tracing::info!(enabled, "paper trading toggled");
    }

    /// Adapter and session a call for `broker` runs with.
    pub async fn route(&self, broker: Broker) -> Result<(Arc<dyn BrokerAdapter>, Credentials)> {
        if broker == Broker::Paper || self.paper_trading() {
            let paper: Arc<dyn BrokerAdapter> = self.paper.clone();
            return Ok((paper, Credentials::default()));
        }
        let adapter = self
            .adapters
            .get(&broker)
            .cloned()
            .ok_or_else(|| SteadfastError::InvalidArgument(format!("no adapter for {broker}")))?;
        let creds = self.sessions.require(broker).await?;
        Ok((adapter, creds))
    }

    /// Adapter for `broker`, ignoring the paper-trading switch.
    pub fn adapter(&self, broker: Broker) -> Result<Arc<dyn BrokerAdapter>> {
        self.adapters
            .get(&broker)
            .cloned()
            .ok_or_else(|| SteadfastError::InvalidArgument(format!("no adapter for {broker}")))
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    /// Place `lots` lots of `request`, one order per freeze-limit chunk.
    ///
    /// `request.quantity` is overwritten per chunk. Chunks go out one after
    /// another; the first failure stops the sequence.
    pub async fn place_order(
        &self,
        broker: Broker,
        request: &PlaceOrderRequest,
        lots: u32,
        spec: InstrumentSpec,
    ) -> Result<Vec<OrderAck>> {
        if lots == 0 {
            return Err(SteadfastError::InvalidArgument("lots must be positive".into()));
        }
        if spec.max_lots > 0 && lots > spec.max_lots {
            return Err(SteadfastError::InvalidArgument(format!(
                "{lots} lots exceeds the maximum of {}",
                spec.max_lots
            )));
        }
        let (adapter, creds) = self.route(broker).await?;
        let chunks = lot_chunks(lots, spec.freeze_limit);
        let mut acks = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let req = PlaceOrderRequest {
                quantity: u64::from(chunk) * u64::from(spec.lot_size),
                ..request.clone()
            };
            let ack = adapter.place_order(&creds, &req).await.inspect_err(|e| {
                tracing::error!(
                    %broker,
                    tsym = %req.trading_symbol,
                    placed = acks.len(),
                    error = %e,
                    "order chunk failed"
                );
            })?;
            tracing::info!(%broker, tsym = %req.trading_symbol, lots = chunk, qty = req.quantity, "order chunk placed");
            acks.push(ack);
        }
        Ok(acks)
    }

    /// Sell with a protective buy placed first.
    ///
    /// `strikes` are the strikes of the sold option type, ascending. The hedge
    /// is a market buy of `lots + extra_lots` at `offset` strikes further out
    /// of the money. Buys go straight to [`place_order`](Self::place_order).
    pub async fn place_seller_order(
        &self,
        broker: Broker,
        request: &PlaceOrderRequest,
        lots: u32,
        spec: InstrumentSpec,
        option_type: OptionType,
        strikes: &[StrikeData],
        seller: &SellerMode,
    ) -> Result<SellerOrderOutcome> {
        if request.transaction_type == TransactionType::Buy {
            let main = self.place_order(broker, request, lots, spec).await?;
            return Ok(SellerOrderOutcome {
                hedge: Vec::new(),
                main,
            });
        }

        let hedge_strike = strikes
            .iter()
            .position(|s| s.trading_symbol == request.trading_symbol)
            .and_then(|i| hedge_index(option_type, i, seller.offset, strikes.len()))
            .map(|i| &strikes[i]);

        let hedge = match hedge_strike {
            Some(strike) => {
                let hedge_req = PlaceOrderRequest {
                    trading_symbol: strike.trading_symbol.clone(),
                    security_id: Some(strike.security_id.clone()),
                    transaction_type: TransactionType::Buy,
                    order_type: OrderType::Market,
                    price: 0.0,
                    trigger_price: None,
                    ..request.clone()
                };
                let hedge_lots = lots.saturating_add(seller.extra_lots);
                tracing::info!(
                    %broker,
                    strike = strike.strike_price,
                    lots = hedge_lots,
                    "placing seller-mode hedge"
                );
                let hedge_spec = InstrumentSpec {
                    max_lots: 0,
                    ..spec
                };
                let acks = self.place_order(broker, &hedge_req, hedge_lots, hedge_spec).await?;
                tokio::time::sleep(seller.hedge_pause).await;
                acks
            }
            None => {
                let message = format!(
                    "no hedge strike {} strikes out of the money from {}",
                    seller.offset, request.trading_symbol
                );
                match seller.unhedged {
                    UnhedgedPolicy::Block => return Err(SteadfastError::HedgeUnavailable(message)),
                    UnhedgedPolicy::Skip => {
                        tracing::warn!(%broker, "{message}; selling without hedge");
                        Vec::new()
                    }
                }
            }
        };

        let main = self.place_order(broker, request, lots, spec).await?;
        Ok(SellerOrderOutcome { hedge, main })
    }

    // -----------------------------------------------------------------------
    // Closing
    // -----------------------------------------------------------------------

    /// Flatten one position with market orders of at most the freeze quantity.
    pub async fn close_position(&self, position: &Position) -> Result<Vec<OrderAck>> {
        if !position.is_open() {
            tracing::debug!(tsym = %position.trading_symbol, "position already flat");
            return Ok(Vec::new());
        }
        let max_per_order = match self.specs.for_trading_symbol(&position.trading_symbol) {
            Some((_, spec)) => spec.freeze_quantity(),
            None => {
                tracing::warn!(tsym = %position.trading_symbol, "no instrument spec, closing in one order");
                position.abs_quantity()
            }
        };

        let (adapter, creds) = self.route(position.broker).await?;
        let mut acks = Vec::new();
        for qty in quantity_chunks(position.abs_quantity(), max_per_order) {
            let req = PlaceOrderRequest {
                security_id: position.security_id.clone(),
                tag: Some(CLOSE_TAG.to_owned()),
                ..PlaceOrderRequest::market(
                    position.exchange,
                    position.trading_symbol.clone(),
                    position.closing_side(),
                    qty,
                    position.product,
                )
            };
            acks.push(adapter.place_order(&creds, &req).await?);
        }
        tracing::info!(
            broker = %position.broker,
            tsym = %position.trading_symbol,
            qty = position.abs_quantity(),
            orders = acks.len(),
            "position closed"
        );
        Ok(acks)
    }

    /// Cancel pending orders, then flatten every open position of `broker`.
    ///
    /// Seller mode closes shorts first (releasing hedge margin last);
    /// otherwise longs go first. A failed close does not stop the others.
    pub async fn close_positions(&self, broker: Broker, seller_mode: bool) -> Result<CloseSummary> {
        let cancelled_orders = self.cancel_pending_orders(broker).await?;
        let mut positions: Vec<Position> = self
            .positions(broker)
            .await?
            .into_iter()
            .filter(Position::is_open)
            .collect();
        if seller_mode {
            positions.sort_by_key(|p| p.net_quantity);
        } else {
            positions.sort_by_key(|p| std::cmp::Reverse(p.net_quantity));
        }

        let mut summary = CloseSummary {
            cancelled_orders,
            ..CloseSummary::default()
        };
        for position in &positions {
            match self.close_position(position).await {
                Ok(_) => summary.closed.push(position.trading_symbol.clone()),
                Err(e) => {
                    tracing::error!(tsym = %position.trading_symbol, error = %e, "failed to close position");
                    summary.failed.push((position.trading_symbol.clone(), e.to_string()));
                }
            }
        }
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Cancel / modify / reads
    // -----------------------------------------------------------------------

    /// Cancel every open, pending or trigger-pending order concurrently.
    ///
    /// Returns how many cancels the broker accepted.
    pub async fn cancel_pending_orders(&self, broker: Broker) -> Result<usize> {
        let (adapter, creds) = self.route(broker).await?;
        let book = adapter.orders_and_trades(&creds).await?;
        let cancels = book
            .order_book
            .iter()
            .filter(|o| o.status.is_cancellable())
            .map(|o| {
                let req = CancelOrderRequest {
                    order_id: o.order_id.clone(),
                    trading_symbol: Some(o.trading_symbol.clone()),
                };
                let (adapter, creds) = (&adapter, &creds);
                async move { (req.order_id.clone(), adapter.cancel_order(creds, &req).await) }
            });

        let mut accepted = 0;
        for (order_id, result) in join_all(cancels).await {
            match result {
                Ok(_) => accepted += 1,
                Err(e) => tracing::error!(%broker, %order_id, error = %e, "cancel failed"),
            }
        }
        Ok(accepted)
    }

    pub async fn cancel_order(&self, broker: Broker, req: &CancelOrderRequest) -> Result<OrderAck> {
        let (adapter, creds) = self.route(broker).await?;
        adapter.cancel_order(&creds, req).await
    }

    pub async fn modify_order(&self, broker: Broker, req: &ModifyOrderRequest) -> Result<OrderAck> {
        let (adapter, creds) = self.route(broker).await?;
        adapter.modify_order(&creds, req).await
    }

    /// Place a single order as given, without chunking.
    pub async fn place_single(&self, broker: Broker, req: &PlaceOrderRequest) -> Result<OrderAck> {
        let (adapter, creds) = self.route(broker).await?;
        adapter.place_order(&creds, req).await
    }

    pub async fn orders_and_trades(&self, broker: Broker) -> Result<OrderBook> {
        let (adapter, creds) = self.route(broker).await?;
        adapter.orders_and_trades(&creds).await
    }

    pub async fn positions(&self, broker: Broker) -> Result<Vec<Position>> {
        let (adapter, creds) = self.route(broker).await?;
        adapter.positions(&creds).await
    }

    pub async fn fund_limits(&self, broker: Broker) -> Result<FundLimits> {
        let (adapter, creds) = self.route(broker).await?;
        adapter.fund_limits(&creds).await
    }

    /// Position books of every broker with a session (or the paper book),
    /// one result per broker.
    pub async fn poll_positions(&self) -> Vec<(Broker, Result<Vec<Position>>)> {
        let brokers: Vec<Broker> = if self.paper_trading() {
            vec![Broker::Paper]
        } else {
            self.sessions
                .active_brokers()
                .await
                .into_iter()
                .map(|(b, _)| b)
                .collect()
        };
        let books = join_all(brokers.iter().map(|b| self.positions(*b))).await;
        brokers.into_iter().zip(books).collect()
    }

    /// Positions of every broker that answered.
    ///
    /// A broker whose position book cannot be read is left out and logged.
    pub async fn all_positions(&self) -> Vec<Position> {
        self.poll_positions()
            .await
            .into_iter()
            .flat_map(|(broker, book)| match book {
                Ok(positions) => positions,
                Err(e) => {
                    tracing::error!(%broker, error = %e, "failed to fetch positions");
                    Vec::new()
                }
            })
            .collect()
    }
}
