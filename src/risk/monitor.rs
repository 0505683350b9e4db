//! Async driver of the [`RiskEngine`].
//!
//! Ticks arrive through [`RiskMonitor::on_ticks`] and positions are polled on
//! an interval. Every update runs one evaluation under the engine lock, so
//! evaluations never overlap. Close orders are spawned, never awaited by the
//! evaluation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::{CloseSignal, RiskEngine, RiskSettings, RiskSnapshot, StoplossKind};
use crate::error::{Result, SteadfastError};
use crate::orders::OrderOrchestrator;
use crate::types::Broker;
use crate::types::portfolio::Position;

/// Shared risk state plus the feeds it evaluates against.
#[derive(Debug)]
pub struct RiskMonitor {
    engine: Arc<Mutex<RiskEngine>>,
    orchestrator: Arc<OrderOrchestrator>,
    ticks: RwLock<HashMap<String, f64>>,
    positions: RwLock<Vec<Position>>,
}

impl RiskMonitor {
    pub fn new(orchestrator: Arc<OrderOrchestrator>, settings: RiskSettings) -> Self {
        Self {
            engine: Arc::new(Mutex::new(RiskEngine::new(settings))),
            orchestrator,
            ticks: RwLock::new(HashMap::new()),
            positions: RwLock::new(Vec::new()),
        }
    }

    /// Run `f` against the engine under its lock.
    pub async fn with_engine<R>(&self, f: impl FnOnce(&mut RiskEngine) -> R) -> R {
        let mut engine = self.engine.lock().await;
        f(&mut engine)
    }

    pub async fn snapshot(&self) -> RiskSnapshot {
        self.engine.lock().await.snapshot()
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.positions.read().await.clone()
    }

    /// Open position for `trading_symbol` from the last poll.
    pub async fn position(&self, trading_symbol: &str) -> Result<Position> {
        self.positions
            .read()
            .await
            .iter()
            .find(|p| p.is_open() && p.trading_symbol == trading_symbol)
            .cloned()
            .ok_or_else(|| SteadfastError::NotFound(format!("no open position for {trading_symbol}")))
    }

    pub async fn tick(&self, trading_symbol: &str) -> Option<f64> {
        self.ticks.read().await.get(trading_symbol).copied()
    }

    /// Merge new prices and evaluate.
    pub async fn on_ticks(&self, ticks: HashMap<String, f64>) -> Vec<CloseSignal> {
        self.ticks.write().await.extend(ticks);
        self.evaluate().await
    }

    /// Refresh the position book from every broker and evaluate.
    pub async fn refresh_positions(&self) -> Vec<CloseSignal> {
        self.poll().await;
        self.evaluate().await
    }

    /// Pull fresh books. A broker that fails keeps its last known positions,
    /// so a bad poll never reads as "everything closed".
    async fn poll(&self) {
        let books = self.orchestrator.poll_positions().await;
        let mut positions = self.positions.write().await;
        *positions = merge_books(&positions, books);
    }

    /// One evaluation; triggered positions are closed in the background.
    pub async fn evaluate(&self) -> Vec<CloseSignal> {
        let mut engine = self.engine.lock().await;
        let signals = {
            let ticks = self.ticks.read().await;
            let positions = self.positions.read().await;
            engine.evaluate(&ticks, &positions)
        };
        drop(engine);
        for signal in &signals {
            self.dispatch(signal.clone());
        }
        signals
    }

    fn dispatch(&self, signal: CloseSignal) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let tsym = signal.position.trading_symbol.clone();
            tracing::info!(
                %tsym,
                reason = ?signal.reason,
                side = ?signal.side(),
                qty = signal.quantity(),
                level = signal.level,
                price = signal.price,
                "closing position"
            );
            if let Err(e) = orchestrator.close_position(&signal.position).await {
                tracing::error!(%tsym, error = %e, "risk close failed, symbol re-armed");
                engine.lock().await.close_failed(&tsym);
            }
        });
    }

    /// Arm the configured static stoploss and target on a fresh position.
    ///
    /// Waits `delay` for the fill to reach the position book first. Disabled
    /// thresholds are skipped.
    pub async fn arm_new_position(&self, trading_symbol: &str, delay: Duration) -> Result<()> {
        tokio::time::sleep(delay).await;
        self.poll().await;
        let position = self.position(trading_symbol).await?;
        let tick = self.tick(trading_symbol).await;

        let mut engine = self.engine.lock().await;
        let settings = engine.settings();
        if settings.stoploss_enabled {
            engine.set_stoploss(&position, StoplossKind::Static, tick)?;
        }
        if settings.target_enabled {
            engine.set_target(&position, tick)?;
        }
        Ok(())
    }

    /// Poll positions every `period` until the task is aborted.
    pub fn spawn(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                monitor.refresh_positions().await;
            }
        })
    }
}

fn merge_books(previous: &[Position], books: Vec<(Broker, Result<Vec<Position>>)>) -> Vec<Position> {
    let mut merged = Vec::new();
    for (broker, book) in books {
        match book {
            Ok(positions) => merged.extend(positions),
            Err(e) => {
                tracing::warn!(%broker, error = %e, "position poll failed, keeping last book");
                merged.extend(previous.iter().filter(|p| p.broker == broker).cloned());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::InstrumentSpecs;
    use crate::session::SessionStore;
    use crate::types::orders::PlaceOrderRequest;
    use crate::types::{Exchange, ProductType, TransactionType};
    use crate::types::auth::Credentials;
    use crate::types::funds::FundLimits;
    use crate::types::orders::{CancelOrderRequest, ModifyOrderRequest, OrderAck, OrderBook};
    use crate::api::BrokerAdapter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    const LONG_CALL: &str = "NIFTY24MAR22000CE";

    /// Flattrade stand-in whose position book can be switched off.
    #[derive(Debug)]
    struct FlakyBook {
        down: AtomicBool,
    }

    impl FlakyBook {
        fn position() -> Position {
            Position {
                broker: Broker::Flattrade,
                trading_symbol: LONG_CALL.into(),
                security_id: Some("43210".into()),
                net_quantity: 75,
                average_price: 100.0,
                last_traded_price: 100.0,
                product: ProductType::Intraday,
                exchange: Exchange::NFO,
                buy_average: 100.0,
                sell_average: 0.0,
                realized_pnl: 0.0,
            }
        }

        fn ack(&self) -> OrderAck {
            OrderAck {
                broker: Broker::Flattrade,
                order_id: Some("1".into()),
                raw: serde_json::Value::Null,
            }
        }
    }

    #[async_trait]
    impl BrokerAdapter for FlakyBook {
        fn broker(&self) -> Broker {
            Broker::Flattrade
        }

        async fn place_order(&self, _: &Credentials, _: &PlaceOrderRequest) -> Result<OrderAck> {
            Ok(self.ack())
        }

        async fn cancel_order(&self, _: &Credentials, _: &CancelOrderRequest) -> Result<OrderAck> {
            Ok(self.ack())
        }

        async fn modify_order(&self, _: &Credentials, _: &ModifyOrderRequest) -> Result<OrderAck> {
            Ok(self.ack())
        }

        async fn orders_and_trades(&self, _: &Credentials) -> Result<OrderBook> {
            Ok(OrderBook::default())
        }

        async fn positions(&self, _: &Credentials) -> Result<Vec<Position>> {
            if self.down.load(Ordering::SeqCst) {
                return Err(SteadfastError::HttpStatus {
                    status: reqwest::StatusCode::BAD_GATEWAY,
                    body: "bad gateway".into(),
                });
            }
            Ok(vec![Self::position()])
        }

        async fn fund_limits(&self, _: &Credentials) -> Result<FundLimits> {
            Ok(FundLimits::default())
        }
    }

    fn paper_monitor() -> Arc<RiskMonitor> {
        let orchestrator = OrderOrchestrator::new(Arc::new(SessionStore::new()), InstrumentSpecs::default());
        orchestrator.set_paper_trading(true);
        Arc::new(RiskMonitor::new(
            Arc::new(orchestrator),
            RiskSettings {
                stoploss_enabled: true,
                target_enabled: true,
                ..RiskSettings::default()
            },
        ))
    }

    #[tokio::test]
    async fn stoploss_closes_paper_position() {
        let monitor = paper_monitor();
        let buy = PlaceOrderRequest {
            price: 100.0,
            ..PlaceOrderRequest::market(
                Exchange::NFO,
                "NIFTY24MAR22000CE",
                TransactionType::Buy,
                75,
                ProductType::Intraday,
            )
        };
        monitor.orchestrator.place_single(Broker::Paper, &buy).await.unwrap();
        monitor.arm_new_position("NIFTY24MAR22000CE", Duration::ZERO).await.unwrap();

        let risk = monitor.snapshot().await.symbols["NIFTY24MAR22000CE"];
        assert_eq!(risk.stoploss, super::super::Stoploss::Static(90.0));
        assert_eq!(risk.target, Some(150.0));

        let signals = monitor
            .on_ticks(HashMap::from([("NIFTY24MAR22000CE".to_string(), 89.0)]))
            .await;
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side(), TransactionType::Sell);

        // Wait for the spawned close to fill.
        for _ in 0..50 {
            if monitor.orchestrator.paper().orders().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        monitor.refresh_positions().await;
        assert!(monitor.snapshot().await.symbols.is_empty());
    }

    #[tokio::test]
    async fn failed_poll_keeps_the_brokers_last_book() {
        let book = Arc::new(FlakyBook {
            down: AtomicBool::new(false),
        });
        let sessions = Arc::new(SessionStore::new());
        sessions.set(Broker::Flattrade, Credentials::new("tok", "FT1")).await;
        let orchestrator = OrderOrchestrator::new(sessions, InstrumentSpecs::default()).with_adapter(book.clone());
        let monitor = RiskMonitor::new(
            Arc::new(orchestrator),
            RiskSettings {
                stoploss_enabled: true,
                stoploss_distance: 10.0,
                ..RiskSettings::default()
            },
        );

        monitor.on_ticks(HashMap::from([(LONG_CALL.to_string(), 100.0)])).await;
        monitor.arm_new_position(LONG_CALL, Duration::ZERO).await.unwrap();
        assert_eq!(
            monitor.snapshot().await.symbols[LONG_CALL].stoploss,
            super::super::Stoploss::Static(90.0)
        );

        book.down.store(true, Ordering::SeqCst);
        let signals = monitor.refresh_positions().await;
        assert!(signals.is_empty());
        assert_eq!(monitor.positions().await.len(), 1);
        assert_eq!(
            monitor.snapshot().await.symbols[LONG_CALL].stoploss,
            super::super::Stoploss::Static(90.0)
        );

        book.down.store(false, Ordering::SeqCst);
        monitor.refresh_positions().await;
        let signals = monitor.on_ticks(HashMap::from([(LONG_CALL.to_string(), 50.0)])).await;
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side(), TransactionType::Sell);
    }
}
