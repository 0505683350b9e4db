//! Order orchestration against the paper broker.

use std::sync::Arc;
use std::time::Duration;

use steadfast::SteadfastError;
use steadfast::client::BrokerHttp;
use steadfast::orders::{InstrumentSpecs, OrderOrchestrator, SellerMode, UnhedgedPolicy};
use steadfast::session::SessionStore;
use steadfast::types::instruments::StrikeData;
use steadfast::types::orders::PlaceOrderRequest;
use steadfast::types::{Broker, Exchange, OptionType, OrderType, ProductType, TransactionType};

const BROKER: Broker = Broker::Paper;

fn orchestrator() -> OrderOrchestrator {
    OrderOrchestrator::new(Arc::new(SessionStore::new()), InstrumentSpecs::default())
}

fn market(tsym: &str, side: TransactionType) -> PlaceOrderRequest {
    PlaceOrderRequest::market(Exchange::NFO, tsym, side, 1, ProductType::Margin)
}

fn calls() -> Vec<StrikeData> {
    [21900.0, 22000.0, 22100.0, 22200.0]
        .into_iter()
        .enumerate()
        .map(|(i, strike)| StrikeData {
            trading_symbol: format!("NIFTY07MAR24C{strike}"),
            security_id: format!("4000{i}"),
            expiry_date: "07-MAR-2024".into(),
            strike_price: strike,
            lot_size: 75,
        })
        .collect()
}

fn seller(unhedged: UnhedgedPolicy) -> SellerMode {
    SellerMode {
        offset: 1,
        extra_lots: 1,
        unhedged,
        hedge_pause: Duration::ZERO,
    }
}

#[tokio::test]
async fn lots_are_split_at_the_freeze_limit() {
    let orch = orchestrator();
    let spec = orch.specs().get("NIFTY").unwrap();
    let acks = orch
        .place_order(BROKER, &market("NIFTY07MAR24C22000", TransactionType::Buy), 50, spec)
        .await
        .unwrap();

    assert_eq!(acks.len(), 3);
    let quantities: Vec<u64> = orch.paper().orders().iter().map(|o| o.quantity).collect();
    assert_eq!(quantities, vec![1800, 1800, 150]);
}

#[tokio::test]
async fn lots_above_the_maximum_are_rejected() {
    let orch = orchestrator();
    let spec = orch.specs().get("NIFTY").unwrap();
    let err = orch
        .place_order(BROKER, &market("NIFTY07MAR24C22000", TransactionType::Buy), 281, spec)
        .await
        .unwrap_err();

    assert!(matches!(err, SteadfastError::InvalidArgument(_)));
    assert!(orch.paper().orders().is_empty());
}

#[tokio::test]
async fn zero_lots_are_rejected() {
    let orch = orchestrator();
    let spec = orch.specs().get("NIFTY").unwrap();
    let err = orch
        .place_order(BROKER, &market("NIFTY07MAR24C22000", TransactionType::Buy), 0, spec)
        .await
        .unwrap_err();
    assert!(matches!(err, SteadfastError::InvalidArgument(_)));
}

#[tokio::test]
async fn hedge_is_bought_before_the_sell() {
    let orch = orchestrator();
    let spec = orch.specs().get("NIFTY").unwrap();
    let strikes = calls();
    let sell = PlaceOrderRequest {
        order_type: OrderType::Limit,
        price: 95.5,
        ..market("NIFTY07MAR24C22000", TransactionType::Sell)
    };

    let outcome = orch
        .place_seller_order(
            BROKER,
            &sell,
            2,
            spec,
            OptionType::Call,
            &strikes,
            &seller(UnhedgedPolicy::Skip),
        )
        .await
        .unwrap();

    assert_eq!(outcome.hedge.len(), 1);
    assert_eq!(outcome.main.len(), 1);

    let orders = orch.paper().orders();
    assert_eq!(orders.len(), 2);
    let hedge = &orders[0];
    assert_eq!(hedge.trading_symbol, "NIFTY07MAR24C22100");
    assert_eq!(hedge.transaction_type, TransactionType::Buy);
    assert_eq!(hedge.order_type, OrderType::Market);
    assert_eq!(hedge.quantity, 3 * 75);
    assert_eq!(hedge.security_id.as_deref(), Some("40002"));

    let main = &orders[1];
    assert_eq!(main.trading_symbol, "NIFTY07MAR24C22000");
    assert_eq!(main.transaction_type, TransactionType::Sell);
    assert_eq!(main.quantity, 2 * 75);
    assert_eq!(main.price, 95.5);
}

#[tokio::test]
async fn put_hedge_goes_down_the_ladder() {
    let orch = orchestrator();
    let spec = orch.specs().get("NIFTY").unwrap();
    let puts: Vec<StrikeData> = [21800.0, 21900.0, 22000.0]
        .into_iter()
        .map(|strike| StrikeData {
            trading_symbol: format!("NIFTY07MAR24P{strike}"),
            security_id: strike.to_string(),
            expiry_date: "07-MAR-2024".into(),
            strike_price: strike,
            lot_size: 75,
        })
        .collect();

    orch.place_seller_order(
        BROKER,
        &market("NIFTY07MAR24P22000", TransactionType::Sell),
        1,
        spec,
        OptionType::Put,
        &puts,
        &SellerMode {
            offset: 2,
            ..seller(UnhedgedPolicy::Block)
        },
    )
    .await
    .unwrap();

    let orders = orch.paper().orders();
    assert_eq!(orders[0].trading_symbol, "NIFTY07MAR24P21800");
    assert_eq!(orders[0].transaction_type, TransactionType::Buy);
}

#[tokio::test]
async fn missing_hedge_blocks_or_skips() {
    let strikes = calls();
    let sell = market("NIFTY07MAR24C22200", TransactionType::Sell);

    let orch = orchestrator();
    let spec = orch.specs().get("NIFTY").unwrap();
    let err = orch
        .place_seller_order(
            BROKER,
            &sell,
            1,
            spec,
            OptionType::Call,
            &strikes,
            &seller(UnhedgedPolicy::Block),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SteadfastError::HedgeUnavailable(_)));
    assert!(orch.paper().orders().is_empty());

    let outcome = orch
        .place_seller_order(
            BROKER,
            &sell,
            1,
            spec,
            OptionType::Call,
            &strikes,
            &seller(UnhedgedPolicy::Skip),
        )
        .await
        .unwrap();
    assert!(outcome.hedge.is_empty());
    assert_eq!(outcome.main.len(), 1);
}

#[tokio::test]
async fn seller_mode_buys_skip_the_hedge() {
    let orch = orchestrator();
    let spec = orch.specs().get("NIFTY").unwrap();
    let outcome = orch
        .place_seller_order(
            BROKER,
            &market("NIFTY07MAR24C22000", TransactionType::Buy),
            1,
            spec,
            OptionType::Call,
            &calls(),
            &seller(UnhedgedPolicy::Block),
        )
        .await
        .unwrap();
    assert!(outcome.hedge.is_empty());
    assert_eq!(orch.paper().orders().len(), 1);
}

#[tokio::test]
async fn close_all_orders_longs_first_and_chunks_by_freeze_quantity() {
    let orch = orchestrator();
    let nifty = orch.specs().get("NIFTY").unwrap();
    let banknifty = orch.specs().get("BANKNIFTY").unwrap();
    orch.place_order(BROKER, &market("BANKNIFTY24MAR47000PE", TransactionType::Sell), 2, banknifty)
        .await
        .unwrap();
    orch.place_order(BROKER, &market("NIFTY07MAR24C22000", TransactionType::Buy), 50, nifty)
        .await
        .unwrap();
    let placed = orch.paper().orders().len();

    let summary = orch.close_positions(BROKER, false).await.unwrap();
    assert_eq!(summary.cancelled_orders, 0);
    assert_eq!(summary.closed, vec!["NIFTY07MAR24C22000", "BANKNIFTY24MAR47000PE"]);
    assert!(summary.failed.is_empty());

    let closes: Vec<_> = orch.paper().orders().into_iter().skip(placed).collect();
    let shape: Vec<(&str, TransactionType, u64)> = closes
        .iter()
        .map(|o| (o.trading_symbol.as_str(), o.transaction_type, o.quantity))
        .collect();
    assert_eq!(
        shape,
        vec![
            ("NIFTY07MAR24C22000", TransactionType::Sell, 1800),
            ("NIFTY07MAR24C22000", TransactionType::Sell, 1800),
            ("NIFTY07MAR24C22000", TransactionType::Sell, 150),
            ("BANKNIFTY24MAR47000PE", TransactionType::Buy, 70),
        ]
    );
    assert!(closes.iter().all(|o| o.order_type == OrderType::Market));

    let open = orch.positions(BROKER).await.unwrap();
    assert!(open.iter().all(|p| !p.is_open()));
}

#[tokio::test]
async fn seller_mode_close_buys_back_shorts_first() {
    let orch = orchestrator();
    let spec = orch.specs().get("NIFTY").unwrap();
    orch.place_seller_order(
        BROKER,
        &market("NIFTY07MAR24C22000", TransactionType::Sell),
        1,
        spec,
        OptionType::Call,
        &calls(),
        &seller(UnhedgedPolicy::Block),
    )
    .await
    .unwrap();

    let summary = orch.close_positions(BROKER, true).await.unwrap();
    assert_eq!(summary.closed, vec!["NIFTY07MAR24C22000", "NIFTY07MAR24C22100"]);
}

#[tokio::test]
async fn paper_switch_reroutes_live_brokers() {
    let orch = OrderOrchestrator::live(
        BrokerHttp::new().unwrap(),
        Arc::new(SessionStore::new()),
        InstrumentSpecs::default(),
    );

    let err = orch.positions(Broker::Shoonya).await.unwrap_err();
    assert!(matches!(err, SteadfastError::MissingCredentials(Broker::Shoonya)));

    orch.set_paper_trading(true);
    orch.place_single(Broker::Shoonya, &market("NIFTY07MAR24C22000", TransactionType::Buy))
        .await
        .unwrap();
    assert_eq!(orch.paper().orders().len(), 1);
    let positions = orch.all_positions().await;
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].broker, Broker::Paper);
}
