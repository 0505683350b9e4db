//! HTTP routes against a paper-only state.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use steadfast::client::BrokerHttp;
use steadfast::instruments::SymbolResolver;
use steadfast::orders::{InstrumentSpecs, OrderOrchestrator};
use steadfast::server::{self, AppState};
use steadfast::session::SessionStore;
use tempfile::TempDir;
use tower::ServiceExt;

const TSYM: &str = "NIFTY07MAR24C22000";

fn app() -> (Router, AppState, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let sessions = Arc::new(SessionStore::new());
    let orchestrator = Arc::new(OrderOrchestrator::new(
        Arc::clone(&sessions),
        InstrumentSpecs::default(),
    ));
    let resolver = Arc::new(SymbolResolver::new(
        dir.path(),
        Duration::from_secs(60),
        BrokerHttp::new().unwrap(),
        Arc::clone(&sessions),
    ));
    let state = AppState::from_parts(sessions, orchestrator, resolver);
    (server::router(state.clone(), &[]), state, dir)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, value)
}

#[tokio::test]
async fn root_says_hello() {
    let (app, _state, _dir) = app();
    let (status, body) = call(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("Welcome to the Steadfast API".into()));
}

#[tokio::test]
async fn set_broker_reports_the_bridge_port() {
    let (app, state, _dir) = app();
    let (status, body) = call(&app, "POST", "/set-broker", Some(json!({ "broker": "shoonya" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["port"], 8766);
    assert_eq!(
        body["message"],
        "Selected broker set to shoonya, WebSocket running on port 8766"
    );
    assert_eq!(state.sessions.selected().await, Some(steadfast::types::Broker::Shoonya));

    for bad in ["virtual", "zerodha", ""] {
        let (status, body) = call(&app, "POST", "/set-broker", Some(json!({ "broker": bad }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{bad}");
        assert_eq!(body["message"], "Invalid broker selection");
    }
}

#[tokio::test]
async fn unknown_broker_segment_is_a_bad_request() {
    let (app, _state, _dir) = app();
    let (status, body) = call(&app, "GET", "/zerodha/getPositions", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("zerodha"));
}

#[tokio::test]
async fn reads_need_no_live_session() {
    let (app, _state, _dir) = app();
    let (status, _) = call(&app, "GET", "/virtual/getPositions", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, "GET", "/shoonya/websocketData", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["usersession"], "");
}

#[tokio::test]
async fn virtual_orders_chunk_and_feed_the_risk_loop() {
    let (app, state, _dir) = app();

    let (status, _) = call(&app, "PUT", "/paper-trading", Some(json!({ "enabled": true }))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, settings) = call(
        &app,
        "PUT",
        "/risk/settings",
        Some(json!({
            "stoplossEnabled": true,
            "stoplossDistance": 10.0,
            "targetEnabled": true,
            "targetDistance": 20.0
        })),
    )
    .await;
    assert_eq!(settings["stoplossEnabled"], true);

    let (status, placed) = call(
        &app,
        "POST",
        "/virtual/placeOrder",
        Some(json!({
            "exchange": "NFO",
            "tradingSymbol": TSYM,
            "transactionType": "BUY",
            "quantity": 75,
            "price": 100.0,
            "orderType": "LMT",
            "product": "Intraday",
            "lots": 25
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{placed}");
    assert_eq!(placed["orders"].as_array().unwrap().len(), 2);

    let (status, symbol) = call(&app, "POST", "/risk/stoploss", Some(json!({ "tradingSymbol": TSYM }))).await;
    assert_eq!(status, StatusCode::OK, "{symbol}");
    assert_eq!(symbol["stoploss"], json!({ "type": "static", "price": 90.0 }));

    let (_, symbol) = call(&app, "POST", "/risk/target", Some(json!({ "tradingSymbol": TSYM }))).await;
    assert_eq!(symbol["target"], 120.0);

    let (_, signals) = call(&app, "POST", "/risk/ticks", Some(json!({ (TSYM): 89.0 }))).await;
    let signals = signals.as_array().unwrap();
    assert_eq!(signals.len(), 1);

    // The close runs in the background; wait for the two closing chunks.
    for _ in 0..50 {
        if state.orchestrator.paper().orders().len() == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let orders = state.orchestrator.paper().orders();
    assert_eq!(orders.len(), 4);
    assert_eq!(orders[2].quantity + orders[3].quantity, 25 * 75);
}

#[tokio::test]
async fn removing_a_missing_threshold_is_harmless() {
    let (app, _state, _dir) = app();
    let (status, body) = call(&app, "DELETE", &format!("/risk/stoploss/{TSYM}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["target"], Value::Null);

    let (status, snapshot) = call(&app, "GET", "/risk", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(snapshot["symbols"].as_object().unwrap().is_empty());
}
