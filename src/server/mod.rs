//! HTTP proxy in front of the brokers.
//!
//! # Routes
//!
//! | Method | Path | Handler |
//! |---|---|---|
//! | GET | `/` | welcome text |
//! | POST | `/set-broker` | [`brokers::set_broker`] |
//! | GET, PUT | `/paper-trading` | paper-trading switch |
//! | POST | `/{broker}/placeOrder` | [`brokers::place_order`] |
//! | POST | `/{broker}/cancelOrder` | [`brokers::cancel_order`] |
//! | POST | `/{broker}/modifyOrder` | [`brokers::modify_order`] |
//! | GET | `/{broker}/getOrdersAndTrades` | [`brokers::orders_and_trades`] |
//! | GET | `/{broker}/getPositions` | [`brokers::positions`] |
//! | GET | `/{broker}/symbols` | [`brokers::symbols`] |
//! | GET, POST | `/{broker}/fundLimit` | [`brokers::fund_limit`] |
//! | POST | `/{broker}/setCredentials` | [`brokers::set_credentials`] |
//! | POST | `/{broker}/generateToken` | [`brokers::generate_token`] |
//! | GET | `/{broker}/websocketData` | [`brokers::websocket_data`] |
//! | POST | `/{broker}/closeAllPositions` | [`brokers::close_all_positions`] |
//! | POST | `/{broker}/cancelPendingOrders` | [`brokers::cancel_pending_orders`] |
//! | GET | `/risk` | [`risk::snapshot`] |
//! | PUT | `/risk/settings` | [`risk::update_settings`] |
//! | POST | `/risk/ticks` | [`risk::ticks`] |
//! | POST | `/risk/refresh` | [`risk::refresh`] |
//! | POST, DELETE | `/risk/stoploss[/{symbol}]` | set / remove stoploss |
//! | POST, DELETE | `/risk/target[/{symbol}]` | set / remove target |

pub mod brokers;
pub mod error;
pub mod risk;
pub mod state;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{delete, get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use self::error::ApiError;
pub use self::state::AppState;

const WELCOME: &str = "Welcome to the Steadfast API";

/// Build the full router.
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(|| async { WELCOME }))
        .route("/set-broker", post(brokers::set_broker))
        .route(
            "/paper-trading",
            get(brokers::paper_trading).put(brokers::set_paper_trading),
        )
        .route("/risk", get(risk::snapshot))
        .route("/risk/settings", axum::routing::put(risk::update_settings))
        .route("/risk/ticks", post(risk::ticks))
        .route("/risk/refresh", post(risk::refresh))
        .route("/risk/stoploss", post(risk::set_stoploss))
        .route("/risk/stoploss/{symbol}", delete(risk::remove_stoploss))
        .route("/risk/target", post(risk::set_target))
        .route("/risk/target/{symbol}", delete(risk::remove_target))
        .route("/{broker}/placeOrder", post(brokers::place_order))
        .route("/{broker}/cancelOrder", post(brokers::cancel_order))
        .route("/{broker}/modifyOrder", post(brokers::modify_order))
        .route("/{broker}/getOrdersAndTrades", get(brokers::orders_and_trades))
        .route("/{broker}/getPositions", get(brokers::positions))
        .route("/{broker}/symbols", get(brokers::symbols))
        .route(
            "/{broker}/fundLimit",
            get(brokers::fund_limit).post(brokers::fund_limit),
        )
        .route("/{broker}/setCredentials", post(brokers::set_credentials))
        .route("/{broker}/generateToken", post(brokers::generate_token))
        .route("/{broker}/websocketData", get(brokers::websocket_data))
        .route("/{broker}/closeAllPositions", post(brokers::close_all_positions))
        .route("/{broker}/cancelPendingOrders", post(brokers::cancel_pending_orders))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

/// CORS for the browser front-end; an empty list allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        if parsed.is_empty() {
            tracing::warn!("no valid CORS origin configured, allowing any");
            AllowOrigin::any()
        } else {
            AllowOrigin::list(parsed)
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static("content-type")])
}
