//! `/risk` routes: thresholds, settings and the tick feed.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;

use super::error::ApiError;
use super::state::AppState;
use crate::error::Result;
use crate::risk::{CloseSignal, Nudge, RiskSettings, RiskSnapshot, StoplossKind, SymbolRisk};
use crate::types::portfolio::Position;

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub async fn snapshot(State(state): State<AppState>) -> Json<RiskSnapshot> {
    Json(state.risk.snapshot().await)
}

pub async fn update_settings(
    State(state): State<AppState>,
    Json(settings): Json<RiskSettings>,
) -> Json<RiskSettings> {
    let applied = state
        .risk
        .with_engine(|engine| {
            engine.update_settings(settings);
            engine.settings()
        })
        .await;
    Json(applied)
}

/// Latest prices keyed by trading symbol; returns the positions being closed.
pub async fn ticks(State(state): State<AppState>, Json(ticks): Json<HashMap<String, f64>>) -> Json<Vec<CloseSignal>> {
    Json(state.risk.on_ticks(ticks).await)
}

/// Poll positions now instead of waiting for the next interval.
pub async fn refresh(State(state): State<AppState>) -> Json<Vec<CloseSignal>> {
    Json(state.risk.refresh_positions().await)
}

/// Body of `POST /risk/stoploss` and `POST /risk/target`.
///
/// `price` sets a level directly and `nudge` moves the current one; with
/// neither, the level is computed from the live price.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdBody {
    pub trading_symbol: String,
    #[serde(default)]
    pub kind: Option<StoplossKind>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub nudge: Option<Nudge>,
}

async fn open_position(state: &AppState, trading_symbol: &str) -> Result<Position> {
    match state.risk.position(trading_symbol).await {
        Ok(p) => Ok(p),
        Err(_) => {
            state.risk.refresh_positions().await;
            state.risk.position(trading_symbol).await
        }
    }
}

pub async fn set_stoploss(State(state): State<AppState>, Json(body): Json<ThresholdBody>) -> ApiResult<SymbolRisk> {
    let tsym = body.trading_symbol.as_str();
    let context = ApiError::context("Failed to set stoploss");
    let result = match (body.price, body.nudge) {
        (Some(price), _) => state.risk.with_engine(|e| e.set_stoploss_price(tsym, price).map(drop)).await,
        (None, Some(nudge)) => state.risk.with_engine(|e| e.adjust_stoploss(tsym, nudge).map(drop)).await,
        (None, None) => {
            let kind = body.kind.unwrap_or(StoplossKind::Static);
            match open_position(&state, tsym).await {
                Ok(position) => {
                    let tick = state.risk.tick(tsym).await;
                    state
                        .risk
                        .with_engine(|e| e.set_stoploss(&position, kind, tick).map(drop))
                        .await
                }
                Err(e) => Err(e),
            }
        }
    };
    result.map_err(context)?;
    Ok(Json(state.risk.with_engine(|e| e.symbol(tsym)).await))
}

pub async fn remove_stoploss(State(state): State<AppState>, Path(symbol): Path<String>) -> Json<SymbolRisk> {
    Json(
        state
            .risk
            .with_engine(|e| {
                e.remove_stoploss(&symbol);
                e.symbol(&symbol)
            })
            .await,
    )
}

pub async fn set_target(State(state): State<AppState>, Json(body): Json<ThresholdBody>) -> ApiResult<SymbolRisk> {
    let tsym = body.trading_symbol.as_str();
    let context = ApiError::context("Failed to set target");
    let result = match (body.price, body.nudge) {
        (Some(price), _) => state.risk.with_engine(|e| e.set_target_price(tsym, price).map(drop)).await,
        (None, Some(nudge)) => state.risk.with_engine(|e| e.adjust_target(tsym, nudge).map(drop)).await,
        (None, None) => match open_position(&state, tsym).await {
            Ok(position) => {
                let tick = state.risk.tick(tsym).await;
                state.risk.with_engine(|e| e.set_target(&position, tick).map(drop)).await
            }
            Err(e) => Err(e),
        },
    };
    result.map_err(context)?;
    Ok(Json(state.risk.with_engine(|e| e.symbol(tsym)).await))
}

pub async fn remove_target(State(state): State<AppState>, Path(symbol): Path<String>) -> Json<SymbolRisk> {
    Json(
        state
            .risk
            .with_engine(|e| {
                e.remove_target(&symbol);
                e.symbol(&symbol)
            })
            .await,
    )
}
