//! Stoploss, trailing stoploss and target tracking.
//!
//! [`RiskEngine`] is a synchronous state machine keyed by trading symbol.
//! Each call to [`RiskEngine::evaluate`] takes the latest ticks and the
//! aggregated position book and returns the positions that must be closed.
//! [`monitor::RiskMonitor`] drives it from ticks and position polls and
//! dispatches the closes.
//!
//! Per symbol, the stoploss is [`Stoploss::Inactive`], [`Stoploss::Static`]
//! or [`Stoploss::Trailing`], never two at once. After a trigger the symbol
//! sits in [`SymbolState::ClosedByStoploss`] / [`SymbolState::ClosedByTarget`]
//! until its position disappears from the book, so a stale threshold cannot
//! fire twice.

pub mod monitor;

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_STOPLOSS_DISTANCE, DEFAULT_TARGET_DISTANCE, THRESHOLD_NUDGE};
use crate::error::{Result, SteadfastError};
use crate::types::portfolio::Position;
use crate::types::{Broker, TransactionType, round2};

pub use self::monitor::RiskMonitor;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Stoploss of one symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "price", rename_all = "camelCase")]
pub enum Stoploss {
    #[default]
    Inactive,
    Static(f64),
    Trailing(f64),
}

impl Stoploss {
    pub fn level(self) -> Option<f64> {
        match self {
            Self::Inactive => None,
            Self::Static(p) | Self::Trailing(p) => Some(p),
        }
    }
}

/// Whether a symbol's thresholds are still live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SymbolState {
    #[default]
    Active,
    ClosedByStoploss,
    ClosedByTarget,
}

/// Thresholds and state of one trading symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolRisk {
    pub stoploss: Stoploss,
    pub target: Option<f64>,
    pub state: SymbolState,
}

impl SymbolRisk {
    fn is_empty(&self) -> bool {
        self.stoploss == Stoploss::Inactive && self.target.is_none() && self.state == SymbolState::Active
    }
}

/// User-facing risk settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskSettings {
    pub stoploss_enabled: bool,
    /// Points between price and a computed stoploss; also the trailing step.
    pub stoploss_distance: f64,
    pub target_enabled: bool,
    pub target_distance: f64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            stoploss_enabled: false,
            stoploss_distance: DEFAULT_STOPLOSS_DISTANCE,
            target_enabled: false,
            target_distance: DEFAULT_TARGET_DISTANCE,
        }
    }
}

impl RiskSettings {
    /// Configured stoploss distance, or the default when not a positive number.
    pub fn stoploss_step(&self) -> f64 {
        valid_distance(self.stoploss_distance).unwrap_or(DEFAULT_STOPLOSS_DISTANCE)
    }

    pub fn target_step(&self) -> f64 {
        valid_distance(self.target_distance).unwrap_or(DEFAULT_TARGET_DISTANCE)
    }

    /// Replace invalid distances with the defaults.
    pub fn sanitized(mut self) -> Self {
        if valid_distance(self.stoploss_distance).is_none() {
            tracing::warn!(value = self.stoploss_distance, "invalid stoploss distance, using default");
            self.stoploss_distance = DEFAULT_STOPLOSS_DISTANCE;
        }
        if valid_distance(self.target_distance).is_none() {
            tracing::warn!(value = self.target_distance, "invalid target distance, using default");
            self.target_distance = DEFAULT_TARGET_DISTANCE;
        }
        self
    }
}

fn valid_distance(d: f64) -> Option<f64> {
    (d.is_finite() && d > 0.0).then_some(d)
}

fn valid_price(p: f64) -> Option<f64> {
    (p.is_finite() && p > 0.0).then_some(p)
}

// ---------------------------------------------------------------------------
// Requests and signals
// ---------------------------------------------------------------------------

/// How [`RiskEngine::set_stoploss`] should arm the stoploss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoplossKind {
    /// Fixed level; keeps an existing static level.
    Static,
    /// Level that follows favourable moves.
    Trailing,
    /// Current static level becomes a trailing one.
    ConvertToTrailing,
    /// Current trailing level becomes a static one.
    ConvertToStatic,
}

/// Direction of a manual nudge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Nudge {
    Up,
    Down,
}

impl Nudge {
    fn delta(self) -> f64 {
        match self {
            Self::Up => THRESHOLD_NUDGE,
            Self::Down => -THRESHOLD_NUDGE,
        }
    }
}

/// Why a position is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CloseReason {
    Stoploss,
    TrailingStoploss,
    Target,
}

/// A position to flatten.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseSignal {
    pub reason: CloseReason,
    /// Threshold that was crossed.
    pub level: f64,
    /// Price that crossed it.
    pub price: f64,
    pub position: Position,
}

impl CloseSignal {
    pub fn broker(&self) -> Broker {
        self.position.broker
    }

    pub fn side(&self) -> TransactionType {
        self.position.closing_side()
    }

    pub fn quantity(&self) -> u64 {
        self.position.abs_quantity()
    }
}

/// Serializable view of the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskSnapshot {
    pub settings: RiskSettings,
    pub symbols: BTreeMap<String, SymbolRisk>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Per-symbol threshold book.
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    settings: RiskSettings,
    symbols: HashMap<String, SymbolRisk>,
}

impl RiskEngine {
    pub fn new(settings: RiskSettings) -> Self {
        Self {
            settings: settings.sanitized(),
            symbols: HashMap::new(),
        }
    }

    pub fn settings(&self) -> RiskSettings {
        self.settings
    }

    pub fn update_settings(&mut self, settings: RiskSettings) {
        self.settings = settings.sanitized();
        tracing::info!(settings = ?self.settings, "risk settings updated");
    }

    pub fn symbol(&self, trading_symbol: &str) -> SymbolRisk {
        self.symbols.get(trading_symbol).copied().unwrap_or_default()
    }

    pub fn snapshot(&self) -> RiskSnapshot {
        RiskSnapshot {
            settings: self.settings,
            symbols: self
                .symbols
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    fn entry(&mut self, trading_symbol: &str) -> &mut SymbolRisk {
        self.symbols.entry(trading_symbol.to_owned()).or_default()
    }

    fn prune(&mut self, trading_symbol: &str) {
        if self.symbols.get(trading_symbol).is_some_and(SymbolRisk::is_empty) {
            self.symbols.remove(trading_symbol);
        }
    }

    // -----------------------------------------------------------------------
    // Stoploss
    // -----------------------------------------------------------------------

    /// Arm or convert the stoploss of `position`.
    ///
    /// Computed levels are `price ∓ distance` (below for longs, above for
    /// shorts), rounded to paise. `tick` is the live price; the position's
    /// own prices are the fallback.
    pub fn set_stoploss(&mut self, position: &Position, kind: StoplossKind, tick: Option<f64>) -> Result<Stoploss> {
        if !self.settings.stoploss_enabled {
            return Err(SteadfastError::InvalidArgument("stoploss is disabled".into()));
        }
        require_open(position)?;
        let step = self.settings.stoploss_step();
        let tsym = position.trading_symbol.as_str();
        let current = self.symbol(tsym).stoploss;

        let next = match kind {
            StoplossKind::Static => match current {
                Stoploss::Static(level) => Stoploss::Static(level),
                _ => Stoploss::Static(stoploss_level(position, resolve_price(tick, position)?, step)),
            },
            StoplossKind::Trailing => {
                Stoploss::Trailing(stoploss_level(position, resolve_price(tick, position)?, step))
            }
            StoplossKind::ConvertToTrailing => match current {
                Stoploss::Static(level) => Stoploss::Trailing(level),
                _ => {
                    return Err(SteadfastError::InvalidArgument(format!(
                        "no static stoploss to convert for {tsym}"
                    )));
                }
            },
            StoplossKind::ConvertToStatic => match current {
                Stoploss::Trailing(level) => Stoploss::Static(level),
                _ => {
                    return Err(SteadfastError::InvalidArgument(format!(
                        "no trailing stoploss to convert for {tsym}"
                    )));
                }
            },
        };
        self.entry(tsym).stoploss = next;
        tracing::info!(%tsym, stoploss = ?next, "stoploss set");
        Ok(next)
    }

    /// Set a manually entered level, keeping the current kind (static when
    /// none is armed).
    pub fn set_stoploss_price(&mut self, trading_symbol: &str, price: f64) -> Result<Stoploss> {
        let price = round2(require_price(price)?);
        let entry = self.entry(trading_symbol);
        entry.stoploss = match entry.stoploss {
            Stoploss::Trailing(_) => Stoploss::Trailing(price),
            _ => Stoploss::Static(price),
        };
        Ok(entry.stoploss)
    }

    pub fn remove_stoploss(&mut self, trading_symbol: &str) {
        if let Some(entry) = self.symbols.get_mut(trading_symbol) {
            entry.stoploss = Stoploss::Inactive;
        }
        self.prune(trading_symbol);
    }

    /// Move a static stoploss by half a point.
    pub fn adjust_stoploss(&mut self, trading_symbol: &str, nudge: Nudge) -> Result<f64> {
        match self.symbols.get_mut(trading_symbol) {
            Some(SymbolRisk {
                stoploss: Stoploss::Static(level),
                ..
            }) => {
                *level = round2(*level + nudge.delta());
                Ok(*level)
            }
            _ => Err(SteadfastError::NotFound(format!(
                "no static stoploss for {trading_symbol}"
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Target
    // -----------------------------------------------------------------------

    /// Arm the target of `position`, keeping an existing one.
    pub fn set_target(&mut self, position: &Position, tick: Option<f64>) -> Result<f64> {
        if !self.settings.target_enabled {
            return Err(SteadfastError::InvalidArgument("target is disabled".into()));
        }
        require_open(position)?;
        let tsym = position.trading_symbol.as_str();
        if let Some(existing) = self.symbol(tsym).target {
            return Ok(existing);
        }
        let price = resolve_price(tick, position)?;
        let step = self.settings.target_step();
        let level = round2(if position.is_long() { price + step } else { price - step });
        self.entry(tsym).target = Some(level);
        tracing::info!(%tsym, target = level, "target set");
        Ok(level)
    }

    pub fn set_target_price(&mut self, trading_symbol: &str, price: f64) -> Result<f64> {
        let price = round2(require_price(price)?);
        self.entry(trading_symbol).target = Some(price);
        Ok(price)
    }

    pub fn remove_target(&mut self, trading_symbol: &str) {
        if let Some(entry) = self.symbols.get_mut(trading_symbol) {
            entry.target = None;
        }
        self.prune(trading_symbol);
    }

    pub fn adjust_target(&mut self, trading_symbol: &str, nudge: Nudge) -> Result<f64> {
        match self.symbols.get_mut(trading_symbol) {
            Some(SymbolRisk {
                target: Some(level),
                ..
            }) => {
                *level = round2(*level + nudge.delta());
                Ok(*level)
            }
            _ => Err(SteadfastError::NotFound(format!("no target for {trading_symbol}"))),
        }
    }

    /// Re-activate a symbol whose closing order failed.
    pub fn close_failed(&mut self, trading_symbol: &str) {
        if let Some(entry) = self.symbols.get_mut(trading_symbol) {
            entry.state = SymbolState::Active;
        }
        self.prune(trading_symbol);
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// One evaluation cycle.
    ///
    /// Symbols without an open position lose their thresholds. For the rest,
    /// stoplosses are checked before targets, so a symbol closed by its
    /// stoploss is never also closed by its target.
    pub fn evaluate(&mut self, ticks: &HashMap<String, f64>, positions: &[Position]) -> Vec<CloseSignal> {
        let mut open: HashMap<&str, &Position> = HashMap::new();
        for p in positions.iter().filter(|p| p.is_open()) {
            open.entry(p.trading_symbol.as_str()).or_insert(p);
        }

        let gone: Vec<String> = self
            .symbols
            .keys()
            .filter(|s| !open.contains_key(s.as_str()))
            .cloned()
            .collect();
        for tsym in gone {
            tracing::debug!(%tsym, "position gone, clearing thresholds");
            self.symbols.remove(&tsym);
        }
        if open.is_empty() {
            return Vec::new();
        }

        let settings = self.settings;
        let step = settings.stoploss_step();
        let mut signals = Vec::new();
        let mut skipped: HashSet<&str> = HashSet::new();

        for (tsym, entry) in self.symbols.iter_mut() {
            if entry.state != SymbolState::Active {
                continue;
            }
            let Some(position) = open.get(tsym.as_str()) else {
                continue;
            };
            let Ok(price) = resolve_price(ticks.get(tsym).copied(), position) else {
                skipped.insert(position.trading_symbol.as_str());
                continue;
            };
            let long = position.is_long();

            if settings.stoploss_enabled {
                match entry.stoploss {
                    Stoploss::Static(level) if crossed_stoploss(long, price, level) => {
                        tracing::info!(%tsym, price, level, "stoploss hit");
                        entry.stoploss = Stoploss::Inactive;
                        entry.state = SymbolState::ClosedByStoploss;
                        signals.push(signal(CloseReason::Stoploss, level, price, position));
                        continue;
                    }
                    Stoploss::Trailing(level) => {
                        if let Some(next) = ratchet(long, price, level, step) {
                            tracing::info!(%tsym, from = level, to = next, "trailing stoploss moved");
                            entry.stoploss = Stoploss::Trailing(next);
                        } else if crossed_stoploss(long, price, level) {
                            tracing::info!(%tsym, price, level, "trailing stoploss hit");
                            entry.stoploss = Stoploss::Inactive;
                            entry.state = SymbolState::ClosedByStoploss;
                            signals.push(signal(CloseReason::TrailingStoploss, level, price, position));
                            continue;
                        }
                    }
                    _ => {}
                }
            }

            if settings.target_enabled {
                if let Some(level) = entry.target {
                    let reached = if long { price >= level } else { price <= level };
                    if reached {
                        tracing::info!(%tsym, price, level, "target hit");
                        entry.target = None;
                        entry.state = SymbolState::ClosedByTarget;
                        signals.push(signal(CloseReason::Target, level, price, position));
                    }
                }
            }
        }

        if !skipped.is_empty() {
            tracing::debug!(symbols = ?skipped, "no valid price, skipped this cycle");
        }
        signals
    }
}

fn signal(reason: CloseReason, level: f64, price: f64, position: &Position) -> CloseSignal {
    CloseSignal {
        reason,
        level,
        price,
        position: position.clone(),
    }
}

fn require_open(position: &Position) -> Result<()> {
    if position.is_open() {
        Ok(())
    } else {
        Err(SteadfastError::InvalidArgument(format!(
            "{} has zero quantity",
            position.trading_symbol
        )))
    }
}

fn require_price(price: f64) -> Result<f64> {
    valid_price(price).ok_or_else(|| SteadfastError::InvalidArgument(format!("invalid price {price}")))
}

/// Live tick when positive, else the position's last traded then average price.
pub fn resolve_price(tick: Option<f64>, position: &Position) -> Result<f64> {
    tick.and_then(valid_price)
        .or_else(|| position.fallback_price())
        .ok_or_else(|| {
            SteadfastError::InvalidArgument(format!("no valid price for {}", position.trading_symbol))
        })
}

fn stoploss_level(position: &Position, price: f64, step: f64) -> f64 {
    round2(if position.is_long() { price - step } else { price + step })
}

fn crossed_stoploss(long: bool, price: f64, level: f64) -> bool {
    if long { price <= level } else { price >= level }
}

/// New trailing level when price has moved more than one step past it.
///
/// The level moves by exactly one step per evaluation; a large jump catches
/// up over the following ticks.
fn ratchet(long: bool, price: f64, level: f64, step: f64) -> Option<f64> {
    if long && price > level + step {
        Some(round2(level + step))
    } else if !long && price < level - step {
        Some(round2(level - step))
    } else {
        None
    }
}
