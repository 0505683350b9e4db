#![allow(missing_docs)]
//! Open positions.

use serde::{Deserialize, Serialize};

use crate::types::enums::*;

/// A single position, normalised across brokers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub broker: Broker,
    pub trading_symbol: String,
    #[serde(default)]
    pub security_id: Option<String>,
    /// Positive when long, negative when short.
    pub net_quantity: i64,
    #[serde(default)]
    pub average_price: f64,
    #[serde(default)]
    pub last_traded_price: f64,
    #[serde(default)]
    pub product: ProductType,
    pub exchange: Exchange,
    #[serde(default)]
    pub buy_average: f64,
    #[serde(default)]
    pub sell_average: f64,
    #[serde(default)]
    pub realized_pnl: f64,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.net_quantity != 0
    }

    pub fn is_long(&self) -> bool {
        self.net_quantity > 0
    }

    pub fn abs_quantity(&self) -> u64 {
        self.net_quantity.unsigned_abs()
    }

    /// Side of the order that flattens this position.
    pub fn closing_side(&self) -> TransactionType {
        if self.is_long() {
            TransactionType::Sell
        } else {
            TransactionType::Buy
        }
    }

    /// Best price the position itself carries: last traded, then average.
    ///
    /// Used when the live tick for the symbol is missing or not positive.
    pub fn fallback_price(&self) -> Option<f64> {
        [self.last_traded_price, self.average_price]
            .into_iter()
            .find(|p| p.is_finite() && *p > 0.0)
    }
}
