#![allow(missing_docs)]
//! Fund limit types.

use serde::{Deserialize, Serialize};

/// Available funds, normalised across brokers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundLimits {
    /// Cash / margin available for trading.
    pub cash: f64,
    /// Funds added today.
    pub payin: f64,
    pub margin_used: f64,
}
