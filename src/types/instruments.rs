#![allow(missing_docs)]
//! Instrument master rows and symbol lookup results.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::enums::OptionType;

/// Expiry format used on the wire, e.g. `14-MAR-2024`.
pub const EXPIRY_FORMAT: &str = "%d-%b-%Y";

/// One option contract read from an instrument master file.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentRow {
    pub trading_symbol: String,
    pub security_id: String,
    pub expiry_date: NaiveDate,
    pub strike_price: f64,
    pub lot_size: u32,
    pub option_type: OptionType,
    pub underlying_symbol: String,
}

/// Wire form of a strike in [`SymbolsResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrikeData {
    pub trading_symbol: String,
    pub security_id: String,
    pub expiry_date: String,
    pub strike_price: f64,
    #[serde(rename = "lotsize")]
    pub lot_size: u32,
}

impl From<&InstrumentRow> for StrikeData {
    fn from(row: &InstrumentRow) -> Self {
        Self {
            trading_symbol: row.trading_symbol.clone(),
            security_id: row.security_id.clone(),
            expiry_date: format_expiry(row.expiry_date),
            strike_price: row.strike_price,
            lot_size: row.lot_size,
        }
    }
}

/// Which instrument file answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentSource {
    Kotak,
    Flattrade,
    Shoonya,
}

/// Strikes and expiries for one underlying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolsResponse {
    pub call_strikes: Vec<StrikeData>,
    pub put_strikes: Vec<StrikeData>,
    /// Today-or-future expiries, ascending.
    pub expiry_dates: Vec<String>,
    pub source: InstrumentSource,
}

/// `14-MAR-2024`.
pub fn format_expiry(date: NaiveDate) -> String {
    date.format(EXPIRY_FORMAT).to_string().to_ascii_uppercase()
}
