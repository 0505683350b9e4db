//! Shared enum types and their broker-specific wire codes.
//!
//! The canonical (serde) spelling is what the proxy speaks to its own
//! clients. Each broker dialect has its own short codes, exposed through
//! `noren_code` / `kotak_code` and parsed back with `from_broker_code`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SteadfastError;

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Brokerage behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Broker {
    #[serde(alias = "Flattrade")]
    Flattrade,
    #[serde(alias = "Shoonya")]
    Shoonya,
    #[serde(rename = "kotakneo", alias = "KotakNeo")]
    KotakNeo,
    /// In-memory paper broker.
    #[serde(rename = "virtual", alias = "paper")]
    Paper,
}

impl Broker {
    /// All live (non-paper) brokers.
    pub const LIVE: [Broker; 3] = [Broker::Flattrade, Broker::Shoonya, Broker::KotakNeo];

    /// Path segment used by the proxy routes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flattrade => "flattrade",
            Self::Shoonya => "shoonya",
            Self::KotakNeo => "kotakneo",
            Self::Paper => "virtual",
        }
    }
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Broker {
    type Err = SteadfastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flattrade" => Ok(Self::Flattrade),
            "shoonya" => Ok(Self::Shoonya),
            "kotakneo" => Ok(Self::KotakNeo),
            "virtual" | "paper" => Ok(Self::Paper),
            other => Err(SteadfastError::InvalidArgument(format!(
                "unknown broker: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// Exchange code in the Noren spelling, which the proxy uses canonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum Exchange {
    NSE,
    BSE,
    /// NSE futures & options.
    NFO,
    /// BSE futures & options.
    BFO,
}

impl Exchange {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NSE => "NSE",
            Self::BSE => "BSE",
            Self::NFO => "NFO",
            Self::BFO => "BFO",
        }
    }

    /// Kotak Neo exchange segment for this exchange.
    pub fn kotak_segment(self) -> KotakSegment {
        match self {
            Self::NSE => KotakSegment::NseCm,
            Self::BSE => KotakSegment::BseCm,
            Self::NFO => KotakSegment::NseFo,
            Self::BFO => KotakSegment::BseFo,
        }
    }

    /// Derivatives exchange an index underlying trades on.
    pub fn for_underlying(symbol: &str) -> Self {
        match symbol.to_ascii_uppercase().as_str() {
            "SENSEX" | "BANKEX" | "SENSEX50" => Self::BFO,
            _ => Self::NFO,
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = SteadfastError;

    /// Accepts both Noren codes and Kotak segments.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NSE" | "NSE_CM" => Ok(Self::NSE),
            "BSE" | "BSE_CM" => Ok(Self::BSE),
            "NFO" | "NSE_FO" => Ok(Self::NFO),
            "BFO" | "BSE_FO" => Ok(Self::BFO),
            other => Err(SteadfastError::InvalidArgument(format!(
                "unknown exchange: {other}"
            ))),
        }
    }
}

/// Kotak Neo exchange segment code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KotakSegment {
    NseCm,
    BseCm,
    NseFo,
    BseFo,
    CdeFo,
    McxFo,
}

impl KotakSegment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NseCm => "nse_cm",
            Self::BseCm => "bse_cm",
            Self::NseFo => "nse_fo",
            Self::BseFo => "bse_fo",
            Self::CdeFo => "cde_fo",
            Self::McxFo => "mcx_fo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nse_cm" => Some(Self::NseCm),
            "bse_cm" => Some(Self::BseCm),
            "nse_fo" => Some(Self::NseFo),
            "bse_fo" => Some(Self::BseFo),
            "cde_fo" => Some(Self::CdeFo),
            "mcx_fo" => Some(Self::McxFo),
            _ => None,
        }
    }

    /// Segments whose scrip-master expiry epochs are shifted by
    /// [`KOTAK_NSE_EPOCH_OFFSET`](crate::constants::KOTAK_NSE_EPOCH_OFFSET).
    pub fn has_epoch_offset(self) -> bool {
        matches!(self, Self::NseFo | Self::CdeFo)
    }

    /// Canonical exchange, for the segments that have one.
    pub fn exchange(self) -> Option<Exchange> {
        match self {
            Self::NseCm => Some(Exchange::NSE),
            Self::BseCm => Some(Exchange::BSE),
            Self::NseFo => Some(Exchange::NFO),
            Self::BseFo => Some(Exchange::BFO),
            Self::CdeFo | Self::McxFo => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction Type
// ---------------------------------------------------------------------------

/// Buy or sell side of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "BUY", alias = "B")]
    Buy,
    #[serde(rename = "SELL", alias = "S")]
    Sell,
}

impl TransactionType {
    /// Single-letter code shared by Noren and Kotak.
    pub fn code(self) -> &'static str {
        match self {
            Self::Buy => "B",
            Self::Sell => "S",
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn from_broker_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "B" | "BUY" => Some(Self::Buy),
            "S" | "SELL" => Some(Self::Sell),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Order Type
// ---------------------------------------------------------------------------

/// Price type of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderType {
    #[default]
    #[serde(rename = "MKT")]
    Market,
    #[serde(rename = "LMT")]
    Limit,
    #[serde(rename = "SL-LMT", alias = "SL_LMT")]
    StopLossLimit,
    #[serde(rename = "SL-MKT", alias = "SL_MKT")]
    StopLossMarket,
}

impl OrderType {
    pub fn noren_code(self) -> &'static str {
        match self {
            Self::Market => "MKT",
            Self::Limit => "LMT",
            Self::StopLossLimit => "SL-LMT",
            Self::StopLossMarket => "SL-MKT",
        }
    }

    pub fn kotak_code(self) -> &'static str {
        match self {
            Self::Market => "MKT",
            Self::Limit => "L",
            Self::StopLossLimit => "SL",
            Self::StopLossMarket => "SL-M",
        }
    }

    /// Parse either dialect. Unknown codes are treated as limit orders.
    pub fn from_broker_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "MKT" | "M" | "MARKET" => Self::Market,
            "SL-LMT" | "SL_LMT" | "SL" => Self::StopLossLimit,
            "SL-MKT" | "SL_MKT" | "SL-M" => Self::StopLossMarket,
            _ => Self::Limit,
        }
    }

    pub fn has_trigger(self) -> bool {
        matches!(self, Self::StopLossLimit | Self::StopLossMarket)
    }
}

// ---------------------------------------------------------------------------
// Product Type
// ---------------------------------------------------------------------------

/// Product (margin) type for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProductType {
    #[default]
    Intraday,
    /// Carry forward (NRML).
    Margin,
}

impl ProductType {
    pub fn noren_code(self) -> &'static str {
        match self {
            Self::Intraday => "I",
            Self::Margin => "M",
        }
    }

    pub fn kotak_code(self) -> &'static str {
        match self {
            Self::Intraday => "MIS",
            Self::Margin => "NRML",
        }
    }

    pub fn from_broker_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "I" | "MIS" | "INTRADAY" => Self::Intraday,
            _ => Self::Margin,
        }
    }
}

// ---------------------------------------------------------------------------
// Order Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an order, normalised across brokers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    Pending,
    Open,
    TriggerPending,
    Complete,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Parse a broker status string. Unrecognised values map to `Pending`.
    pub fn from_broker_status(status: &str) -> Self {
        match status.trim().to_ascii_uppercase().as_str() {
            "OPEN" | "OPN" => Self::Open,
            "TRIGGER PENDING" | "TRIGGER_PENDING" | "TRG_PND" | "SLO" => Self::TriggerPending,
            "COMPLETE" | "COMPLETED" | "TRADED" | "FILLED" | "FLD" => Self::Complete,
            "CANCELED" | "CANCELLED" | "CAN" => Self::Cancelled,
            "REJECTED" | "REJ" => Self::Rejected,
            _ => Self::Pending,
        }
    }

    /// Orders in these states can still be cancelled or modified.
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Pending | Self::Open | Self::TriggerPending)
    }
}

// ---------------------------------------------------------------------------
// Option Type
// ---------------------------------------------------------------------------

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    #[serde(rename = "CALL")]
    Call,
    #[serde(rename = "PUT")]
    Put,
}

impl OptionType {
    /// Accepts `CE`/`PE`, `CALL`/`PUT` and `C`/`P`, case-insensitively.
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag.trim().to_ascii_uppercase().as_str() {
            "CE" | "CALL" | "C" => Some(Self::Call),
            "PE" | "PUT" | "P" => Some(Self::Put),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_flags() {
        for flag in ["CE", "ce", "Call", "C"] {
            assert_eq!(OptionType::from_flag(flag), Some(OptionType::Call));
        }
        for flag in ["PE", "put", "P"] {
            assert_eq!(OptionType::from_flag(flag), Some(OptionType::Put));
        }
        assert_eq!(OptionType::from_flag("XX"), None);
        assert_eq!(OptionType::from_flag(""), None);
    }

    #[test]
    fn order_status_from_both_dialects() {
        assert_eq!(OrderStatus::from_broker_status("OPEN"), OrderStatus::Open);
        assert_eq!(OrderStatus::from_broker_status("open"), OrderStatus::Open);
        assert_eq!(
            OrderStatus::from_broker_status("TRIGGER PENDING"),
            OrderStatus::TriggerPending
        );
        assert_eq!(
            OrderStatus::from_broker_status("trg_pnd"),
            OrderStatus::TriggerPending
        );
        assert_eq!(
            OrderStatus::from_broker_status("complete"),
            OrderStatus::Complete
        );
        assert_eq!(
            OrderStatus::from_broker_status("CANCELED"),
            OrderStatus::Cancelled
        );
        assert!(OrderStatus::from_broker_status("SLO").is_cancellable());
        assert!(!OrderStatus::Rejected.is_cancellable());
    }

    #[test]
    fn order_type_codes() {
        assert_eq!(OrderType::StopLossLimit.kotak_code(), "SL");
        assert_eq!(OrderType::StopLossLimit.noren_code(), "SL-LMT");
        assert_eq!(OrderType::from_broker_code("L"), OrderType::Limit);
        assert_eq!(OrderType::from_broker_code("SL-M"), OrderType::StopLossMarket);
        let parsed: OrderType = serde_json::from_str("\"SL_LMT\"").unwrap();
        assert_eq!(parsed, OrderType::StopLossLimit);
    }

    #[test]
    fn exchange_round_trips_kotak_segments() {
        for exch in [Exchange::NSE, Exchange::BSE, Exchange::NFO, Exchange::BFO] {
            assert_eq!(exch.kotak_segment().exchange(), Some(exch));
            assert_eq!(exch.kotak_segment().as_str().parse::<Exchange>().unwrap(), exch);
        }
        assert_eq!(Exchange::for_underlying("sensex"), Exchange::BFO);
        assert_eq!(Exchange::for_underlying("NIFTY"), Exchange::NFO);
    }

    #[test]
    fn broker_path_names() {
        assert_eq!("KotakNeo".parse::<Broker>().unwrap(), Broker::KotakNeo);
        assert_eq!("virtual".parse::<Broker>().unwrap(), Broker::Paper);
        let b: Broker = serde_json::from_str("\"kotakneo\"").unwrap();
        assert_eq!(b, Broker::KotakNeo);
        assert!("zerodha".parse::<Broker>().is_err());
    }
}
