//! Alias tables mapping broker field names onto canonical fields.
//!
//! Every broker names the same logical field differently (and some name it
//! differently depending on the endpoint). Instead of fallback chains at each
//! use site, each broker declares a [`FieldMap`]: an ordered list of
//! `(source_key, canonical_field)` pairs. Lookup returns the first non-empty
//! value among the aliases of a field, in table order.

use std::borrow::Cow;

use serde_json::{Map, Value};

/// A record whose fields can be read as strings by their source name.
pub trait RawRecord {
    /// Raw value of `key`, if present and scalar.
    fn raw(&self, key: &str) -> Option<Cow<'_, str>>;
}

impl RawRecord for Map<String, Value> {
    fn raw(&self, key: &str) -> Option<Cow<'_, str>> {
        match self.get(key)? {
            Value::String(s) => Some(Cow::Borrowed(s.as_str())),
            Value::Number(n) => Some(Cow::Owned(n.to_string())),
            Value::Bool(b) => Some(Cow::Owned(b.to_string())),
            _ => None,
        }
    }
}

/// One `(source_key, canonical_field)` pair.
#[derive(Debug, Clone, Copy)]
pub struct Alias<F> {
    pub source_key: &'static str,
    pub field: F,
}

/// Shorthand constructor for table literals.
pub const fn alias<F>(source_key: &'static str, field: F) -> Alias<F> {
    Alias { source_key, field }
}

/// Ordered alias table for one record shape of one broker.
#[derive(Debug, Clone, Copy)]
pub struct FieldMap<F: 'static> {
    aliases: &'static [Alias<F>],
}

impl<F: Copy + PartialEq + 'static> FieldMap<F> {
    pub const fn new(aliases: &'static [Alias<F>]) -> Self {
        Self { aliases }
    }

    /// First non-blank value among the aliases of `field`.
    pub fn get<'r, R: RawRecord + ?Sized>(&self, record: &'r R, field: F) -> Option<Cow<'r, str>> {
        self.aliases
            .iter()
            .filter(|a| a.field == field)
            .find_map(|a| record.raw(a.source_key).filter(|v| !v.trim().is_empty()))
    }

    pub fn string<R: RawRecord + ?Sized>(&self, record: &R, field: F) -> Option<String> {
        self.get(record, field).map(|v| v.trim().to_owned())
    }

    /// Finite float value; unparseable values count as absent.
    pub fn f64<R: RawRecord + ?Sized>(&self, record: &R, field: F) -> Option<f64> {
        self.get(record, field)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    /// Integer value; accepts `"75"` as well as `"75.0"`.
    pub fn i64<R: RawRecord + ?Sized>(&self, record: &R, field: F) -> Option<i64> {
        let raw = self.get(record, field)?;
        let raw = raw.trim();
        raw.parse::<i64>()
            .ok()
            .or_else(|| raw.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64))
    }
}

// ---------------------------------------------------------------------------
// Canonical fields
// ---------------------------------------------------------------------------

/// Canonical fields of an order book entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    OrderId,
    TradingSymbol,
    TransactionType,
    Quantity,
    Price,
    TriggerPrice,
    OrderType,
    Status,
    Exchange,
    Product,
    SecurityId,
    Timestamp,
    RejectionReason,
}

/// Canonical fields of a trade book entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeField {
    OrderId,
    TradingSymbol,
    TransactionType,
    Quantity,
    FillPrice,
    Timestamp,
}

/// Canonical fields of a position book entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionField {
    TradingSymbol,
    SecurityId,
    NetQuantity,
    AveragePrice,
    LastTradedPrice,
    Product,
    Exchange,
    BuyAverage,
    SellAverage,
    RealizedPnl,
    DayBuyQuantity,
    CarryBuyQuantity,
    DaySellQuantity,
    CarrySellQuantity,
    BuyAmount,
    SellAmount,
}

/// Canonical fields of an instrument master row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentField {
    TradingSymbol,
    SecurityId,
    Expiry,
    Strike,
    LotSize,
    OptionType,
    Underlying,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum F {
        Qty,
        Sym,
    }

    const TABLE: FieldMap<F> = FieldMap::new(&[
        alias("netQty", F::Qty),
        alias("qty", F::Qty),
        alias("trdSym", F::Sym),
    ]);

    fn record(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn first_non_blank_alias_wins() {
        let r = record(json!({ "netQty": "", "qty": 50, "trdSym": "NIFTY" }));
        assert_eq!(TABLE.i64(&r, F::Qty), Some(50));
        assert_eq!(TABLE.string(&r, F::Sym).as_deref(), Some("NIFTY"));

        let r = record(json!({ "netQty": "-75", "qty": 50 }));
        assert_eq!(TABLE.i64(&r, F::Qty), Some(-75));
    }

    #[test]
    fn unparseable_numbers_are_absent() {
        let r = record(json!({ "netQty": "abc" }));
        assert_eq!(TABLE.f64(&r, F::Qty), None);
        assert_eq!(TABLE.i64(&r, F::Qty), None);
        let r = record(json!({ "qty": "75.0" }));
        assert_eq!(TABLE.i64(&r, F::Qty), Some(75));
    }
}
