//! Column aliasing and row decoding for instrument master files.
//!
//! Each source names its columns differently. A [`FieldMap`] per source
//! layout turns a header-indexed CSV row into an [`InstrumentRow`]; rows that
//! cannot be decoded are dropped.

use std::borrow::Cow;
use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime};
use csv::StringRecord;

use crate::constants::KOTAK_NSE_EPOCH_OFFSET;
use crate::types::instruments::{EXPIRY_FORMAT, InstrumentRow};
use crate::types::mapping::{FieldMap, InstrumentField, RawRecord, alias};
use crate::types::{KotakSegment, OptionType};

/// IST is UTC+05:30.
pub(crate) const IST_OFFSET_SECS: i64 = 5 * 3600 + 30 * 60;

/// Kotak scrip master layout. `pSymbol` carries the instrument token.
pub(crate) const KOTAK_COLUMNS: FieldMap<InstrumentField> = FieldMap::new(&[
    alias("Expiry", InstrumentField::Expiry),
    alias("pExpiryDate", InstrumentField::Expiry),
    alias("expDt", InstrumentField::Expiry),
    alias("lExpiryDate ", InstrumentField::Expiry),
    alias("lExpiryDate", InstrumentField::Expiry),
    alias("pTrdSymbol", InstrumentField::TradingSymbol),
    alias("Tradingsymbol", InstrumentField::TradingSymbol),
    alias("trdSym", InstrumentField::TradingSymbol),
    alias("TradingSymbol", InstrumentField::TradingSymbol),
    alias("pSymbol", InstrumentField::SecurityId),
    alias("lToken", InstrumentField::SecurityId),
    alias("lKey", InstrumentField::SecurityId),
    alias("Token", InstrumentField::SecurityId),
    alias("Key", InstrumentField::SecurityId),
    alias("pScripRefKey", InstrumentField::SecurityId),
    alias("dStrikePrice;", InstrumentField::Strike),
    alias("dStrikePrice", InstrumentField::Strike),
    alias("Strike", InstrumentField::Strike),
    alias("strkPrc", InstrumentField::Strike),
    alias("StrikePrice", InstrumentField::Strike),
    alias("lLotSize", InstrumentField::LotSize),
    alias("Lotsize", InstrumentField::LotSize),
    alias("lotSz", InstrumentField::LotSize),
    alias("LotSize", InstrumentField::LotSize),
    alias("pOptionType", InstrumentField::OptionType),
    alias("Optiontype", InstrumentField::OptionType),
    alias("optTp", InstrumentField::OptionType),
    alias("OptionType", InstrumentField::OptionType),
    alias("pSymbolName", InstrumentField::Underlying),
    alias("pSymbol", InstrumentField::Underlying),
    alias("Symbol", InstrumentField::Underlying),
    alias("uSym", InstrumentField::Underlying),
]);

/// Flattrade and Shoonya layouts.
pub(crate) const BROKER_COLUMNS: FieldMap<InstrumentField> = FieldMap::new(&[
    alias("Expiry", InstrumentField::Expiry),
    alias("expDt", InstrumentField::Expiry),
    alias("Tradingsymbol", InstrumentField::TradingSymbol),
    alias("TradingSymbol", InstrumentField::TradingSymbol),
    alias("trdSym", InstrumentField::TradingSymbol),
    alias("Token", InstrumentField::SecurityId),
    alias("Key", InstrumentField::SecurityId),
    alias("lToken", InstrumentField::SecurityId),
    alias("Strike", InstrumentField::Strike),
    alias("StrikePrice", InstrumentField::Strike),
    alias("strkPrc", InstrumentField::Strike),
    alias("Lotsize", InstrumentField::LotSize),
    alias("LotSize", InstrumentField::LotSize),
    alias("lotSz", InstrumentField::LotSize),
    alias("Optiontype", InstrumentField::OptionType),
    alias("OptionType", InstrumentField::OptionType),
    alias("optTp", InstrumentField::OptionType),
    alias("Symbol", InstrumentField::Underlying),
    alias("uSym", InstrumentField::Underlying),
]);

/// Column name to position, built once per file from its header row.
#[derive(Debug, Clone, Default)]
pub(crate) struct HeaderIndex(HashMap<String, usize>);

impl HeaderIndex {
    pub(crate) fn new(headers: &StringRecord) -> Self {
        let mut index = HashMap::with_capacity(headers.len());
        for (i, name) in headers.iter().enumerate() {
            // BOM on the first header of some exports
            index.entry(name.trim_start_matches('\u{feff}').to_owned()).or_insert(i);
        }
        Self(index)
    }

    pub(crate) fn row<'a>(&'a self, record: &'a StringRecord) -> CsvRow<'a> {
        CsvRow {
            index: self,
            record,
        }
    }
}

/// A data row viewed through its file's header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CsvRow<'a> {
    index: &'a HeaderIndex,
    record: &'a StringRecord,
}

impl RawRecord for CsvRow<'_> {
    fn raw(&self, key: &str) -> Option<Cow<'_, str>> {
        let pos = *self.index.0.get(key)?;
        self.record.get(pos).map(Cow::Borrowed)
    }
}

/// How one source encodes its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLayout {
    /// Kotak scrip master for a segment: epoch expiries, strikes in paise.
    Kotak(KotakSegment),
    /// Flattrade / Shoonya: `DD-MMM-YYYY` expiries, strikes in rupees.
    Broker,
}

impl RowLayout {
    fn columns(self) -> &'static FieldMap<InstrumentField> {
        match self {
            Self::Kotak(_) => &KOTAK_COLUMNS,
            Self::Broker => &BROKER_COLUMNS,
        }
    }

    /// Decode a row; `None` when any required field is missing or malformed.
    pub(crate) fn decode<R: RawRecord + ?Sized>(self, rec: &R) -> Option<InstrumentRow> {
        let cols = self.columns();
        let raw_expiry = cols.string(rec, InstrumentField::Expiry)?;
        let expiry_date = match self {
            Self::Kotak(segment) => raw_expiry
                .parse::<i64>()
                .ok()
                .and_then(|epoch| decode_kotak_expiry(epoch, segment))
                .or_else(|| parse_expiry(&raw_expiry))?,
            Self::Broker => parse_expiry(&raw_expiry)?,
        };
        let mut strike_price = cols.f64(rec, InstrumentField::Strike)?;
        if matches!(self, Self::Kotak(_)) {
            strike_price /= 100.0;
        }
        Some(InstrumentRow {
            trading_symbol: cols.string(rec, InstrumentField::TradingSymbol)?,
            security_id: cols.string(rec, InstrumentField::SecurityId)?,
            expiry_date,
            strike_price,
            lot_size: cols
                .i64(rec, InstrumentField::LotSize)
                .and_then(|n| u32::try_from(n).ok())?,
            option_type: OptionType::from_flag(&cols.string(rec, InstrumentField::OptionType)?)?,
            underlying_symbol: cols
                .string(rec, InstrumentField::Underlying)
                .unwrap_or_default(),
        })
    }
}

/// `15-MAR-2024` (any case) or `15-03-2024`.
pub fn parse_expiry(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, EXPIRY_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(s, "%d-%m-%Y"))
        .ok()
}

/// Calendar date (IST) of a Kotak expiry epoch.
///
/// `nse_fo` and `cde_fo` epochs are shifted back by
/// [`KOTAK_NSE_EPOCH_OFFSET`]; other segments are plain Unix time.
pub fn decode_kotak_expiry(epoch: i64, segment: KotakSegment) -> Option<NaiveDate> {
    let unix = if segment.has_epoch_offset() {
        epoch.checked_add(KOTAK_NSE_EPOCH_OFFSET)?
    } else {
        epoch
    };
    DateTime::from_timestamp(unix.checked_add(IST_OFFSET_SECS)?, 0).map(|dt| dt.date_naive())
}

/// Inverse of [`decode_kotak_expiry`], at 14:30 IST on `date`.
pub fn encode_kotak_expiry(date: NaiveDate, segment: KotakSegment) -> i64 {
    let close = NaiveTime::from_hms_opt(14, 30, 0).unwrap_or(NaiveTime::MIN);
    let unix = date.and_time(close).and_utc().timestamp() - IST_OFFSET_SECS;
    if segment.has_epoch_offset() {
        unix - KOTAK_NSE_EPOCH_OFFSET
    } else {
        unix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_from(headers: &[&str], values: &[&str]) -> (HeaderIndex, StringRecord) {
        (
            HeaderIndex::new(&StringRecord::from(headers.to_vec())),
            StringRecord::from(values.to_vec()),
        )
    }

    #[test]
    fn expiry_formats() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 15).unwrap();
        assert_eq!(parse_expiry("15-FEB-2024"), Some(d));
        assert_eq!(parse_expiry("15-Feb-2024"), Some(d));
        assert_eq!(parse_expiry("15-02-2024"), Some(d));
        assert_eq!(parse_expiry("2024/02/15"), None);
    }

    #[test]
    fn flattrade_row() {
        let (index, record) = row_from(
            &["Exchange", "Token", "Lotsize", "Symbol", "Tradingsymbol", "Expiry", "Instrument", "Optiontype", "Strike"],
            &["NFO", "43650", "75", "NIFTY", "NIFTY14MAR24C22000", "14-MAR-2024", "OPTIDX", "CE", "22000"],
        );
        let row = RowLayout::Broker.decode(&index.row(&record)).unwrap();
        assert_eq!(row.security_id, "43650");
        assert_eq!(row.lot_size, 75);
        assert_eq!(row.option_type, OptionType::Call);
        assert_eq!(row.strike_price, 22000.0);
        assert_eq!(row.underlying_symbol, "NIFTY");
    }

    #[test]
    fn kotak_row_uses_psymbol_and_paise() {
        let epoch = encode_kotak_expiry(NaiveDate::from_ymd_opt(2024, 3, 14).unwrap(), KotakSegment::NseFo);
        let epoch = epoch.to_string();
        let (index, record) = row_from(
            &["pSymbol", "pExchSeg", "pTrdSymbol", "lLotSize", "lExpiryDate ", "dStrikePrice;", "pOptionType", "pSymbolName"],
            &["53001", "nse_fo", "NIFTY24MAR22000PE", "75", epoch.as_str(), "2200000", "PE", "NIFTY"],
        );
        let row = RowLayout::Kotak(KotakSegment::NseFo).decode(&index.row(&record)).unwrap();
        assert_eq!(row.security_id, "53001");
        assert_eq!(row.strike_price, 22000.0);
        assert_eq!(row.expiry_date, NaiveDate::from_ymd_opt(2024, 3, 14).unwrap());
        assert_eq!(row.option_type, OptionType::Put);
    }

    #[test]
    fn malformed_rows_are_dropped() {
        let (index, record) = row_from(
            &["Token", "Lotsize", "Tradingsymbol", "Expiry", "Optiontype", "Strike"],
            &["1", "75", "NIFTYFUT", "not-a-date", "CE", "22000"],
        );
        assert!(RowLayout::Broker.decode(&index.row(&record)).is_none());

        let (index, record) = row_from(
            &["Token", "Lotsize", "Tradingsymbol", "Expiry", "Optiontype", "Strike"],
            &["1", "75", "NIFTY24MARFUT", "28-MAR-2024", "XX", "0"],
        );
        assert!(RowLayout::Broker.decode(&index.row(&record)).is_none());
    }

    #[test]
    fn bse_epochs_are_plain_unix_time() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let bse = encode_kotak_expiry(date, KotakSegment::BseFo);
        let nse = encode_kotak_expiry(date, KotakSegment::NseFo);
        assert_eq!(bse - nse, KOTAK_NSE_EPOCH_OFFSET);
        assert_eq!(decode_kotak_expiry(bse, KotakSegment::BseFo), Some(date));
    }
}
