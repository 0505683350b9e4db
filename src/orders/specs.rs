//! Per-underlying contract specs and freeze-limit chunking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Contract parameters of an index underlying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentSpec {
    /// Units per lot.
    pub lot_size: u32,
    /// Most lots the exchange accepts in one order.
    pub freeze_limit: u32,
    /// Most lots the front-end offers for one trade.
    pub max_lots: u32,
}

impl InstrumentSpec {
    pub const fn new(lot_size: u32, freeze_limit: u32, max_lots: u32) -> Self {
        Self {
            lot_size,
            freeze_limit,
            max_lots,
        }
    }

    /// Largest quantity one order may carry.
    pub fn freeze_quantity(&self) -> u64 {
        u64::from(self.freeze_limit) * u64::from(self.lot_size)
    }
}

/// Spec table keyed by underlying name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSpecs(BTreeMap<String, InstrumentSpec>);

impl Default for InstrumentSpecs {
    fn default() -> Self {
        Self::from_iter([
            ("NIFTY", InstrumentSpec::new(75, 24, 280)),
            ("BANKNIFTY", InstrumentSpec::new(35, 25, 300)),
            ("FINNIFTY", InstrumentSpec::new(65, 27, 280)),
            ("MIDCPNIFTY", InstrumentSpec::new(140, 20, 280)),
            ("SENSEX", InstrumentSpec::new(20, 50, 500)),
            ("BANKEX", InstrumentSpec::new(30, 30, 300)),
        ])
    }
}

impl<'a> FromIterator<(&'a str, InstrumentSpec)> for InstrumentSpecs {
    fn from_iter<T: IntoIterator<Item = (&'a str, InstrumentSpec)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.to_ascii_uppercase(), v))
                .collect(),
        )
    }
}

impl InstrumentSpecs {
    pub fn get(&self, underlying: &str) -> Option<InstrumentSpec> {
        self.0.get(&underlying.trim().to_ascii_uppercase()).copied()
    }

    pub fn insert(&mut self, underlying: &str, spec: InstrumentSpec) {
        self.0.insert(underlying.trim().to_ascii_uppercase(), spec);
    }

    /// Spec of the longest underlying name `trading_symbol` starts with.
    ///
    /// With both `NIFTY` and `NIFTYNXT` known, `NIFTYNXT50...` resolves to
    /// `NIFTYNXT`.
    pub fn for_trading_symbol(&self, trading_symbol: &str) -> Option<(&str, InstrumentSpec)> {
        let tsym = trading_symbol.trim().to_ascii_uppercase();
        self.0
            .iter()
            .filter(|(name, _)| tsym.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(name, spec)| (name.as_str(), *spec))
    }
}

/// Split `lots` into chunks of at most `freeze_limit` lots.
pub fn lot_chunks(lots: u32, freeze_limit: u32) -> Vec<u32> {
    let limit = freeze_limit.max(1);
    let mut chunks = Vec::with_capacity((lots / limit + 1) as usize);
    let mut remaining = lots;
    while remaining > 0 {
        let n = remaining.min(limit);
        chunks.push(n);
        remaining -= n;
    }
    chunks
}

/// Split `quantity` into chunks of at most `max_per_order` units.
pub fn quantity_chunks(quantity: u64, max_per_order: u64) -> Vec<u64> {
    let limit = max_per_order.max(1);
    let mut chunks = Vec::new();
    let mut remaining = quantity;
    while remaining > 0 {
        let n = remaining.min(limit);
        chunks.push(n);
        remaining -= n;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_respect_freeze_limit() {
        assert_eq!(lot_chunks(50, 24), vec![24, 24, 2]);
        assert_eq!(lot_chunks(24, 24), vec![24]);
        assert!(lot_chunks(0, 24).is_empty());
        assert_eq!(quantity_chunks(3700, 1800), vec![1800, 1800, 100]);
        assert_eq!(lot_chunks(3, 0), vec![1, 1, 1]);
    }

    #[test]
    fn longest_prefix_wins() {
        let mut specs = InstrumentSpecs::default();
        specs.insert("NIFTYNXT", InstrumentSpec::new(25, 48, 100));
        let (name, spec) = specs.for_trading_symbol("NIFTYNXT5024MAR...").unwrap();
        assert_eq!(name, "NIFTYNXT");
        assert_eq!(spec.lot_size, 25);
        let (name, _) = specs.for_trading_symbol("nifty24mar22000ce").unwrap();
        assert_eq!(name, "NIFTY");
        assert_eq!(specs.for_trading_symbol("RELIANCE24MARFUT"), None);
    }
}
