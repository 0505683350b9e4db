//! Symbol resolution from broker instrument masters.
//!
//! For an exchange and an underlying, [`SymbolResolver`] reads the first
//! source in priority order (Kotak, Flattrade, Shoonya) that yields matching
//! option rows, and returns its call and put strikes plus the expiries still
//! tradable. Sources are never merged.
//!
//! | Source | File | Layout |
//! |---|---|---|
//! | Kotak | `kotak_{nse_fo,bse_fo}.csv` | epoch expiries, strikes in paise |
//! | Flattrade | `{Nfo,Bfo}_Index_Derivatives.csv` | `DD-MMM-YYYY` expiries |
//! | Shoonya | `{NFO,BFO}_symbols.txt.zip` | zipped CSV text |

pub mod columns;
pub mod download;

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;

use self::columns::{HeaderIndex, IST_OFFSET_SECS, RowLayout};
use crate::client::BrokerHttp;
use crate::error::{Result, SteadfastError};
use crate::session::SessionStore;
use crate::types::instruments::*;
use crate::types::{Broker, Exchange, OptionType};

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Container format of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    /// Zip archive whose `.txt` / `.csv` entries are CSV.
    Zip,
}

/// One instrument master on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub source: InstrumentSource,
    pub path: PathBuf,
    pub format: FileFormat,
    pub layout: RowLayout,
}

impl SourceFile {
    /// The three sources for `exchange` under `dir`, in priority order.
    pub fn for_exchange(dir: &Path, exchange: Exchange) -> Vec<SourceFile> {
        let file = |source| dir.join(download::file_name(source, exchange));
        vec![
            SourceFile {
                source: InstrumentSource::Kotak,
                path: file(InstrumentSource::Kotak),
                format: FileFormat::Csv,
                layout: RowLayout::Kotak(download::kotak_segment(exchange)),
            },
            SourceFile {
                source: InstrumentSource::Flattrade,
                path: file(InstrumentSource::Flattrade),
                format: FileFormat::Csv,
                layout: RowLayout::Broker,
            },
            SourceFile {
                source: InstrumentSource::Shoonya,
                path: file(InstrumentSource::Shoonya),
                format: FileFormat::Zip,
                layout: RowLayout::Broker,
            },
        ]
    }

    /// Rows of this file whose underlying is `symbol`.
    pub fn read_matching(&self, symbol: &str) -> Result<Vec<InstrumentRow>> {
        let symbol = symbol.trim().to_ascii_uppercase();
        let file = File::open(&self.path)?;
        match self.format {
            FileFormat::Csv => self.read_csv(BufReader::new(file), &symbol),
            FileFormat::Zip => {
                let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
                let mut rows = Vec::new();
                for i in 0..archive.len() {
                    let entry = archive.by_index(i)?;
                    let name = entry.name().to_ascii_lowercase();
                    if name.ends_with(".txt") || name.ends_with(".csv") {
                        rows.extend(self.read_csv(entry, &symbol)?);
                    }
                }
                Ok(rows)
            }
        }
    }

    fn read_csv<R: Read>(&self, reader: R, symbol: &str) -> Result<Vec<InstrumentRow>> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);
        let index = HeaderIndex::new(reader.headers()?);
        let mut rows = Vec::new();
        let mut dropped = 0usize;
        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(_) => {
                    dropped += 1;
                    continue;
                }
            };
            match self.layout.decode(&index.row(&record)) {
                Some(row) if self.matches(&row, symbol) => rows.push(row),
                Some(_) => {}
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            tracing::debug!(path = %self.path.display(), dropped, "skipped malformed instrument rows");
        }
        Ok(rows)
    }

    /// Underlying equals `symbol` (or Kotak's `"<SYM> 50"`); rows without an
    /// underlying fall back to a trading-symbol prefix match.
    fn matches(&self, row: &InstrumentRow, symbol: &str) -> bool {
        let underlying = row.underlying_symbol.trim().to_ascii_uppercase();
        if underlying.is_empty() {
            return row.trading_symbol.to_ascii_uppercase().starts_with(symbol);
        }
        underlying == symbol
            || (matches!(self.layout, RowLayout::Kotak(_)) && underlying == format!("{symbol} 50"))
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve `symbol` from the first source with matching rows.
///
/// A missing or unreadable source falls through to the next one. Expiries
/// before `today` are left out; strikes are kept for every matched row.
pub fn resolve_from_sources(
    sources: &[SourceFile],
    symbol: &str,
    today: NaiveDate,
) -> Result<SymbolsResponse> {
    for source in sources {
        if !source.path.exists() {
            tracing::warn!(path = %source.path.display(), source = ?source.source, "instrument file missing");
            continue;
        }
        let rows = match source.read_matching(symbol) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(path = %source.path.display(), error = %e, "failed to read instrument file");
                continue;
            }
        };
        if rows.is_empty() {
            tracing::warn!(path = %source.path.display(), %symbol, "no matching rows, trying next source");
            continue;
        }
        tracing::info!(source = ?source.source, %symbol, rows = rows.len(), "resolved symbols");
        return Ok(build_response(&rows, source.source, today));
    }
    Err(SteadfastError::NotFound(format!(
        "symbol file not found or empty for {symbol}"
    )))
}

fn build_response(rows: &[InstrumentRow], source: InstrumentSource, today: NaiveDate) -> SymbolsResponse {
    let mut calls: Vec<&InstrumentRow> = Vec::new();
    let mut puts: Vec<&InstrumentRow> = Vec::new();
    for row in rows {
        match row.option_type {
            OptionType::Call => calls.push(row),
            OptionType::Put => puts.push(row),
        }
    }
    let by_strike = |a: &&InstrumentRow, b: &&InstrumentRow| a.strike_price.total_cmp(&b.strike_price);
    calls.sort_by(by_strike);
    puts.sort_by(by_strike);

    let expiries: BTreeSet<NaiveDate> = rows
        .iter()
        .map(|r| r.expiry_date)
        .filter(|d| *d >= today)
        .collect();

    SymbolsResponse {
        call_strikes: calls.into_iter().map(StrikeData::from).collect(),
        put_strikes: puts.into_iter().map(StrikeData::from).collect(),
        expiry_dates: expiries.into_iter().map(format_expiry).collect(),
        source,
    }
}

/// Today's date in IST.
pub fn today_ist() -> NaiveDate {
    (Utc::now() + chrono::Duration::seconds(IST_OFFSET_SECS)).date_naive()
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

type CacheKey = (Exchange, String);

/// Cached symbol lookups over a directory of instrument masters.
#[derive(Debug)]
pub struct SymbolResolver {
    dir: PathBuf,
    ttl: Duration,
    http: BrokerHttp,
    sessions: Arc<SessionStore>,
    cache: RwLock<HashMap<CacheKey, (Instant, Arc<SymbolsResponse>)>>,
}

impl SymbolResolver {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration, http: BrokerHttp, sessions: Arc<SessionStore>) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            http,
            sessions,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Strikes and expiries for `symbol` on `exchange`.
    pub async fn resolve(&self, exchange: Exchange, symbol: &str) -> Result<Arc<SymbolsResponse>> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(SteadfastError::InvalidArgument("masterSymbol is required".into()));
        }
        let key = (exchange, symbol.clone());
        if let Some((at, hit)) = self.cache.read().await.get(&key) {
            if at.elapsed() < self.ttl {
                return Ok(Arc::clone(hit));
            }
        }

        let sources = SourceFile::for_exchange(&self.dir, exchange);
        self.refresh_kotak_if_outdated(&sources[0].path).await;

        let today = today_ist();
        let lookup = symbol.clone();
        let resolved = tokio::task::spawn_blocking(move || resolve_from_sources(&sources, &lookup, today))
            .await
            .map_err(|e| SteadfastError::Io(std::io::Error::other(e)))??;

        let resolved = Arc::new(resolved);
        let mut cache = self.cache.write().await;
        cache.retain(|_, (at, _)| at.elapsed() < self.ttl);
        cache.insert(key, (Instant::now(), Arc::clone(&resolved)));
        Ok(resolved)
    }

    /// Drop every cached lookup.
    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    async fn refresh_kotak_if_outdated(&self, kotak_file: &Path) {
        if !download::is_outdated(kotak_file, Utc::now()) {
            return;
        }
        match self.sessions.get(Broker::KotakNeo).await {
            Some(creds) if creds.has_session() => {
                download::download_kotak_files(&self.http, &self.dir, &creds).await;
            }
            _ => tracing::warn!("Kotak session missing, skipping scrip master download"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_lookups_are_evicted_on_insert() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Nfo_Index_Derivatives.csv"),
            "Exchange,Token,Lotsize,Symbol,Tradingsymbol,Expiry,Instrument,Optiontype,Strike\n\
             NFO,1,75,NIFTY,NIFTY15MAR24C22000,15-MAR-2024,OPTIDX,CE,22000\n\
             NFO,2,35,BANKNIFTY,BANKNIFTY15MAR24C47000,15-MAR-2024,OPTIDX,CE,47000\n",
        )
        .unwrap();
        let resolver = SymbolResolver::new(
            dir.path(),
            Duration::from_millis(100),
            BrokerHttp::new().unwrap(),
            Arc::new(SessionStore::new()),
        );

        resolver.resolve(Exchange::NFO, "NIFTY").await.unwrap();
        assert_eq!(resolver.cache.read().await.len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        resolver.resolve(Exchange::NFO, "BANKNIFTY").await.unwrap();
        let cache = resolver.cache.read().await;
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key(&(Exchange::NFO, "BANKNIFTY".to_string())));
    }
}
