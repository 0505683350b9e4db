//! Symbol resolution over instrument files written to a temp directory.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use steadfast::SteadfastError;
use steadfast::client::BrokerHttp;
use steadfast::instruments::columns::{decode_kotak_expiry, encode_kotak_expiry};
use steadfast::instruments::{SourceFile, SymbolResolver, resolve_from_sources};
use steadfast::session::SessionStore;
use steadfast::types::instruments::InstrumentSource;
use steadfast::types::{Exchange, KotakSegment};
use zip::write::SimpleFileOptions;

const SHOONYA_HEADER: &str = "Exchange,Token,LotSize,Symbol,TradingSymbol,Expiry,Instrument,OptionType,StrikePrice,TickSize,";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

fn write_zip(path: &Path, entry: &str, body: &str) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    zip.start_file(entry, SimpleFileOptions::default()).unwrap();
    zip.write_all(body.as_bytes()).unwrap();
    zip.finish().unwrap();
}

fn shoonya_nfo(dir: &Path) {
    let rows = [
        "NFO,43001,75,NIFTY,NIFTY15MAR24C22100,15-MAR-2024,OPTIDX,CE,22100,0.05,",
        "NFO,43002,75,NIFTY,NIFTY15MAR24C22000,15-MAR-2024,OPTIDX,CE,22000,0.05,",
        "NFO,43003,75,NIFTY,NIFTY15FEB24C21900,15-FEB-2024,OPTIDX,CE,21900,0.05,",
        "NFO,43004,75,NIFTY,NIFTY15MAR24P22000,15-MAR-2024,OPTIDX,PE,22000,0.05,",
        "NFO,43005,75,NIFTY,NIFTY28MAR24P21800,28-MAR-2024,OPTIDX,PE,21800,0.05,",
        "NFO,43006,35,BANKNIFTY,BANKNIFTY15MAR24C47000,15-MAR-2024,OPTIDX,CE,47000,0.05,",
        "NFO,43007,75,NIFTY,NIFTY28MAR24F,28-MAR-2024,FUTIDX,XX,0,0.05,",
        "NFO,43008,25,NIFTYNXT50,NIFTYNXT5015MAR24C60000,15-MAR-2024,OPTIDX,CE,60000,0.05,",
    ];
    let body = format!("{SHOONYA_HEADER}\n{}\n", rows.join("\n"));
    write_zip(&dir.join("NFO_symbols.txt.zip"), "NFO_symbols.txt", &body);
}

#[test]
fn falls_through_to_the_first_source_with_rows() {
    let dir = tempfile::tempdir().unwrap();
    shoonya_nfo(dir.path());
    // Flattrade file exists but has no NIFTY options.
    std::fs::write(
        dir.path().join("Nfo_Index_Derivatives.csv"),
        "Exchange,Token,Lotsize,Symbol,Tradingsymbol,Expiry,Instrument,Optiontype,Strike\n\
         NFO,1,35,BANKNIFTY,BANKNIFTY15MAR24C47000,15-MAR-2024,OPTIDX,CE,47000\n",
    )
    .unwrap();

    let sources = SourceFile::for_exchange(dir.path(), Exchange::NFO);
    let resolved = resolve_from_sources(&sources, "nifty", today()).unwrap();

    assert_eq!(resolved.source, InstrumentSource::Shoonya);
    let calls: Vec<f64> = resolved.call_strikes.iter().map(|s| s.strike_price).collect();
    let puts: Vec<f64> = resolved.put_strikes.iter().map(|s| s.strike_price).collect();
    assert_eq!(calls, vec![21900.0, 22000.0, 22100.0]);
    assert_eq!(puts, vec![21800.0, 22000.0]);
    assert_eq!(resolved.expiry_dates, vec!["15-MAR-2024", "28-MAR-2024"]);
    assert_eq!(resolved.call_strikes[1].security_id, "43002");
    assert_eq!(resolved.call_strikes[1].lot_size, 75);
}

#[test]
fn only_the_last_source_present() {
    let dir = tempfile::tempdir().unwrap();
    shoonya_nfo(dir.path());

    let sources = SourceFile::for_exchange(dir.path(), Exchange::NFO);
    let resolved = resolve_from_sources(&sources, "NIFTY", today()).unwrap();

    assert_eq!(resolved.source, InstrumentSource::Shoonya);
    assert_eq!(resolved.call_strikes.len() + resolved.put_strikes.len(), 5);
    assert!(resolved.call_strikes.windows(2).all(|w| w[0].strike_price <= w[1].strike_price));
    assert!(resolved.put_strikes.windows(2).all(|w| w[0].strike_price <= w[1].strike_price));
    assert!(!resolved.expiry_dates.contains(&"15-FEB-2024".to_string()));
}

#[test]
fn kotak_file_takes_priority() {
    let dir = tempfile::tempdir().unwrap();
    shoonya_nfo(dir.path());
    let expiry = encode_kotak_expiry(NaiveDate::from_ymd_opt(2024, 3, 14).unwrap(), KotakSegment::NseFo);
    std::fs::write(
        dir.path().join("kotak_nse_fo.csv"),
        format!(
            "pSymbol,pExchSeg,pTrdSymbol,lLotSize,lExpiryDate ,dStrikePrice;,pOptionType,pSymbolName\n\
             53001,nse_fo,NIFTY24MAR22000CE,75,{expiry},2200000,CE,NIFTY\n"
        ),
    )
    .unwrap();

    let sources = SourceFile::for_exchange(dir.path(), Exchange::NFO);
    let resolved = resolve_from_sources(&sources, "NIFTY", today()).unwrap();
    assert_eq!(resolved.source, InstrumentSource::Kotak);
    assert_eq!(resolved.call_strikes.len(), 1);
    assert!(resolved.put_strikes.is_empty());
    assert_eq!(resolved.call_strikes[0].strike_price, 22000.0);
    assert_eq!(resolved.expiry_dates, vec!["14-MAR-2024"]);
}

#[test]
fn no_source_with_rows_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    shoonya_nfo(dir.path());
    let sources = SourceFile::for_exchange(dir.path(), Exchange::NFO);
    let err = resolve_from_sources(&sources, "FINNIFTY", today()).unwrap_err();
    assert!(matches!(err, SteadfastError::NotFound(_)));

    let empty = tempfile::tempdir().unwrap();
    let sources = SourceFile::for_exchange(empty.path(), Exchange::BFO);
    assert!(resolve_from_sources(&sources, "SENSEX", today()).is_err());
}

#[test]
fn kotak_expiry_epochs_round_trip() {
    let date = NaiveDate::from_ymd_opt(2024, 3, 28).unwrap();
    for segment in [KotakSegment::NseFo, KotakSegment::BseFo] {
        let epoch = encode_kotak_expiry(date, segment);
        assert_eq!(decode_kotak_expiry(epoch, segment), Some(date));
    }
    // The two segments disagree on the epoch for the same day.
    assert_ne!(
        encode_kotak_expiry(date, KotakSegment::NseFo),
        encode_kotak_expiry(date, KotakSegment::BseFo)
    );
}

fn flattrade_nfo(dir: &Path) {
    std::fs::write(
        dir.join("Nfo_Index_Derivatives.csv"),
        "Exchange,Token,Lotsize,Symbol,Tradingsymbol,Expiry,Instrument,Optiontype,Strike\n\
         NFO,9001,75,NIFTY,NIFTY15MAR24C23000,15-MAR-2024,OPTIDX,CE,23000\n",
    )
    .unwrap();
}

fn resolver(dir: &Path, ttl: Duration) -> SymbolResolver {
    SymbolResolver::new(dir, ttl, BrokerHttp::new().unwrap(), Arc::new(SessionStore::new()))
}

#[tokio::test]
async fn lookups_are_cached_until_the_ttl_runs_out() {
    let dir = tempfile::tempdir().unwrap();
    shoonya_nfo(dir.path());
    let resolver = resolver(dir.path(), Duration::from_millis(300));

    let first = resolver.resolve(Exchange::NFO, "NIFTY").await.unwrap();
    assert_eq!(first.source, InstrumentSource::Shoonya);

    // A higher-priority file appears, but the cached answer still stands.
    flattrade_nfo(dir.path());
    let cached = resolver.resolve(Exchange::NFO, "nifty").await.unwrap();
    assert!(Arc::ptr_eq(&first, &cached));

    tokio::time::sleep(Duration::from_millis(400)).await;
    let fresh = resolver.resolve(Exchange::NFO, "NIFTY").await.unwrap();
    assert_eq!(fresh.source, InstrumentSource::Flattrade);
    assert_eq!(fresh.call_strikes.len(), 1);
    assert_eq!(fresh.call_strikes[0].security_id, "9001");
}

#[tokio::test]
async fn clearing_the_cache_rereads_the_files() {
    let dir = tempfile::tempdir().unwrap();
    shoonya_nfo(dir.path());
    let resolver = resolver(dir.path(), Duration::from_secs(3600));

    let first = resolver.resolve(Exchange::NFO, "NIFTY").await.unwrap();
    assert_eq!(first.source, InstrumentSource::Shoonya);

    flattrade_nfo(dir.path());
    assert_eq!(
        resolver.resolve(Exchange::NFO, "NIFTY").await.unwrap().source,
        InstrumentSource::Shoonya
    );

    resolver.clear_cache().await;
    let fresh = resolver.resolve(Exchange::NFO, "NIFTY").await.unwrap();
    assert_eq!(fresh.source, InstrumentSource::Flattrade);
}
