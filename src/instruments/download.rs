//! Daily refresh of instrument master files.
//!
//! Brokers publish new masters every morning. A local copy is stale when it
//! is missing or was written before 01:30 UTC (07:00 IST) today.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, NaiveTime, Utc};
use futures_util::future::join_all;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use super::columns::IST_OFFSET_SECS;
use crate::api::KotakAdapter;
use crate::client::BrokerHttp;
use crate::constants::instrument_files::*;
use crate::error::SteadfastError;
use crate::types::auth::Credentials;
use crate::types::instruments::InstrumentSource;
use crate::types::{Exchange, KotakSegment};

/// Local file name of a source's master for `exchange`.
pub fn file_name(source: InstrumentSource, exchange: Exchange) -> String {
    let bse = exchange == Exchange::BFO;
    match source {
        InstrumentSource::Kotak => format!("kotak_{}.csv", kotak_segment(exchange).as_str()),
        InstrumentSource::Flattrade if bse => "Bfo_Index_Derivatives.csv".into(),
        InstrumentSource::Flattrade => "Nfo_Index_Derivatives.csv".into(),
        InstrumentSource::Shoonya if bse => "BFO_symbols.txt.zip".into(),
        InstrumentSource::Shoonya => "NFO_symbols.txt.zip".into(),
    }
}

/// Derivatives segment Kotak files an exchange under.
pub fn kotak_segment(exchange: Exchange) -> KotakSegment {
    match exchange {
        Exchange::BFO | Exchange::BSE => KotakSegment::BseFo,
        Exchange::NFO | Exchange::NSE => KotakSegment::NseFo,
    }
}

/// Whether `path` needs downloading again at `now`.
pub fn is_outdated(path: &Path, now: DateTime<Utc>) -> bool {
    let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return true,
    };
    modified_before_cutoff(modified, now)
}

fn modified_before_cutoff(modified: SystemTime, now: DateTime<Utc>) -> bool {
    let cutoff_time = NaiveTime::from_hms_opt(REFRESH_HOUR_UTC, REFRESH_MINUTE_UTC, 0)
        .unwrap_or(NaiveTime::MIN);
    let cutoff = now.date_naive().and_time(cutoff_time).and_utc();
    DateTime::<Utc>::from(modified) < cutoff
}

/// Download the public Flattrade and Shoonya masters that are outdated.
///
/// Failures are logged and leave any existing file in place.
pub async fn refresh_public_files(http: &BrokerHttp, dir: &Path) {
    let now = Utc::now();
    let files = [
        (FLATTRADE_NFO_URL, InstrumentSource::Flattrade, Exchange::NFO),
        (FLATTRADE_BFO_URL, InstrumentSource::Flattrade, Exchange::BFO),
        (SHOONYA_NFO_URL, InstrumentSource::Shoonya, Exchange::NFO),
        (SHOONYA_BFO_URL, InstrumentSource::Shoonya, Exchange::BFO),
    ];

    let downloads = files.into_iter().filter_map(|(url, source, exchange)| {
        let dest = dir.join(file_name(source, exchange));
        if !is_outdated(&dest, now) {
            tracing::debug!(path = %dest.display(), "instrument file up to date");
            return None;
        }
        Some(async move {
            match http.download(url, HeaderMap::new(), &dest).await {
                Ok(bytes) => tracing::info!(path = %dest.display(), bytes, "instrument file downloaded"),
                Err(e) => tracing::error!(%url, error = %e, "instrument file download failed"),
            }
        })
    });
    join_all(downloads).await;
}

/// Scrip master URL for `segment` on `date` (`YYYY-MM-DD`).
pub fn kotak_scrip_master_url(date: &str, segment: KotakSegment) -> String {
    KOTAK_SCRIP_MASTER_URL
        .replace("{date}", date)
        .replace("{segment}", segment.as_str())
}

/// Download the outdated Kotak scrip masters with a Kotak session.
///
/// Returns the files written. Each segment is attempted independently.
pub async fn download_kotak_files(
    http: &BrokerHttp,
    dir: &Path,
    creds: &Credentials,
) -> Vec<PathBuf> {
    let now = Utc::now();
    let date = (now + chrono::Duration::seconds(IST_OFFSET_SECS))
        .format("%Y-%m-%d")
        .to_string();
    let headers = match KotakAdapter::download_headers(creds) {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(error = %e, "cannot build Kotak download headers");
            return Vec::new();
        }
    };

    let mut written = Vec::new();
    for segment in [KotakSegment::NseFo, KotakSegment::BseFo] {
        let dest = dir.join(format!("kotak_{}.csv", segment.as_str()));
        if !is_outdated(&dest, now) {
            continue;
        }
        let url = kotak_scrip_master_url(&date, segment);
        tracing::info!(%url, "downloading Kotak scrip master");
        match http.download(&url, headers.clone(), &dest).await {
            Ok(bytes) => {
                tracing::info!(path = %dest.display(), bytes, "Kotak scrip master downloaded");
                written.push(dest);
            }
            Err(SteadfastError::HttpStatus { status: StatusCode::NOT_FOUND, .. }) => {
                tracing::warn!(%url, "scrip master not published yet (early in the day or a holiday)");
            }
            Err(e) => tracing::error!(%url, error = %e, "Kotak scrip master download failed"),
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn cutoff_is_0130_utc_today() {
        let now = Utc.with_ymd_and_hms(2024, 3, 14, 6, 0, 0).unwrap();
        let at = |h, m| SystemTime::from(Utc.with_ymd_and_hms(2024, 3, 14, h, m, 0).unwrap());
        assert!(modified_before_cutoff(at(1, 29), now));
        assert!(!modified_before_cutoff(at(1, 31), now));
        let yesterday = SystemTime::from(now) - Duration::from_secs(24 * 3600);
        assert!(modified_before_cutoff(yesterday, now));
    }

    #[test]
    fn missing_file_is_outdated() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_outdated(&dir.path().join("nope.csv"), Utc::now()));
        let path = dir.path().join("fresh.csv");
        std::fs::write(&path, "x").unwrap();
        // Written just now; only stale if the test runs before 01:30 UTC.
        let now = Utc::now();
        let before_cutoff = now.time() < NaiveTime::from_hms_opt(1, 30, 0).unwrap();
        assert_eq!(is_outdated(&path, now), before_cutoff);
    }

    #[test]
    fn file_names_and_urls() {
        assert_eq!(file_name(InstrumentSource::Kotak, Exchange::BFO), "kotak_bse_fo.csv");
        assert_eq!(file_name(InstrumentSource::Shoonya, Exchange::NFO), "NFO_symbols.txt.zip");
        assert_eq!(
            kotak_scrip_master_url("2024-03-14", KotakSegment::NseFo),
            "https://lapi.kotaksecurities.com/wso2-scripmaster/v1/prod/2024-03-14/transformed/nse_fo.csv"
        );
    }
}
