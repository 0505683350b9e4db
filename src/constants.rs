//! Constants for the supported broker APIs.
//!
//! Contains base URLs, instrument file locations, request timeouts, and the
//! handful of numeric quirks (epoch offsets, price buffers) the brokers need.

// ---------------------------------------------------------------------------
// Base URLs
// ---------------------------------------------------------------------------

/// Flattrade PiConnect REST endpoint (Noren dialect).
pub const FLATTRADE_BASE_URL: &str = "https://piconnect.flattrade.in/PiConnectTP";

/// Flattrade token exchange endpoint.
pub const FLATTRADE_AUTH_URL: &str = "https://authapi.flattrade.in/trade/apitoken";

/// Shoonya (Finvasia) REST endpoint (Noren dialect).
pub const SHOONYA_BASE_URL: &str = "https://api.shoonya.com/NorenWClientTP";

/// Kotak Neo login host for the two-step TOTP + MPIN flow.
pub const KOTAK_LOGIN_BASE_URL: &str = "https://mis.kotaksecurities.com/login/1.0";

/// Kotak Neo trading host used when the session carries no base URL.
pub const KOTAK_DEFAULT_BASE_URL: &str = "https://napi.kotaksecurities.com";

/// Path prefix for the v2 order API on `napi` / `cnapi` hosts.
pub const KOTAK_V2_PATH_PREFIX: &str = "/Orders/2.0";

/// Value of the `neo-fin-key` header on every Kotak call.
pub const KOTAK_NEO_FIN_KEY: &str = "neotradeapi";

/// User agent the Kotak gateway expects.
pub const KOTAK_USER_AGENT: &str = "NeoTradeApi-python/1.1.0";

/// Browser user agent used for Kotak scrip master downloads.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

// ---------------------------------------------------------------------------
// Instrument files
// ---------------------------------------------------------------------------

/// Instrument master files published by the brokers.
pub mod instrument_files {
    /// Flattrade NFO index derivatives.
    pub const FLATTRADE_NFO_URL: &str =
        "https://flattrade.s3.ap-south-1.amazonaws.com/scripmaster/Nfo_Index_Derivatives.csv";
    /// Flattrade BFO index derivatives.
    pub const FLATTRADE_BFO_URL: &str =
        "https://flattrade.s3.ap-south-1.amazonaws.com/scripmaster/Bfo_Index_Derivatives.csv";
    /// Shoonya NFO symbols (zipped text).
    pub const SHOONYA_NFO_URL: &str = "https://api.shoonya.com/NFO_symbols.txt.zip";
    /// Shoonya BFO symbols (zipped text).
    pub const SHOONYA_BFO_URL: &str = "https://api.shoonya.com/BFO_symbols.txt.zip";
    /// Kotak scrip master; `{date}` and `{segment}` are substituted.
    pub const KOTAK_SCRIP_MASTER_URL: &str =
        "https://lapi.kotaksecurities.com/wso2-scripmaster/v1/prod/{date}/transformed/{segment}.csv";

    /// Files published before this UTC time of day are stale (07:00 IST).
    pub const REFRESH_HOUR_UTC: u32 = 1;
    /// Minute component of the daily refresh time.
    pub const REFRESH_MINUTE_UTC: u32 = 30;
}

/// Seconds Kotak subtracts from `nse_fo` / `cde_fo` expiry epochs.
pub const KOTAK_NSE_EPOCH_OFFSET: i64 = 315_511_200;

// ---------------------------------------------------------------------------
// Request behaviour
// ---------------------------------------------------------------------------

/// Per-call HTTP timeout.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Retries after the first attempt for transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// First backoff delay; doubled after each failed attempt.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Lifetime of a cached symbol lookup.
pub const SYMBOL_CACHE_TTL_SECS: u64 = 4 * 60 * 60;

/// Points between trigger and limit price on stoploss-limit orders.
pub const STOPLOSS_LIMIT_BUFFER: f64 = 2.0;

/// Websocket bridge ports announced by `/set-broker`.
pub mod websocket_ports {
    /// Flattrade feed bridge.
    pub const FLATTRADE: u16 = 8765;
    /// Shoonya feed bridge.
    pub const SHOONYA: u16 = 8766;
    /// Kotak Neo feed bridge.
    pub const KOTAK_NEO: u16 = 8767;
}

// ---------------------------------------------------------------------------
// Risk defaults
// ---------------------------------------------------------------------------

/// Stoploss distance used when the configured one is missing or invalid.
pub const DEFAULT_STOPLOSS_DISTANCE: f64 = 10.0;

/// Target distance used when the configured one is missing or invalid.
pub const DEFAULT_TARGET_DISTANCE: f64 = 50.0;

/// Step applied by manual stoploss / target nudges.
pub const THRESHOLD_NUDGE: f64 = 0.5;

/// Wait after a fill before reading the position back to arm its thresholds.
pub const POSITION_SETTLE_SECS: u64 = 4;
