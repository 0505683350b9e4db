//! Server configuration loaded from the environment.
//!
//! Every setting has a default, so an empty environment yields a working
//! local server. A `.env` file in the working directory is read first.
//!
//! | Variable | Default |
//! |---|---|
//! | `STEADFAST_HOST` | `127.0.0.1` |
//! | `STEADFAST_PORT` | `3000` |
//! | `STEADFAST_SYMBOLS_DIR` | `./symbols` |
//! | `STEADFAST_CORS_ORIGINS` | any origin |
//! | `STEADFAST_HTTP_TIMEOUT_SECS` | `30` |
//! | `STEADFAST_MAX_RETRIES` | `2` |
//! | `STEADFAST_RETRY_DELAY_MS` | `1000` |
//! | `STEADFAST_SYMBOL_CACHE_SECS` | `14400` |
//! | `STEADFAST_POSITION_POLL_SECS` | `5` |
//! | `STEADFAST_PAPER_TRADING` | `false` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::client::RetryPolicy;
use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, HTTP_TIMEOUT_SECS, SYMBOL_CACHE_TTL_SECS,
};
use crate::error::{Result, SteadfastError};

/// Runtime settings for the proxy server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding the instrument master files.
    pub symbols_dir: PathBuf,
    /// Allowed CORS origins; empty means any origin.
    pub cors_origins: Vec<String>,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
    pub symbol_cache_ttl: Duration,
    /// How often the risk monitor refreshes positions.
    pub position_poll_interval: Duration,
    /// Route every order to the in-memory paper broker.
    pub paper_trading: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            symbols_dir: PathBuf::from("./symbols"),
            cors_origins: Vec::new(),
            http_timeout: Duration::from_secs(HTTP_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            symbol_cache_ttl: Duration::from_secs(SYMBOL_CACHE_TTL_SECS),
            position_poll_interval: Duration::from_secs(5),
            paper_trading: false,
        }
    }
}

impl ServerConfig {
    /// Load from the process environment after reading `.env`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup. Unparseable values fall back to
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            host: parse("STEADFAST_HOST").unwrap_or(defaults.host),
            port: parsed(&parse, "STEADFAST_PORT").unwrap_or(defaults.port),
            symbols_dir: parse("STEADFAST_SYMBOLS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.symbols_dir),
            cors_origins: parse("STEADFAST_CORS_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty() && *o != "*")
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            http_timeout: Duration::from_secs(
                parsed(&parse, "STEADFAST_HTTP_TIMEOUT_SECS").unwrap_or(HTTP_TIMEOUT_SECS),
            ),
            retry: RetryPolicy {
                max_retries: parsed(&parse, "STEADFAST_MAX_RETRIES").unwrap_or(DEFAULT_MAX_RETRIES),
                initial_delay: Duration::from_millis(
                    parsed(&parse, "STEADFAST_RETRY_DELAY_MS").unwrap_or(DEFAULT_RETRY_DELAY_MS),
                ),
            },
            symbol_cache_ttl: Duration::from_secs(
                parsed(&parse, "STEADFAST_SYMBOL_CACHE_SECS").unwrap_or(SYMBOL_CACHE_TTL_SECS),
            ),
            position_poll_interval: Duration::from_secs(
                parsed::<u64>(&parse, "STEADFAST_POSITION_POLL_SECS")
                    .filter(|s| *s > 0)
                    .unwrap_or(5),
            ),
            paper_trading: parse("STEADFAST_PAPER_TRADING")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    /// Socket address to bind.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| SteadfastError::InvalidArgument(format!("bad listen address: {e}")))
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(load(&[]), ServerConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = load(&[
            ("STEADFAST_PORT", "4000"),
            ("STEADFAST_CORS_ORIGINS", "http://localhost:5173, http://127.0.0.1:5173"),
            ("STEADFAST_MAX_RETRIES", "0"),
            ("STEADFAST_PAPER_TRADING", "TRUE"),
        ]);
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.cors_origins.len(), 2);
        assert_eq!(cfg.retry.max_retries, 0);
        assert!(cfg.paper_trading);
        assert_eq!(cfg.socket_addr().unwrap().port(), 4000);
    }

    #[test]
    fn garbage_falls_back() {
        let cfg = load(&[("STEADFAST_PORT", "http"), ("STEADFAST_POSITION_POLL_SECS", "0")]);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.position_poll_interval, Duration::from_secs(5));
    }
}
