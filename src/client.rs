//! Core HTTP client shared by every broker adapter.
//!
//! [`BrokerHttp`] wraps [`reqwest::Client`] with a per-call timeout, a
//! [`RetryPolicy`] for transient failures, and uniform response handling:
//! HTML bodies (login pages served by an API gateway) become
//! [`SteadfastError::Unauthorized`], JSON error bodies become
//! [`SteadfastError::Api`], anything else becomes
//! [`SteadfastError::HttpStatus`].
//!
//! Broker-specific request shapes (headers, form bodies, paths) live in the
//! adapters under [`crate::api`].

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;

use crate::constants::{
    BROWSER_USER_AGENT, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS, HTTP_TIMEOUT_SECS,
};
use crate::error::{Result, SteadfastError};
use crate::types::Broker;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled after each further failure.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub const NONE: Self = Self {
        max_retries: 0,
        initial_delay: Duration::ZERO,
    };

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        label,
                        attempt,
                        max = self.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// BrokerHttp
// ---------------------------------------------------------------------------

/// HTTP transport for broker APIs.
///
/// Cheap to clone; the underlying connection pools are shared.
#[derive(Debug, Clone)]
pub struct BrokerHttp {
    http: reqwest::Client,
    /// Same settings but never follows redirects; used for downloads whose
    /// redirect target must be fetched without auth headers.
    no_redirect: reqwest::Client,
    retry: RetryPolicy,
}

impl BrokerHttp {
    /// Build a client with the default timeout and retry policy.
    pub fn new() -> Result<Self> {
        Self::with_settings(Duration::from_secs(HTTP_TIMEOUT_SECS), RetryPolicy::default())
    }

    pub fn with_settings(timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .default_headers(Self::default_headers())
            .timeout(timeout)
            .build()?;
        let no_redirect = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            http,
            no_redirect,
            retry,
        })
    }

    /// Returns a reference to the underlying `reqwest::Client`.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    // -----------------------------------------------------------------------
    // Request execution
    // -----------------------------------------------------------------------

    /// Send a request once and decode the JSON body.
    pub async fn execute(&self, broker: Broker, req: RequestBuilder) -> Result<Value> {
        let req = req.build()?;
        tracing::debug!(%broker, url = %req.url(), method = %req.method(), "request");
        let resp = self.http.execute(req).await?;
        Self::handle_response(broker, resp).await
    }

    /// Send a request, retrying transient failures.
    ///
    /// `build` is called once per attempt since a sent request cannot be
    /// replayed. Only use this for reads; order actions must not be retried.
    pub async fn execute_with_retry<F>(&self, broker: Broker, label: &str, build: F) -> Result<Value>
    where
        F: Fn() -> RequestBuilder,
    {
        let this = self;
        self.retry
            .run(label, move || this.execute(broker, build()))
            .await
    }

    /// Download `url` into `dest`.
    ///
    /// The first request carries `headers` and does not follow redirects. A
    /// redirect is then followed with a bare request, as storage backends
    /// reject the broker's auth headers. A partially written file is removed
    /// on failure.
    pub async fn download(&self, url: &str, headers: HeaderMap, dest: &Path) -> Result<u64> {
        tracing::debug!(%url, dest = %dest.display(), "download");
        let partial = dest.with_extension("part");
        let result = match self.download_inner(url, headers, &partial).await {
            Ok(n) => tokio::fs::rename(&partial, dest).await.map(|_| n).map_err(Into::into),
            Err(e) => Err(e),
        };
        if result.is_err() && tokio::fs::try_exists(&partial).await.unwrap_or(false) {
            if let Err(e) = tokio::fs::remove_file(&partial).await {
                tracing::warn!(path = %partial.display(), error = %e, "failed to remove partial download");
            }
        }
        result
    }

    async fn download_inner(&self, url: &str, headers: HeaderMap, dest: &Path) -> Result<u64> {
        let mut resp = self.no_redirect.get(url).headers(headers).send().await?;

        if resp.status().is_redirection() {
            let location = resp
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| SteadfastError::HttpStatus {
                    status: resp.status(),
                    body: "redirect without Location header".into(),
                })?;
            let target = resp.url().join(location)?;
            tracing::debug!(%target, "following redirect without auth headers");
            resp = self.no_redirect.get(target).send().await?;
        }

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SteadfastError::HttpStatus { status, body });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = resp.bytes().await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    /// Read a response, returning either the JSON body or a `SteadfastError`.
    async fn handle_response(broker: Broker, resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if looks_like_html(&body) {
            let snippet: String = body.chars().take(200).collect();
            tracing::error!(%broker, %status, %snippet, "HTML response instead of JSON");
            return Err(SteadfastError::Unauthorized(format!(
                "{broker} returned an HTML page instead of JSON (likely invalid session)"
            )));
        }

        if status.is_success() {
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&body).map_err(SteadfastError::Json)
        } else {
            Err(parse_error_body(broker, status, &body))
        }
    }
}

/// Map an error body to a structured broker error when it carries a message.
///
/// Server errors always stay [`SteadfastError::HttpStatus`] so they remain
/// retryable; 401/403 become [`SteadfastError::Unauthorized`].
pub(crate) fn parse_error_body(broker: Broker, status: StatusCode, body: &str) -> SteadfastError {
    if status.is_server_error() {
        return SteadfastError::HttpStatus {
            status,
            body: body.to_owned(),
        };
    }
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| error_message(&v));
    match (status, message) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, m) => {
            SteadfastError::Unauthorized(m.unwrap_or_else(|| body.to_owned()))
        }
        (_, Some(message)) => SteadfastError::Api { broker, message },
        _ => SteadfastError::HttpStatus {
            status,
            body: body.to_owned(),
        },
    }
}

/// Error text from the shapes the brokers use: `emsg`, `errMsg`,
/// `message`, `error.message`, `data.message`.
pub(crate) fn error_message(v: &Value) -> Option<String> {
    ["emsg", "errMsg", "message", "error"]
        .iter()
        .find_map(|k| v.get(k).and_then(Value::as_str))
        .or_else(|| v.pointer("/error/message").and_then(Value::as_str))
        .or_else(|| v.pointer("/data/message").and_then(Value::as_str))
        .map(str::to_owned)
}

pub(crate) fn looks_like_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(512).collect::<String>().to_ascii_lowercase();
    head.contains("<!doctype html") || head.contains("<html")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn html_detection() {
        assert!(looks_like_html("<!DOCTYPE html><html><body>login</body></html>"));
        assert!(looks_like_html("\n  <HTML>"));
        assert!(!looks_like_html(r#"{"stat":"Ok"}"#));
    }

    #[test]
    fn error_bodies() {
        let err = parse_error_body(
            Broker::Shoonya,
            StatusCode::BAD_REQUEST,
            r#"{"stat":"Not_Ok","emsg":"Session Expired"}"#,
        );
        assert!(matches!(err, SteadfastError::Api { ref message, .. } if message == "Session Expired"));

        let err = parse_error_body(Broker::KotakNeo, StatusCode::BAD_GATEWAY, r#"{"message":"x"}"#);
        assert!(err.is_retryable());

        let err = parse_error_body(Broker::KotakNeo, StatusCode::UNAUTHORIZED, "nope");
        assert!(matches!(err, SteadfastError::Unauthorized(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_after_budget() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::default();
        let result: Result<()> = policy
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SteadfastError::HttpStatus {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    body: String::new(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = RetryPolicy::default()
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SteadfastError::InvalidArgument("bad".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
