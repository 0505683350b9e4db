//! Error types for the `steadfast` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, SteadfastError>`.
//!
//! [`SteadfastError`] covers:
//! - **Broker errors**: Structured rejections (`stat: Not_Ok`) from a broker API
//! - **HTTP status errors**: Unexpected status codes with response body
//! - **HTTP transport errors**: Network, TLS, timeout failures
//! - **Parse errors**: JSON, CSV and zip archive failures
//! - **Session errors**: Missing credentials or a rejected session
//! - **Invalid arguments**: Client-side validation errors

use crate::types::Broker;

/// All possible errors produced by `steadfast`.
#[derive(Debug, thiserror::Error)]
pub enum SteadfastError {
    /// A broker accepted the request but rejected it at the business level.
    #[error("{broker} rejected the request: {message}")]
    Api {
        /// Which broker produced the rejection.
        broker: Broker,
        /// The broker's own error message (`emsg`, `errMsg`, ...).
        message: String,
    },

    /// The server returned an unexpected HTTP status code.
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// The HTTP status code.
        status: reqwest::StatusCode,
        /// The response body text.
        body: String,
    },

    /// A network or transport-level error from `reqwest`.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to deserialize a JSON body.
    #[error("JSON deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to read a delimited instrument file.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Failed to open a compressed instrument file.
    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Filesystem error while reading or writing instrument files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error building or parsing a URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The broker rejected the session (expired token, HTML login page, ...).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// No session is stored for the broker.
    #[error("no credentials stored for {0}")]
    MissingCredentials(Broker),

    /// The requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Seller mode could not find a hedge strike and the policy blocks the order.
    #[error("hedge unavailable: {0}")]
    HedgeUnavailable(String),

    /// The caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl SteadfastError {
    /// Whether a failed broker call may be retried.
    ///
    /// Timeouts, connection failures and 5xx responses are transient. Client
    /// errors (4xx), broker rejections and parse failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            Self::HttpStatus { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SteadfastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        let err = SteadfastError::HttpStatus {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert!(err.is_retryable());

        // Cloudflare origin timeout
        let err = SteadfastError::HttpStatus {
            status: reqwest::StatusCode::from_u16(522).unwrap(),
            body: String::new(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let err = SteadfastError::HttpStatus {
            status: reqwest::StatusCode::BAD_REQUEST,
            body: "bad".into(),
        };
        assert!(!err.is_retryable());
        assert!(!SteadfastError::Unauthorized("html".into()).is_retryable());
        assert!(
            !SteadfastError::Api {
                broker: Broker::Shoonya,
                message: "RMS".into()
            }
            .is_retryable()
        );
    }
}
