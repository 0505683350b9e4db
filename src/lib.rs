//! # steadfast
//!
//! Backend of a trading front-end for Indian index options: a proxy over the
//! Flattrade, Shoonya and Kotak Neo APIs plus an in-memory paper broker,
//! option-chain lookup from the brokers' instrument masters, freeze-limit
//! aware order placement and a stoploss / target loop.
//!
//! ## Quick Start
//!
//! ```no_run
//! use steadfast::config::ServerConfig;
//! use steadfast::server::{AppState, router};
//!
//! #[tokio::main]
//! async fn main() -> steadfast::Result<()> {
//!     let config = ServerConfig::from_env();
//!     let state = AppState::new(&config)?;
//!     let app = router(state, &config.cors_origins);
//!     let listener = tokio::net::TcpListener::bind(config.socket_addr()?).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod instruments;
pub mod orders;
pub mod risk;
pub mod server;
pub mod session;
pub mod types;

/// Re-export the error type and Result alias.
pub use error::{Result, SteadfastError};
