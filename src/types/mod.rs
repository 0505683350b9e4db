//! Request and response types shared by every broker.
//!
//! Each broker speaks its own dialect; adapters in [`crate::api`] translate
//! to and from the canonical records defined here.
//!
//! ## Organization
//!
//! - [`enums`]: Brokers, exchanges, order / product / status enums
//! - [`mapping`]: Alias tables from broker field names to canonical fields
//! - [`orders`]: Order requests, order book and trade book
//! - [`portfolio`]: Positions
//! - [`funds`]: Fund limits
//! - [`instruments`]: Instrument rows and symbol lookup results
//! - [`auth`]: Session credentials and login requests
//!
//! All enums are re-exported at the module root via `pub use enums::*`.

pub mod auth;
pub mod enums;
pub mod funds;
pub mod instruments;
pub mod mapping;
pub mod orders;
pub mod portfolio;

pub use enums::*;

/// Round to 2 decimal places (paise).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
