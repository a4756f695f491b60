//! # cosign-api: authenticated client for the ledger service.
//!
//! - [`config`]: `ApiConfig` with defaults and `COSIGN_*` environment overrides
//! - [`signing`]: Content-MD5, RFC 1123 dates and HMAC request signatures
//! - [`response`]: HTTP status to `LedgerError` mapping
//! - [`client`]: blocking `HttpLedgerClient` implementing `LedgerService`

pub mod client;
pub mod config;
pub mod response;
pub mod signing;

pub use client::HttpLedgerClient;
pub use config::{ApiConfig, ConfigError};
pub use signing::{RequestSigner, SignedHeader};
