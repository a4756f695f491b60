//! Ledger service client configuration.
//!
//! Values come from [`ApiConfig::default`], builder-style overrides, or the
//! `COSIGN_*` environment variables read by [`ApiConfig::from_env`].

use std::fmt;
use std::time::Duration;

use cosign_core::network::Network;
use thiserror::Error;

/// Service host used when no endpoint override is configured.
pub const DEFAULT_API_HOST: &str = "https://api.blocktrail.com";

/// API version path segment.
pub const DEFAULT_API_VERSION: &str = "v1";

/// Per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("cosign-sdk-rust/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Connection settings for [`HttpLedgerClient`](crate::client::HttpLedgerClient).
#[derive(Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub api_secret: String,
    pub network: Network,
    pub api_version: String,
    /// Full base URL; overrides host, version and network when set.
    pub api_endpoint: Option<String>,
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            network: Network::Mainnet,
            api_version: DEFAULT_API_VERSION.to_string(),
            api_endpoint: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ApiConfig {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            ..Self::default()
        }
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL all request paths are appended to, without a trailing slash.
    pub fn endpoint(&self) -> String {
        match &self.api_endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!(
                "{DEFAULT_API_HOST}/{}/{}",
                self.api_version,
                self.network.api_code()
            ),
        }
    }

    /// Load from `COSIGN_API_KEY`, `COSIGN_API_SECRET` and the optional
    /// `COSIGN_NETWORK`, `COSIGN_API_ENDPOINT`, `COSIGN_API_VERSION`,
    /// `COSIGN_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::new(
            lookup("COSIGN_API_KEY").ok_or(ConfigError::MissingVar("COSIGN_API_KEY"))?,
            lookup("COSIGN_API_SECRET").ok_or(ConfigError::MissingVar("COSIGN_API_SECRET"))?,
        );
        if let Some(value) = lookup("COSIGN_NETWORK") {
            config.network = value.parse().map_err(|_| ConfigError::InvalidValue {
                var: "COSIGN_NETWORK",
                value,
            })?;
        }
        if let Some(value) = lookup("COSIGN_API_VERSION") {
            config.api_version = value;
        }
        config.api_endpoint = lookup("COSIGN_API_ENDPOINT");
        if let Some(value) = lookup("COSIGN_TIMEOUT_SECS") {
            let secs: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
                var: "COSIGN_TIMEOUT_SECS",
                value,
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("network", &self.network)
            .field("endpoint", &self.endpoint())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn default_endpoint_per_network() {
        let config = ApiConfig::new("k", "s");
        assert_eq!(config.endpoint(), "https://api.blocktrail.com/v1/BTC");
        let config = config.with_network(Network::Testnet);
        assert_eq!(config.endpoint(), "https://api.blocktrail.com/v1/tBTC");
    }

    #[test]
    fn endpoint_override_wins() {
        let config = ApiConfig::new("k", "s")
            .with_network(Network::Testnet)
            .with_endpoint("http://localhost:3000/api/");
        assert_eq!(config.endpoint(), "http://localhost:3000/api");
    }

    #[test]
    fn from_lookup_requires_credentials() {
        assert_eq!(
            ApiConfig::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::MissingVar("COSIGN_API_KEY")
        );
        assert_eq!(
            ApiConfig::from_lookup(lookup(&[("COSIGN_API_KEY", "k")])).unwrap_err(),
            ConfigError::MissingVar("COSIGN_API_SECRET")
        );
    }

    #[test]
    fn from_lookup_reads_overrides() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("COSIGN_API_KEY", "key"),
            ("COSIGN_API_SECRET", "secret"),
            ("COSIGN_NETWORK", "testnet"),
            ("COSIGN_API_VERSION", "v2"),
            ("COSIGN_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.endpoint(), "https://api.blocktrail.com/v2/tBTC");
    }

    #[test]
    fn from_lookup_rejects_bad_values() {
        let err = ApiConfig::from_lookup(lookup(&[
            ("COSIGN_API_KEY", "key"),
            ("COSIGN_API_SECRET", "secret"),
            ("COSIGN_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "COSIGN_TIMEOUT_SECS", .. }));
    }

    #[test]
    fn debug_hides_secret() {
        let debug = format!("{:?}", ApiConfig::new("key", "hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
