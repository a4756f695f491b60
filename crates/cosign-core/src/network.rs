//! Network selector and the version bytes that depend on it.
//!
//! Mainnet and testnet differ only in the version bytes used for addresses
//! and extended keys, and in the network code the ledger service expects in
//! its URL (`BTC` / `tBTC`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Main network (P2SH addresses start with `3`).
    Mainnet,
    /// Test network (P2SH addresses start with `2`).
    Testnet,
}

impl Network {
    /// Version byte for pay-to-script-hash addresses.
    pub fn p2sh_version(&self) -> u8 {
        match self {
            Network::Mainnet => 0x05,
            Network::Testnet => 0xc4,
        }
    }

    /// Version byte for pay-to-pubkey-hash addresses.
    pub fn p2pkh_version(&self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet => 0x6f,
        }
    }

    /// BIP32 version prefix for extended private keys (`xprv` / `tprv`).
    pub fn xprv_version(&self) -> [u8; 4] {
        match self {
            Network::Mainnet => [0x04, 0x88, 0xAD, 0xE4],
            Network::Testnet => [0x04, 0x35, 0x83, 0x94],
        }
    }

    /// BIP32 version prefix for extended public keys (`xpub` / `tpub`).
    pub fn xpub_version(&self) -> [u8; 4] {
        match self {
            Network::Mainnet => [0x04, 0x88, 0xB2, 0x1E],
            Network::Testnet => [0x04, 0x35, 0x87, 0xCF],
        }
    }

    /// Network code used in ledger service URLs.
    pub fn api_code(&self) -> &'static str {
        match self {
            Network::Mainnet => "BTC",
            Network::Testnet => "tBTC",
        }
    }

    /// Whether this is the test network.
    pub fn is_testnet(&self) -> bool {
        matches!(self, Network::Testnet)
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => f.write_str("mainnet"),
            Network::Testnet => f.write_str("testnet"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "btc" => Ok(Network::Mainnet),
            "testnet" | "test" | "tbtc" => Ok(Network::Testnet),
            other => Err(format!("unknown network: {other}")),
        }
    }
}
