//! Base58check addresses (P2PKH and P2SH).
//!
//! Wallet addresses are always P2SH; payment recipients may be either kind.
//! The version byte carries both the address kind and the network, so an
//! address string alone is enough to recover both.

use ripemd::Ripemd160;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::AddressError;
use crate::keys::PublicKey;
use crate::network::Network;
use crate::script;

/// `RIPEMD160(SHA256(data))`.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let rip = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&rip);
    out
}

/// What an address pays to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// Pay to the hash of a public key.
    PubkeyHash,
    /// Pay to the hash of a redeem script.
    ScriptHash,
}

/// A decoded base58check address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    kind: AddressKind,
    hash: [u8; 20],
}

impl Address {
    /// P2SH address for a redeem script.
    pub fn p2sh(redeem_script: &[u8], network: Network) -> Self {
        Self {
            network,
            kind: AddressKind::ScriptHash,
            hash: hash160(redeem_script),
        }
    }

    /// P2PKH address for a compressed public key.
    pub fn p2pkh(public_key: &PublicKey, network: Network) -> Self {
        Self {
            network,
            kind: AddressKind::PubkeyHash,
            hash: hash160(public_key.as_bytes()),
        }
    }

    /// Network encoded in the version byte.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Address kind encoded in the version byte.
    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    /// The 20-byte hash payload.
    pub fn hash(&self) -> &[u8; 20] {
        &self.hash
    }

    /// Version byte for this address.
    pub fn version(&self) -> u8 {
        match self.kind {
            AddressKind::PubkeyHash => self.network.p2pkh_version(),
            AddressKind::ScriptHash => self.network.p2sh_version(),
        }
    }

    /// Output script that pays to this address.
    pub fn script_pubkey(&self) -> Vec<u8> {
        match self.kind {
            AddressKind::PubkeyHash => script::p2pkh_script_pubkey(&self.hash),
            AddressKind::ScriptHash => script::p2sh_script_pubkey(&self.hash),
        }
    }

    /// Parse and require a specific network.
    pub fn parse_on(s: &str, network: Network) -> Result<Self, AddressError> {
        let address: Address = s.parse()?;
        if address.network != network {
            return Err(AddressError::WrongNetwork {
                address: s.to_string(),
                expected: network.to_string(),
            });
        }
        Ok(address)
    }

    /// Base58check encoding.
    pub fn encode(&self) -> String {
        let mut payload = Vec::with_capacity(21);
        payload.push(self.version());
        payload.extend_from_slice(&self.hash);
        bs58::encode(payload).with_check().into_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let payload = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| AddressError::InvalidEncoding(e.to_string()))?;
        if payload.len() != 21 {
            return Err(AddressError::InvalidLength(payload.len()));
        }
        let version = payload[0];
        let (network, kind) = [Network::Mainnet, Network::Testnet]
            .into_iter()
            .find_map(|n| {
                if version == n.p2sh_version() {
                    Some((n, AddressKind::ScriptHash))
                } else if version == n.p2pkh_version() {
                    Some((n, AddressKind::PubkeyHash))
                } else {
                    None
                }
            })
            .ok_or(AddressError::UnknownVersion(version))?;
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);
        Ok(Self { network, kind, hash })
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash160_of_empty() {
        assert_eq!(hex::encode(hash160(b"")), "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb");
    }

    #[test]
    fn parse_testnet_p2sh() {
        let addr: Address = "2MzyKviSL6pnWxkbHV7ecFRE3hWKfzmT8WS".parse().unwrap();
        assert_eq!(addr.network(), Network::Testnet);
        assert_eq!(addr.kind(), AddressKind::ScriptHash);
        assert_eq!(addr.to_string(), "2MzyKviSL6pnWxkbHV7ecFRE3hWKfzmT8WS");
        assert_eq!(addr.script_pubkey().len(), 23);
    }

    #[test]
    fn parse_mainnet_p2pkh() {
        let addr: Address = "1dice8EMZmqKvrGE4Qc9bUFf9PX3xaYDp".parse().unwrap();
        assert_eq!(addr.network(), Network::Mainnet);
        assert_eq!(addr.kind(), AddressKind::PubkeyHash);
        assert_eq!(addr.script_pubkey().len(), 25);
    }

    #[test]
    fn p2sh_roundtrip_through_text() {
        let addr = Address::p2sh(&[0x52, 0x53, 0xae], Network::Mainnet);
        assert!(addr.to_string().starts_with('3'));
        let back: Address = addr.to_string().parse().unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn wrong_network_rejected() {
        let err =
            Address::parse_on("2MzyKviSL6pnWxkbHV7ecFRE3hWKfzmT8WS", Network::Mainnet).unwrap_err();
        assert!(matches!(err, AddressError::WrongNetwork { .. }));
    }

    #[test]
    fn bad_checksum_rejected() {
        let err = "2MzyKviSL6pnWxkbHV7ecFRE3hWKfzmT8WT".parse::<Address>().unwrap_err();
        assert!(matches!(err, AddressError::InvalidEncoding(_)));
    }
}
