//! Extended key nodes and public keys.
//!
//! A [`KeyNode`] is a BIP32 extended key: network, depth, parent fingerprint,
//! child number, chain code and either a private scalar or a compressed
//! public point. Nodes are immutable; deriving produces new nodes through a
//! [`CryptoBackend`](crate::traits::CryptoBackend).
//!
//! Private key material is zeroized on drop and never printed by `Debug`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::{COMPRESSED_PUBKEY_LEN, EXTENDED_KEY_LEN};
use crate::error::{CryptoError, DerivationError};
use crate::network::Network;

/// A compressed secp256k1 public key (33 bytes, `0x02`/`0x03` prefix).
///
/// Ordering is plain byte-lexicographic order of the encoding, which is the
/// order multisig scripts are built in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; COMPRESSED_PUBKEY_LEN]);

impl PublicKey {
    /// Wrap a compressed encoding, checking length and prefix byte.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != COMPRESSED_PUBKEY_LEN || !matches!(bytes[0], 0x02 | 0x03) {
            return Err(CryptoError::InvalidPublicKey);
        }
        let mut out = [0u8; COMPRESSED_PUBKEY_LEN];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// The compressed encoding.
    pub fn as_bytes(&self) -> &[u8; COMPRESSED_PUBKEY_LEN] {
        &self.0
    }

    /// Hex form of the compressed encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// 32-byte private scalar, wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
struct SecretBytes([u8; 32]);

/// Key material carried by a node.
#[derive(Clone, PartialEq, Eq)]
enum KeyMaterial {
    Private(SecretBytes),
    Public(PublicKey),
}

/// A BIP32 extended key, private or public.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyNode {
    network: Network,
    depth: u8,
    parent_fingerprint: [u8; 4],
    child_number: u32,
    chain_code: [u8; 32],
    material: KeyMaterial,
}

impl KeyNode {
    /// Assemble a private node from its parts.
    pub fn private(
        network: Network,
        depth: u8,
        parent_fingerprint: [u8; 4],
        child_number: u32,
        chain_code: [u8; 32],
        secret: [u8; 32],
    ) -> Self {
        Self {
            network,
            depth,
            parent_fingerprint,
            child_number,
            chain_code,
            material: KeyMaterial::Private(SecretBytes(secret)),
        }
    }

    /// Assemble a public node from its parts.
    pub fn public(
        network: Network,
        depth: u8,
        parent_fingerprint: [u8; 4],
        child_number: u32,
        chain_code: [u8; 32],
        public_key: PublicKey,
    ) -> Self {
        Self {
            network,
            depth,
            parent_fingerprint,
            child_number,
            chain_code,
            material: KeyMaterial::Public(public_key),
        }
    }

    /// Network the node was created for.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Distance from the master key.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// First four bytes of the parent's HASH160 (zero for a master key).
    pub fn parent_fingerprint(&self) -> [u8; 4] {
        self.parent_fingerprint
    }

    /// Raw child number this node was derived with.
    pub fn child_number(&self) -> u32 {
        self.child_number
    }

    /// Chain code.
    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    /// Whether the node carries a private key.
    pub fn is_private(&self) -> bool {
        matches!(self.material, KeyMaterial::Private(_))
    }

    /// The private scalar, if this is a private node. Handle with care.
    pub fn secret_bytes(&self) -> Option<&[u8; 32]> {
        match &self.material {
            KeyMaterial::Private(secret) => Some(&secret.0),
            KeyMaterial::Public(_) => None,
        }
    }

    /// The public key, if this is a public node.
    ///
    /// Private nodes have to be neutered through a backend first.
    pub fn public_key(&self) -> Option<&PublicKey> {
        match &self.material {
            KeyMaterial::Public(pk) => Some(pk),
            KeyMaterial::Private(_) => None,
        }
    }

    /// Canonical 78-byte BIP32 serialization.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(EXTENDED_KEY_LEN);
        match &self.material {
            KeyMaterial::Private(_) => out.extend_from_slice(&self.network.xprv_version()),
            KeyMaterial::Public(_) => out.extend_from_slice(&self.network.xpub_version()),
        }
        out.push(self.depth);
        out.extend_from_slice(&self.parent_fingerprint);
        out.extend_from_slice(&self.child_number.to_be_bytes());
        out.extend_from_slice(&self.chain_code);
        match &self.material {
            KeyMaterial::Private(secret) => {
                out.push(0x00);
                out.extend_from_slice(&secret.0);
            }
            KeyMaterial::Public(pk) => out.extend_from_slice(pk.as_bytes()),
        }
        out
    }

    /// Parse the canonical 78-byte BIP32 serialization.
    pub fn decode(data: &[u8]) -> Result<Self, DerivationError> {
        if data.len() != EXTENDED_KEY_LEN {
            return Err(DerivationError::InvalidKey(format!(
                "expected {EXTENDED_KEY_LEN} bytes, got {}",
                data.len()
            )));
        }
        let version: [u8; 4] = data[0..4].try_into().expect("slice of length 4");
        let (network, private) = [Network::Mainnet, Network::Testnet]
            .into_iter()
            .find_map(|n| {
                if version == n.xprv_version() {
                    Some((n, true))
                } else if version == n.xpub_version() {
                    Some((n, false))
                } else {
                    None
                }
            })
            .ok_or_else(|| {
                DerivationError::InvalidKey(format!("unknown version {}", hex::encode(version)))
            })?;

        let depth = data[4];
        let parent_fingerprint: [u8; 4] = data[5..9].try_into().expect("slice of length 4");
        let child_number = u32::from_be_bytes(data[9..13].try_into().expect("slice of length 4"));
        let chain_code: [u8; 32] = data[13..45].try_into().expect("slice of length 32");

        if private {
            if data[45] != 0x00 {
                return Err(DerivationError::InvalidKey("private key prefix".into()));
            }
            let secret: [u8; 32] = data[46..78].try_into().expect("slice of length 32");
            Ok(Self::private(network, depth, parent_fingerprint, child_number, chain_code, secret))
        } else {
            let pk = PublicKey::from_slice(&data[45..78])
                .map_err(|e| DerivationError::InvalidKey(e.to_string()))?;
            Ok(Self::public(network, depth, parent_fingerprint, child_number, chain_code, pk))
        }
    }

    /// Base58check text form (`xprv`/`tprv` or `xpub`/`tpub`).
    pub fn to_base58(&self) -> String {
        bs58::encode(self.encode()).with_check().into_string()
    }

    /// Parse a base58check extended key and require it to be on `network`.
    pub fn from_base58_on(s: &str, network: Network) -> Result<Self, DerivationError> {
        let node: KeyNode = s.parse()?;
        if node.network != network {
            return Err(DerivationError::NetworkMismatch {
                expected: network.to_string(),
                got: node.network.to_string(),
            });
        }
        Ok(node)
    }
}

impl FromStr for KeyNode {
    type Err = DerivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let data = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| DerivationError::InvalidKey(e.to_string()))?;
        Self::decode(&data)
    }
}

impl fmt::Debug for KeyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("KeyNode");
        s.field("network", &self.network)
            .field("depth", &self.depth)
            .field("child_number", &self.child_number);
        match &self.material {
            KeyMaterial::Private(_) => s.field("private_key", &"[REDACTED]"),
            KeyMaterial::Public(pk) => s.field("public_key", pk),
        };
        s.finish()
    }
}

impl Serialize for KeyNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for KeyNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
