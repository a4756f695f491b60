//! Wallet identity and its persisted form.
//!
//! [`WalletIdentity`] is the live key material: the primary private master
//! key, the backup master public key and the server public key for every key
//! index the wallet has used. [`WalletState`] is what gets written to disk;
//! it keeps the primary mnemonic instead of the derived key, so reopening
//! needs the passphrase again.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use cosign_core::error::{CryptoError, DerivationError};
use cosign_core::keys::KeyNode;
use cosign_core::network::Network;
use cosign_core::types::{KeyWithPath, ServerKeys};

use crate::encryption;
use crate::error::WalletError;

/// Magic bytes identifying a Cosign wallet state file.
pub const STATE_MAGIC: &[u8; 4] = b"CSWL";

/// Current state file format version.
pub const STATE_VERSION: u32 = 1;

/// Live key material of one wallet.
#[derive(Clone)]
pub struct WalletIdentity {
    identifier: String,
    network: Network,
    key_index: u32,
    primary: KeyNode,
    backup: KeyNode,
    server_keys: ServerKeys,
}

impl WalletIdentity {
    /// Assemble an identity, checking node kinds and networks.
    ///
    /// `primary` must be a private master key and `backup` a public one;
    /// every server key must be public and on `network`, and `key_index`
    /// must have a server key.
    pub fn new(
        identifier: impl Into<String>,
        network: Network,
        key_index: u32,
        primary: KeyNode,
        backup: KeyNode,
        server_keys: ServerKeys,
    ) -> Result<Self, WalletError> {
        if !primary.is_private() {
            return Err(CryptoError::PrivateKeyRequired.into());
        }
        if backup.is_private() {
            return Err(DerivationError::InvalidKey("backup key must be public".into()).into());
        }
        let nodes = std::iter::once(&primary)
            .chain(std::iter::once(&backup))
            .chain(server_keys.values().map(|KeyWithPath(node, _)| node));
        for node in nodes {
            if node.network() != network {
                return Err(DerivationError::NetworkMismatch {
                    expected: network.to_string(),
                    got: node.network().to_string(),
                }
                .into());
            }
        }
        if !server_keys.contains_key(&key_index) {
            return Err(WalletError::UnknownKeyIndex(key_index));
        }
        Ok(Self {
            identifier: identifier.into(),
            network,
            key_index,
            primary,
            backup,
            server_keys,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Key index new addresses are requested under.
    pub fn key_index(&self) -> u32 {
        self.key_index
    }

    /// Primary private master key.
    pub fn primary(&self) -> &KeyNode {
        &self.primary
    }

    /// Backup master public key.
    pub fn backup(&self) -> &KeyNode {
        &self.backup
    }

    pub fn server_keys(&self) -> &ServerKeys {
        &self.server_keys
    }

    /// Server public key handed out for `key_index`.
    pub fn server_key(&self, key_index: u32) -> Result<&KeyNode, WalletError> {
        self.server_keys
            .get(&key_index)
            .map(|KeyWithPath(node, _)| node)
            .ok_or(WalletError::UnknownKeyIndex(key_index))
    }

    /// Move to a higher key index with its server key.
    pub fn upgrade(&mut self, key_index: u32, server_key: KeyWithPath) -> Result<(), WalletError> {
        if key_index <= self.key_index {
            return Err(WalletError::KeyIndexDowngrade {
                current: self.key_index,
                requested: key_index,
            });
        }
        if server_key.0.is_private() || server_key.0.network() != self.network {
            return Err(DerivationError::InvalidKey(
                "server key must be a public key on the wallet network".into(),
            )
            .into());
        }
        self.server_keys.insert(key_index, server_key);
        self.key_index = key_index;
        Ok(())
    }
}

impl fmt::Debug for WalletIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletIdentity")
            .field("identifier", &self.identifier)
            .field("network", &self.network)
            .field("key_index", &self.key_index)
            .field("primary", &self.primary)
            .field("server_keys", &self.server_keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Wallet state file header, stored unencrypted as JSON.
#[derive(Serialize, Deserialize)]
struct StateFileHeader {
    magic: String,
    version: u32,
}

/// Serializable wallet state.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletState {
    pub identifier: String,
    pub network: Network,
    pub key_index: u32,
    pub primary_mnemonic: String,
    /// P2PKH address of the primary master key.
    pub checksum: String,
    pub backup_public_key: KeyNode,
    pub server_keys: ServerKeys,
}

impl WalletState {
    /// Write the state encrypted under `password`.
    ///
    /// # File format
    /// ```text
    /// header_len (4 bytes LE) || header_json || encrypted_payload
    /// ```
    pub fn save(&self, path: &Path, password: &[u8]) -> Result<(), WalletError> {
        let header = StateFileHeader {
            magic: String::from_utf8_lossy(STATE_MAGIC).to_string(),
            version: STATE_VERSION,
        };
        let header_json =
            serde_json::to_vec(&header).map_err(|e| WalletError::Serialization(e.to_string()))?;
        let payload = zeroize::Zeroizing::new(
            serde_json::to_vec(self).map_err(|e| WalletError::Serialization(e.to_string()))?,
        );
        let encrypted = encryption::encrypt(&payload, password)?;

        let header_len = header_json.len() as u32;
        let mut file_data = Vec::with_capacity(4 + header_json.len() + encrypted.len());
        file_data.extend_from_slice(&header_len.to_le_bytes());
        file_data.extend_from_slice(&header_json);
        file_data.extend_from_slice(&encrypted);

        std::fs::write(path, &file_data).map_err(|e| WalletError::IoError(e.to_string()))
    }

    /// Read a state file written by [`save`](Self::save).
    pub fn load(path: &Path, password: &[u8]) -> Result<Self, WalletError> {
        let file_data = std::fs::read(path).map_err(|e| WalletError::IoError(e.to_string()))?;

        let Some((len_bytes, rest)) = file_data.split_first_chunk::<4>() else {
            return Err(WalletError::CorruptedFile("file too short".into()));
        };
        let header_len = u32::from_le_bytes(*len_bytes) as usize;
        if rest.len() < header_len {
            return Err(WalletError::CorruptedFile("header truncated".into()));
        }
        let (header_json, encrypted) = rest.split_at(header_len);

        let header: StateFileHeader = serde_json::from_slice(header_json)
            .map_err(|e| WalletError::CorruptedFile(format!("invalid header: {e}")))?;
        if header.magic.as_bytes() != STATE_MAGIC {
            return Err(WalletError::CorruptedFile("invalid magic bytes".into()));
        }
        if header.version != STATE_VERSION {
            return Err(WalletError::CorruptedFile(format!(
                "unsupported version: {}",
                header.version
            )));
        }

        let payload = encryption::decrypt(encrypted, password)?;
        serde_json::from_slice(&payload)
            .map_err(|e| WalletError::CorruptedFile(format!("invalid payload: {e}")))
    }
}

impl fmt::Debug for WalletState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletState")
            .field("identifier", &self.identifier)
            .field("network", &self.network)
            .field("key_index", &self.key_index)
            .field("primary_mnemonic", &"[REDACTED]")
            .field("checksum", &self.checksum)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosign_core::path::DerivationPath;

    const SERVER_TPUB: &str = "tpubD9q6vq9zdP3gbhpjs7n2TRvT7h4PeBhxg1Kv9jEc1XAss7429VenxvQTsJaZhzTk54gnsHRpgeeNMbm1QTag4Wf1QpQ3gy221GDuUCxgfeZ";

    fn server_keys(index: u32) -> ServerKeys {
        let node: KeyNode = SERVER_TPUB.parse().unwrap();
        let path = DerivationPath::key_index_root(index).unwrap();
        ServerKeys::from([(index, KeyWithPath(node, path))])
    }

    fn primary() -> KeyNode {
        KeyNode::private(Network::Testnet, 0, [0; 4], 0, [1; 32], [2; 32])
    }

    fn backup() -> KeyNode {
        SERVER_TPUB.parse().unwrap()
    }

    fn identity(
        network: Network,
        key_index: u32,
        primary: KeyNode,
        backup: KeyNode,
    ) -> Result<WalletIdentity, WalletError> {
        WalletIdentity::new("w1", network, key_index, primary, backup, server_keys(9999))
    }

    fn state() -> WalletState {
        WalletState {
            identifier: "w1".into(),
            network: Network::Testnet,
            key_index: 9999,
            primary_mnemonic: "give pause forget seed dance crawl situate hole keen".into(),
            checksum: "mxyz".into(),
            backup_public_key: backup(),
            server_keys: server_keys(9999),
        }
    }

    #[test]
    fn identity_requires_server_key_for_index() {
        let err = identity(Network::Testnet, 5, primary(), backup()).unwrap_err();
        assert_eq!(err, WalletError::UnknownKeyIndex(5));
    }

    #[test]
    fn identity_rejects_wrong_node_kinds() {
        assert!(identity(Network::Testnet, 9999, backup(), backup()).is_err());
        assert!(identity(Network::Testnet, 9999, primary(), primary()).is_err());
    }

    #[test]
    fn identity_rejects_network_mismatch() {
        let err = identity(Network::Mainnet, 9999, primary(), backup()).unwrap_err();
        assert!(matches!(
            err,
            WalletError::Derivation(DerivationError::NetworkMismatch { .. })
        ));
    }

    #[test]
    fn upgrade_only_moves_up() {
        let mut id = identity(Network::Testnet, 9999, primary(), backup()).unwrap();
        let key = server_keys(10000).remove(&10000).unwrap();
        assert_eq!(
            id.upgrade(9999, key.clone()).unwrap_err(),
            WalletError::KeyIndexDowngrade { current: 9999, requested: 9999 }
        );
        id.upgrade(10000, key).unwrap();
        assert_eq!(id.key_index(), 10000);
        assert!(id.server_key(9999).is_ok());
        assert!(id.server_key(10000).is_ok());
    }

    #[test]
    fn debug_hides_secrets() {
        let id = identity(Network::Testnet, 9999, primary(), backup()).unwrap();
        assert!(format!("{id:?}").contains("REDACTED"));
        let debug = format!("{:?}", state());
        assert!(!debug.contains("give pause"));
    }

    #[test]
    fn state_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.cosign");
        state().save(&path, b"pw").unwrap();
        assert_eq!(WalletState::load(&path, b"pw").unwrap(), state());
        assert_eq!(WalletState::load(&path, b"nope").unwrap_err(), WalletError::InvalidPassword);
    }

    #[test]
    fn state_file_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.cosign");
        state().save(&path, b"pw").unwrap();
        let mut data = std::fs::read(&path).unwrap();
        let pos = data.windows(4).position(|w| w == STATE_MAGIC).unwrap();
        data[pos] = b'X';
        std::fs::write(&path, data).unwrap();
        assert!(matches!(
            WalletState::load(&path, b"pw").unwrap_err(),
            WalletError::CorruptedFile(_)
        ));
    }

    #[test]
    fn state_file_missing_or_short() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        assert!(matches!(WalletState::load(&path, b"pw").unwrap_err(), WalletError::IoError(_)));
        std::fs::write(&path, [1u8, 0]).unwrap();
        assert!(matches!(
            WalletState::load(&path, b"pw").unwrap_err(),
            WalletError::CorruptedFile(_)
        ));
    }
}
