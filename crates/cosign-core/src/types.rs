//! Wire and transaction types shared between the wallet and ledger service.
//!
//! Field names on the serde types follow the ledger service's JSON
//! (`hash`/`idx` on UTXOs, `blocktrail_public_keys` on wallet records).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::address::Address;
use crate::error::CryptoError;
use crate::keys::KeyNode;
use crate::path::DerivationPath;

/// A payment target: address and value in smallest units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Destination address.
    pub address: Address,
    /// Amount in smallest units.
    pub value: u64,
}

impl Recipient {
    pub fn new(address: Address, value: u64) -> Self {
        Self { address, value }
    }
}

/// An unspent output offered by the service's coin selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoDescriptor {
    /// Funding transaction id, hex in display (big-endian) order.
    #[serde(rename = "hash")]
    pub txid: String,
    /// Output index within the funding transaction.
    #[serde(rename = "idx")]
    pub index: u32,
    /// Value in smallest units.
    pub value: u64,
    /// Wallet address holding the output.
    pub address: Address,
    /// Serialized 2-of-3 redeem script for `address`.
    #[serde(with = "hex::serde")]
    pub redeem_script: Vec<u8>,
    /// Path the address was derived at.
    pub path: DerivationPath,
}

impl UtxoDescriptor {
    /// Outpoint referencing this output (txid converted to wire byte order).
    pub fn outpoint(&self) -> Result<OutPoint, CryptoError> {
        let mut txid: [u8; 32] = hex::decode(&self.txid)
            .map_err(|e| CryptoError::InvalidTxid(format!("{}: {e}", self.txid)))?
            .try_into()
            .map_err(|_| CryptoError::InvalidTxid(format!("{}: not 32 bytes", self.txid)))?;
        txid.reverse();
        Ok(OutPoint { txid, vout: self.index })
    }
}

/// Result of a server-side coin selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinSelection {
    /// Selected outputs, in the order they must be spent.
    pub utxos: Vec<UtxoDescriptor>,
    /// Fee the service expects the transaction to pay.
    pub fee: u64,
    /// Change returned to the wallet (may be zero).
    pub change: u64,
}

impl CoinSelection {
    /// Sum of selected output values, `None` on overflow.
    pub fn input_total(&self) -> Option<u64> {
        self.utxos.iter().try_fold(0u64, |acc, u| acc.checked_add(u.value))
    }
}

/// Reference to a previous transaction output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutPoint {
    /// Transaction id in internal (little-endian) byte order.
    pub txid: [u8; 32],
    /// Output index.
    pub vout: u32,
}

impl OutPoint {
    /// Txid as hex in display (big-endian) order.
    pub fn txid_hex(&self) -> String {
        let mut display = self.txid;
        display.reverse();
        hex::encode(display)
    }
}

/// Transaction input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

/// Transaction output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

/// A legacy (non-segwit) transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Sum of output values, `None` on overflow.
    pub fn output_total(&self) -> Option<u64> {
        self.outputs.iter().try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }
}

/// An extended public key together with the path it sits at,
/// sent on the wire as a two-element array `[xpub, path]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyWithPath(pub KeyNode, pub DerivationPath);

/// Server public keys by key index.
pub type ServerKeys = BTreeMap<u32, KeyWithPath>;

/// Response to a new-derivation request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDerivation {
    /// Path the service allocated.
    pub path: DerivationPath,
    /// Address the service claims lives at `path`.
    pub address: String,
}

/// Confirmed and unconfirmed wallet balance in smallest units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

/// Wallet registration request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateWalletRequest {
    pub identifier: String,
    /// Primary public key at `M/<key_index>'`.
    pub primary_public_key: KeyWithPath,
    /// Backup master public key at `M`.
    pub backup_public_key: KeyWithPath,
    pub primary_mnemonic: String,
    /// Address of the primary master key, used to detect a wrong passphrase on open.
    pub checksum: String,
    pub key_index: u32,
}

/// Wallet registration response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateWalletResponse {
    pub blocktrail_public_keys: ServerKeys,
    pub key_index: u32,
}

/// Stored wallet record returned when opening a wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletData {
    pub primary_mnemonic: String,
    pub backup_public_key: KeyWithPath,
    pub blocktrail_public_keys: ServerKeys,
    pub key_index: u32,
    #[serde(default)]
    pub checksum: String,
}

/// Key-index upgrade request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeKeyIndexRequest {
    pub key_index: u32,
    /// Primary public key at `M/<key_index>'`.
    pub primary_public_key: KeyWithPath,
}

/// Key-index upgrade response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeKeyIndexResponse {
    pub blocktrail_public_keys: ServerKeys,
}
