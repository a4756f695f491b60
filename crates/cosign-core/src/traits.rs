//! Trait interfaces at the seams of the Cosign client.
//!
//! - [`CryptoBackend`]: elliptic-curve and transaction primitives
//!   ([`Secp256k1Backend`](crate::backend::Secp256k1Backend) implements)
//! - [`LedgerService`]: the remote key-and-ledger service
//!   (`cosign-api::HttpLedgerClient` implements)
//!
//! Everything above these seams (path walking, key sorting, address
//! verification, transaction sequencing) lives in the core and the wallet
//! crate and can be tested against mocks.

use crate::error::{CryptoError, DerivationError, LedgerError};
use crate::keys::{KeyNode, PublicKey};
use crate::network::Network;
use crate::path::{DerivationPath, PathSegment};
use crate::types::{
    CoinSelection, CreateWalletRequest, CreateWalletResponse, KeyWithPath, NewDerivation,
    Recipient, Transaction, UpgradeKeyIndexResponse, WalletBalance, WalletData,
};

/// Elliptic-curve and transaction primitives.
///
/// Implementations must be deterministic: the same inputs always produce
/// the same outputs (ECDSA signing uses RFC 6979 nonces).
#[cfg_attr(test, mockall::automock)]
pub trait CryptoBackend: Send + Sync {
    /// BIP32 master key from seed bytes.
    fn master_key(&self, seed: &[u8], network: Network) -> Result<KeyNode, DerivationError>;

    /// One child-derivation step. Public parents only accept normal steps.
    fn derive_child(&self, parent: &KeyNode, segment: PathSegment)
    -> Result<KeyNode, DerivationError>;

    /// The public node for a private node (identity on public nodes).
    fn neuter(&self, node: &KeyNode) -> Result<KeyNode, DerivationError>;

    /// Standard `m`-of-`n` multisig redeem script over `keys` in the given order.
    fn multisig_script(&self, threshold: usize, keys: &[PublicKey]) -> Result<Vec<u8>, CryptoError>;

    /// Legacy signature hash of input `input_index` with `script_code`.
    fn signature_hash(
        &self,
        tx: &Transaction,
        input_index: usize,
        script_code: &[u8],
        sighash_type: u32,
    ) -> Result<[u8; 32], CryptoError>;

    /// DER-encoded ECDSA signature over a 32-byte digest (no sighash byte).
    fn sign_digest(&self, key: &KeyNode, digest: &[u8; 32]) -> Result<Vec<u8>, CryptoError>;

    /// Canonical wire encoding of a transaction.
    fn serialize_transaction(&self, tx: &Transaction) -> Result<Vec<u8>, CryptoError>;

    /// Parse the canonical wire encoding of a transaction.
    fn deserialize_transaction(&self, bytes: &[u8]) -> Result<Transaction, CryptoError>;

    /// Compressed public key of any node.
    ///
    /// Default implementation neuters private nodes first.
    fn public_key(&self, node: &KeyNode) -> Result<PublicKey, DerivationError> {
        if let Some(pk) = node.public_key() {
            return Ok(*pk);
        }
        let public = self.neuter(node)?;
        public
            .public_key()
            .copied()
            .ok_or_else(|| DerivationError::Backend("neutered node has no public key".into()))
    }
}

/// The remote key-and-ledger service.
///
/// Every method except the read-only balance lookup mutates server-side
/// state and must be sent authenticated.
pub trait LedgerService: Send + Sync {
    /// Register a new wallet and receive the server's public keys.
    fn create_wallet(&self, request: &CreateWalletRequest)
    -> Result<CreateWalletResponse, LedgerError>;

    /// Fetch a stored wallet record.
    fn get_wallet(&self, identifier: &str) -> Result<WalletData, LedgerError>;

    /// Register the primary key for a higher key index and receive the
    /// matching server key.
    fn upgrade_key_index(
        &self,
        identifier: &str,
        key_index: u32,
        primary_public_key: &KeyWithPath,
    ) -> Result<UpgradeKeyIndexResponse, LedgerError>;

    /// Allocate the next unused path under `parent`.
    fn get_new_derivation(
        &self,
        identifier: &str,
        parent: &DerivationPath,
    ) -> Result<NewDerivation, LedgerError>;

    /// Choose UTXOs covering `outputs` plus fee.
    fn coin_selection(
        &self,
        identifier: &str,
        outputs: &[Recipient],
        lock_utxos: bool,
        allow_zero_conf: bool,
    ) -> Result<CoinSelection, LedgerError>;

    /// Co-sign and broadcast a transaction; returns its txid.
    fn send_transaction(
        &self,
        identifier: &str,
        raw_transaction: &str,
        paths: &[DerivationPath],
        check_fee: bool,
    ) -> Result<String, LedgerError>;

    /// Current confirmed and unconfirmed balance.
    fn wallet_balance(&self, identifier: &str) -> Result<WalletBalance, LedgerError>;

    /// Rescan the wallet's address space with the given gap limit.
    fn wallet_discovery(&self, identifier: &str, gap: u32) -> Result<WalletBalance, LedgerError>;
}
