//! Wallet error types.

use cosign_core::error::{AddressError, CryptoError, DerivationError, LedgerError};
use thiserror::Error;

/// Errors that can occur in wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Path or key-node failure from cosign-core.
    #[error(transparent)]
    Derivation(#[from] DerivationError),

    /// Script, signing or serialization failure from cosign-core.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Address parsing failure from cosign-core.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// Ledger service failure (transport, credentials, coin selection, rejection).
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The service's claim about an address disagrees with local derivation.
    #[error("integrity check failed at {path}: service says {server}, local derivation gives {local}")]
    Integrity {
        /// Derivation path the claim was made for.
        path: String,
        /// Address the service asserted.
        server: String,
        /// Address computed locally.
        local: String,
    },

    /// No server public key is known for this key index.
    #[error("no server key for key index {0}")]
    UnknownKeyIndex(u32),

    /// Key indices only move upward.
    #[error("key index {requested} is not above the current {current}")]
    KeyIndexDowngrade {
        /// Index currently in use.
        current: u32,
        /// Index that was asked for.
        requested: u32,
    },

    /// The same address appears twice in one payment.
    #[error("duplicate recipient: {0}")]
    DuplicateRecipient(String),

    /// Invalid monetary amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A payment needs at least one output.
    #[error("no recipients")]
    NoRecipients,

    /// Coin selection does not add up or cannot be used as returned.
    #[error("inconsistent coin selection: {0}")]
    InconsistentSelection(String),

    /// Mnemonic and passphrase do not reproduce the stored checksum.
    #[error("checksum mismatch: wrong mnemonic or passphrase")]
    ChecksumMismatch,

    /// Malformed mnemonic phrase.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Encryption failure.
    #[error("encryption: {0}")]
    Encryption(String),

    /// Decryption failure.
    #[error("decryption: {0}")]
    Decryption(String),

    /// Wrong password for wallet file.
    #[error("invalid password")]
    InvalidPassword,

    /// Wallet file is corrupted or has invalid format.
    #[error("corrupted file: {0}")]
    CorruptedFile(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Serialization error.
    #[error("serialization: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_integrity() {
        let e = WalletError::Integrity {
            path: "M/9999'/0/0".into(),
            server: "2Mzy".into(),
            local: "2N65".into(),
        };
        assert_eq!(
            e.to_string(),
            "integrity check failed at M/9999'/0/0: service says 2Mzy, local derivation gives 2N65"
        );
    }

    #[test]
    fn display_downgrade() {
        let e = WalletError::KeyIndexDowngrade { current: 9999, requested: 1 };
        assert_eq!(e.to_string(), "key index 1 is not above the current 9999");
    }

    #[test]
    fn display_invalid_password() {
        assert_eq!(WalletError::InvalidPassword.to_string(), "invalid password");
    }

    #[test]
    fn from_core_errors() {
        let wallet: WalletError = CryptoError::InvalidPublicKey.into();
        assert_eq!(wallet, WalletError::Crypto(CryptoError::InvalidPublicKey));

        let wallet: WalletError = LedgerError::InvalidCredentials.into();
        assert_eq!(wallet.to_string(), "[401] your credentials are incorrect");

        let wallet: WalletError = DerivationError::HardenedFromPublic { index: 1 }.into();
        assert!(matches!(wallet, WalletError::Derivation(_)));
    }
}
