//! # cosign-wallet: 2-of-3 multisig HD wallet.
//!
//! Holds the primary key, checks every service-issued address against local
//! derivation, builds and signs payments from the service's coin selection,
//! and persists wallet state to an encrypted file.
//!
//! # Modules
//!
//! - [`error`]: `WalletError` enum
//! - [`mnemonic`]: phrase generation and seed stretching
//! - [`identity`]: live key material and the persisted `WalletState`
//! - [`verify`]: local address derivation and integrity checks
//! - [`builder`]: transaction builder with signing
//! - [`encryption`]: AES-256-GCM wallet file encryption
//! - [`wallet`]: high-level wallet composition

pub mod builder;
pub mod encryption;
pub mod error;
pub mod identity;
pub mod mnemonic;
pub mod verify;
pub mod wallet;

#[cfg(test)]
mod fixtures;

// Re-exports for convenient access
pub use builder::{ChangePosition, SignedTransaction, TransactionBuilder, UnsignedTransaction};
pub use encryption::{decrypt, encrypt};
pub use error::WalletError;
pub use identity::{WalletIdentity, WalletState};
pub use verify::{address_for_path, verify_derivation};
pub use wallet::{AddressVerification, NewWallet, PayOptions, Wallet, WalletOptions};
