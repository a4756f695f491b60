//! # cosign-core
//! Foundation types and traits for the Cosign 2-of-3 multisig client.
//!
//! # Modules
//!
//! - [`path`]: `M/…` derivation paths and their rewrites
//! - [`keys`]: BIP32 key nodes and compressed public keys
//! - [`derive`]: path walking over a [`CryptoBackend`](traits::CryptoBackend)
//! - [`multisig`]: sorted 2-of-3 redeem scripts and P2SH addresses
//! - [`backend`]: libsecp256k1 implementation of the crypto seam
//! - [`traits`]: `CryptoBackend` and `LedgerService`

pub mod address;
pub mod backend;
pub mod constants;
pub mod derive;
pub mod error;
pub mod keys;
pub mod multisig;
pub mod network;
pub mod path;
pub mod script;
pub mod traits;
pub mod types;

pub use address::Address;
pub use backend::Secp256k1Backend;
pub use error::{AddressError, CryptoError, DerivationError, LedgerError};
pub use keys::{KeyNode, PublicKey};
pub use network::Network;
pub use path::{DerivationPath, PathSegment};
pub use traits::{CryptoBackend, LedgerService};
