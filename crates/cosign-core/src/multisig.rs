//! 2-of-3 multisig descriptors and P2SH address construction.
//!
//! The three public keys are sorted by their compressed encoding before the
//! redeem script is built. The ledger service performs the same construction
//! independently, so this ordering is part of the protocol: any other order
//! produces a different script hash and an address nobody else agrees on.

use crate::address::Address;
use crate::constants::{MULTISIG_KEY_COUNT, MULTISIG_THRESHOLD};
use crate::error::CryptoError;
use crate::keys::PublicKey;
use crate::network::Network;
use crate::traits::CryptoBackend;

/// Threshold plus the participating keys in script order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultisigDescriptor {
    threshold: usize,
    keys: [PublicKey; MULTISIG_KEY_COUNT],
}

impl MultisigDescriptor {
    /// A 2-of-3 descriptor; key order of the argument does not matter.
    pub fn new(mut keys: [PublicKey; MULTISIG_KEY_COUNT]) -> Self {
        keys.sort();
        Self {
            threshold: MULTISIG_THRESHOLD,
            keys,
        }
    }

    /// Signatures required.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Keys in ascending byte order.
    pub fn keys(&self) -> &[PublicKey; MULTISIG_KEY_COUNT] {
        &self.keys
    }

    /// Serialized redeem script.
    pub fn redeem_script<B: CryptoBackend + ?Sized>(
        &self,
        backend: &B,
    ) -> Result<Vec<u8>, CryptoError> {
        backend.multisig_script(self.threshold, &self.keys)
    }
}

/// A wallet address together with the redeem script that unlocks it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultisigAddress {
    pub script: Vec<u8>,
    pub address: Address,
}

/// Build the P2SH 2-of-3 address for one primary, backup and server key.
pub fn build_address<B: CryptoBackend + ?Sized>(
    backend: &B,
    primary: &PublicKey,
    backup: &PublicKey,
    server: &PublicKey,
    network: Network,
) -> Result<MultisigAddress, CryptoError> {
    let descriptor = MultisigDescriptor::new([*primary, *backup, *server]);
    let script = descriptor.redeem_script(backend)?;
    let address = Address::p2sh(&script, network);
    Ok(MultisigAddress { script, address })
}
