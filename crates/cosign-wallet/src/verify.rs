//! Local address derivation and the service-address integrity check.
//!
//! For a wallet path `M/k'/0/i` the three keys are:
//! - primary: the full path from the primary private master key;
//! - backup: the same indices with hardening cleared, from the backup
//!   master public key (`M/k/0/i`);
//! - server: the path below the key-index root (`0/i`), from the server
//!   key handed out for `k`.

use tracing::{debug, error};

use cosign_core::address::Address;
use cosign_core::derive::derive_public_key;
use cosign_core::error::DerivationError;
use cosign_core::multisig::{MultisigAddress, build_address};
use cosign_core::path::DerivationPath;
use cosign_core::traits::CryptoBackend;

use crate::error::WalletError;
use crate::identity::WalletIdentity;

/// Compute the multisig address and redeem script at `path`.
pub fn address_for_path<B: CryptoBackend + ?Sized>(
    backend: &B,
    identity: &WalletIdentity,
    path: &DerivationPath,
) -> Result<MultisigAddress, WalletError> {
    let key_index = path
        .key_index()
        .ok_or_else(|| DerivationError::InvalidPath(format!("{path} has no key index")))?;
    let server = identity.server_key(key_index)?;

    let primary = derive_public_key(backend, identity.primary(), path)?;
    let backup = derive_public_key(backend, identity.backup(), &path.without_hardening())?;
    let server = derive_public_key(backend, server, &path.strip_key_index())?;

    Ok(build_address(backend, &primary, &backup, &server, identity.network())?)
}

/// Check a service-asserted address against local derivation.
///
/// Returns the locally built address on success; any mismatch, including an
/// address for the wrong network, is [`WalletError::Integrity`].
pub fn verify_derivation<B: CryptoBackend + ?Sized>(
    backend: &B,
    identity: &WalletIdentity,
    path: &DerivationPath,
    server_address: &str,
) -> Result<MultisigAddress, WalletError> {
    let local = address_for_path(backend, identity, path)?;
    let matches = Address::parse_on(server_address, identity.network())
        .map(|claimed| claimed == local.address)
        .unwrap_or(false);
    if !matches {
        error!(
            %path,
            server = server_address,
            local = %local.address,
            "address integrity check failed"
        );
        return Err(WalletError::Integrity {
            path: path.to_string(),
            server: server_address.to_string(),
            local: local.address.to_string(),
        });
    }
    debug!(%path, address = %local.address, "address verified");
    Ok(local)
}
