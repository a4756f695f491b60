//! Path walking over a key node.
//!
//! [`derive`] applies one backend child-derivation per path step, in order.
//! Hardened steps on a public node are rejected here, before the backend is
//! asked, so the error is the same whatever backend is plugged in.

use crate::error::DerivationError;
use crate::keys::{KeyNode, PublicKey};
use crate::path::DerivationPath;
use crate::traits::CryptoBackend;

/// Derive the node at `path` below `node`.
///
/// Deterministic: the same node and path always give the same child.
pub fn derive<B: CryptoBackend + ?Sized>(
    backend: &B,
    node: &KeyNode,
    path: &DerivationPath,
) -> Result<KeyNode, DerivationError> {
    let mut current = node.clone();
    for segment in path.segments() {
        if segment.is_hardened() && !current.is_private() {
            return Err(DerivationError::HardenedFromPublic {
                index: segment.index(),
            });
        }
        current = backend.derive_child(&current, *segment)?;
    }
    Ok(current)
}

/// Derive the node at `path` and return its compressed public key.
pub fn derive_public_key<B: CryptoBackend + ?Sized>(
    backend: &B,
    node: &KeyNode,
    path: &DerivationPath,
) -> Result<PublicKey, DerivationError> {
    let child = derive(backend, node, path)?;
    backend.public_key(&child)
}
