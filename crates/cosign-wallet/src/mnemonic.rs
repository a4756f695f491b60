//! Mnemonic generation and seed stretching.
//!
//! Seeds are `PBKDF2-HMAC-SHA512(mnemonic, "mnemonic" + passphrase, 2048)`
//! over the NFKD forms of both strings.
//! Opening a wallet does not validate the BIP-39 checksum, so phrases that
//! predate BIP-39 word lists still reproduce their keys.

use bip39::{Language, Mnemonic};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;
use unicode_normalization::UnicodeNormalization;
use zeroize::Zeroizing;

use cosign_core::constants::{SEED_PBKDF2_ROUNDS, SEED_SALT_PREFIX};

use crate::error::WalletError;

/// Length of a stretched seed.
pub const SEED_LEN: usize = 64;

/// Entropy for generated phrases (24 words).
const ENTROPY_LEN: usize = 32;

/// Collapse runs of whitespace to single spaces.
pub fn normalize(phrase: &str) -> String {
    phrase.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stretch a mnemonic and passphrase into BIP32 seed bytes.
pub fn seed_from_mnemonic(phrase: &str, passphrase: &str) -> Zeroizing<[u8; SEED_LEN]> {
    let phrase = Zeroizing::new(normalize(phrase).nfkd().collect::<String>());
    let salt = Zeroizing::new(
        format!("{SEED_SALT_PREFIX}{passphrase}")
            .nfkd()
            .collect::<String>(),
    );
    let mut seed = Zeroizing::new([0u8; SEED_LEN]);
    pbkdf2_hmac::<Sha512>(phrase.as_bytes(), salt.as_bytes(), SEED_PBKDF2_ROUNDS, &mut seed[..]);
    seed
}

/// Generate a fresh 24-word English phrase from the OS RNG.
pub fn generate_mnemonic() -> Result<Zeroizing<String>, WalletError> {
    use rand::RngCore;
    let mut entropy = Zeroizing::new([0u8; ENTROPY_LEN]);
    rand::rngs::OsRng.fill_bytes(&mut entropy[..]);
    let m = Mnemonic::from_entropy_in(Language::English, &entropy[..])
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    Ok(Zeroizing::new(m.to_string()))
}

/// Reject phrases that cannot possibly be mnemonics (empty or a single word).
pub fn check_phrase(phrase: &str) -> Result<(), WalletError> {
    let words = phrase.split_whitespace().count();
    if words < 2 {
        return Err(WalletError::InvalidMnemonic(format!(
            "expected a phrase of several words, got {words}"
        )));
    }
    Ok(())
}
