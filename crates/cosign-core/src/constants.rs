//! Protocol constants shared by every Cosign crate.

/// Offset added to a child index to mark a hardened derivation step.
pub const HARDENED_OFFSET: u32 = 1 << 31;

/// Signatures required to spend from a wallet address.
pub const MULTISIG_THRESHOLD: usize = 2;

/// Keys participating in every wallet address (primary, backup, server).
pub const MULTISIG_KEY_COUNT: usize = 3;

/// Signature hash type committing to all inputs and outputs.
pub const SIGHASH_ALL: u32 = 0x01;

/// Length of a compressed secp256k1 public key.
pub const COMPRESSED_PUBKEY_LEN: usize = 33;

/// Length of a serialized BIP32 extended key (without checksum).
pub const EXTENDED_KEY_LEN: usize = 78;

/// Branch under a key index that holds receive (and change) addresses.
pub const RECEIVE_BRANCH: u32 = 0;

/// Smallest units per coin.
pub const COIN: u64 = 100_000_000;

/// Sequence number used on every input (final, no relative lock).
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Transaction version emitted by the builder.
pub const TX_VERSION: i32 = 1;

/// Iterations of PBKDF2-HMAC-SHA512 when stretching a mnemonic into a seed.
pub const SEED_PBKDF2_ROUNDS: u32 = 2048;

/// Salt prefix for mnemonic seed stretching.
pub const SEED_SALT_PREFIX: &str = "mnemonic";

/// Convert a decimal coin amount into smallest units, rounding to the nearest unit.
pub fn to_satoshi(coins: f64) -> u64 {
    (coins * COIN as f64).round() as u64
}

/// Convert smallest units into a decimal coin amount (display only).
pub fn to_btc(satoshi: u64) -> f64 {
    satoshi as f64 / COIN as f64
}
