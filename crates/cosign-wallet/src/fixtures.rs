//! Shared test fixtures: a testnet wallet at key index 9999 with known addresses.

use cosign_core::backend::Secp256k1Backend;
use cosign_core::keys::KeyNode;
use cosign_core::network::Network;
use cosign_core::path::DerivationPath;
use cosign_core::traits::CryptoBackend;
use cosign_core::types::{CoinSelection, KeyWithPath, ServerKeys, UtxoDescriptor};

use crate::identity::WalletIdentity;
use crate::mnemonic::seed_from_mnemonic;
use crate::verify::address_for_path;

pub const PRIMARY_MNEMONIC: &str = "give pause forget seed dance crawl situate hole keen";
pub const PRIMARY_PASSPHRASE: &str = "password";
pub const BACKUP_MNEMONIC: &str = "give pause forget seed dance crawl situate hole give";
pub const SERVER_TPUB: &str = "tpubD9q6vq9zdP3gbhpjs7n2TRvT7h4PeBhxg1Kv9jEc1XAss7429VenxvQTsJaZhzTk54gnsHRpgeeNMbm1QTag4Wf1QpQ3gy221GDuUCxgfeZ";
pub const KEY_INDEX: u32 = 9999;

/// `(path, address)` pairs the fixture wallet must reproduce.
pub const KNOWN_ADDRESSES: [(&str, &str); 4] = [
    ("M/9999'/0/0", "2MzyKviSL6pnWxkbHV7ecFRE3hWKfzmT8WS"),
    ("M/9999'/0/1", "2N65RcfKHiKQcPGZAA2QVeqitJvAQ8HroHD"),
    ("M/9999'/0/6", "2MynrezSyqCq1x5dMPtRDupTPA4sfVrNBKq"),
    ("M/9999'/0/44", "2N5eqrZE7LcfRyCWqpeh1T1YpMdgrq8HWzh"),
];

pub fn primary_master(backend: &Secp256k1Backend) -> KeyNode {
    let seed = seed_from_mnemonic(PRIMARY_MNEMONIC, PRIMARY_PASSPHRASE);
    backend.master_key(&seed[..], Network::Testnet).unwrap()
}

pub fn backup_public(backend: &Secp256k1Backend) -> KeyNode {
    let seed = seed_from_mnemonic(BACKUP_MNEMONIC, "");
    let master = backend.master_key(&seed[..], Network::Testnet).unwrap();
    backend.neuter(&master).unwrap()
}

pub fn server_keys() -> ServerKeys {
    let server: KeyNode = SERVER_TPUB.parse().unwrap();
    ServerKeys::from([(
        KEY_INDEX,
        KeyWithPath(server, DerivationPath::key_index_root(KEY_INDEX).unwrap()),
    )])
}

pub fn identity(backend: &Secp256k1Backend) -> WalletIdentity {
    WalletIdentity::new(
        "unittest",
        Network::Testnet,
        KEY_INDEX,
        primary_master(backend),
        backup_public(backend),
        server_keys(),
    )
    .unwrap()
}

/// A UTXO held at `path` of the fixture wallet.
pub fn utxo(backend: &Secp256k1Backend, path: &str, txid_byte: u8, value: u64) -> UtxoDescriptor {
    let path: DerivationPath = path.parse().unwrap();
    let owned = address_for_path(backend, &identity(backend), &path).unwrap();
    UtxoDescriptor {
        txid: hex::encode([txid_byte; 32]),
        index: 0,
        value,
        address: owned.address,
        redeem_script: owned.script,
        path,
    }
}

pub fn selection(utxos: Vec<UtxoDescriptor>, fee: u64, change: u64) -> CoinSelection {
    CoinSelection { utxos, fee, change }
}
