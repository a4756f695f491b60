//! Shared test helpers: an in-memory ledger service and known-wallet fixtures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bitcoin::secp256k1::{self, Secp256k1};
use sha2::{Digest, Sha256};

use cosign_core::address::Address;
use cosign_core::backend::Secp256k1Backend;
use cosign_core::constants::{MULTISIG_KEY_COUNT, SIGHASH_ALL};
use cosign_core::derive::{derive, derive_public_key};
use cosign_core::error::LedgerError;
use cosign_core::keys::{KeyNode, PublicKey};
use cosign_core::multisig::{MultisigAddress, build_address};
use cosign_core::network::Network;
use cosign_core::path::{DerivationPath, PathSegment};
use cosign_core::script::multisig_unlocking_script;
use cosign_core::traits::{CryptoBackend, LedgerService};
use cosign_core::types::{
    CoinSelection, CreateWalletRequest, CreateWalletResponse, KeyWithPath, NewDerivation,
    Recipient, ServerKeys, Transaction, UpgradeKeyIndexResponse, UtxoDescriptor, WalletBalance,
    WalletData,
};

pub const PRIMARY_MNEMONIC: &str = "give pause forget seed dance crawl situate hole keen";
pub const PRIMARY_PASSPHRASE: &str = "password";
pub const BACKUP_MNEMONIC: &str = "give pause forget seed dance crawl situate hole give";
pub const SERVER_TPUB: &str = "tpubD9q6vq9zdP3gbhpjs7n2TRvT7h4PeBhxg1Kv9jEc1XAss7429VenxvQTsJaZhzTk54gnsHRpgeeNMbm1QTag4Wf1QpQ3gy221GDuUCxgfeZ";
pub const KEY_INDEX: u32 = 9999;

/// `(path, address)` pairs of the known testnet wallet.
pub const KNOWN_ADDRESSES: [(&str, &str); 4] = [
    ("M/9999'/0/0", "2MzyKviSL6pnWxkbHV7ecFRE3hWKfzmT8WS"),
    ("M/9999'/0/1", "2N65RcfKHiKQcPGZAA2QVeqitJvAQ8HroHD"),
    ("M/9999'/0/6", "2MynrezSyqCq1x5dMPtRDupTPA4sfVrNBKq"),
    ("M/9999'/0/44", "2N5eqrZE7LcfRyCWqpeh1T1YpMdgrq8HWzh"),
];

/// Fee the in-memory service charges on every payment.
pub const SERVICE_FEE: u64 = 10_000;

/// Double SHA-256 of a serialized transaction, in display order.
pub fn txid_hex(raw: &[u8]) -> String {
    let mut hash: [u8; 32] = Sha256::digest(Sha256::digest(raw)).into();
    hash.reverse();
    hex::encode(hash)
}

/// A transaction the service accepted, after adding its own signatures.
#[derive(Clone, Debug)]
pub struct SentTransaction {
    pub txid: String,
    /// Raw transaction as the client submitted it.
    pub submitted: Vec<u8>,
    /// The transaction with both signatures on every input.
    pub cosigned: Transaction,
    pub paths: Vec<DerivationPath>,
}

struct WalletRecord {
    data: WalletData,
    /// Primary public key at `M/<k>'` for every registered key index.
    primary_keys: BTreeMap<u32, KeyNode>,
    next_index: BTreeMap<u32, u32>,
    issued: HashMap<Address, (DerivationPath, Vec<u8>)>,
    utxos: Vec<UtxoDescriptor>,
    locked: HashSet<(String, u32)>,
    sent: Vec<SentTransaction>,
}

struct Shared {
    backend: Secp256k1Backend,
    network: Network,
    server_master: KeyNode,
    tamper_addresses: AtomicBool,
    funding_counter: AtomicU32,
    wallets: Mutex<HashMap<String, WalletRecord>>,
}

/// Ledger service that keeps everything in memory.
///
/// It holds a private server master key, hands out `M/<k>'` subtrees of it,
/// derives wallet addresses on its own, selects coins from UTXOs funded with
/// [`fund`](Self::fund) and co-signs submitted transactions after verifying
/// the client's signature. Clones share state.
#[derive(Clone)]
pub struct InMemoryLedger {
    shared: Arc<Shared>,
}

fn internal(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::EndpointSpecific {
        code: 500,
        msg: e.to_string(),
    }
}

fn rejected(msg: impl Into<String>) -> LedgerError {
    LedgerError::TransactionRejected {
        code: 0,
        msg: msg.into(),
    }
}

/// Split `OP_0 <sig> <redeem_script>` into its two pushes.
fn split_single_signature(script_sig: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let (&op_0, rest) = script_sig.split_first()?;
    if op_0 != 0x00 {
        return None;
    }
    let (&sig_len, rest) = rest.split_first()?;
    let sig_len = sig_len as usize;
    if sig_len >= 0x4c || rest.len() < sig_len {
        return None;
    }
    let (sig, rest) = rest.split_at(sig_len);
    let (&opcode, rest) = rest.split_first()?;
    let redeem = match opcode {
        0x4c => {
            let (&len, rest) = rest.split_first()?;
            (rest.len() == len as usize).then(|| rest.to_vec())?
        }
        n if (n as usize) < 0x4c => (rest.len() == n as usize).then(|| rest.to_vec())?,
        _ => return None,
    };
    Some((sig.to_vec(), redeem))
}

/// Position of `key` among the keys of a standard 2-of-3 redeem script.
fn key_position(redeem_script: &[u8], key: &PublicKey) -> Option<usize> {
    (0..MULTISIG_KEY_COUNT).find(|j| {
        let start = 2 + 34 * j;
        redeem_script.get(start..start + 33) == Some(&key.as_bytes()[..])
    })
}

impl InMemoryLedger {
    /// A service on `network` whose server master key comes from `server_seed`.
    pub fn new(network: Network, server_seed: &[u8]) -> Self {
        let backend = Secp256k1Backend::new();
        let server_master = backend
            .master_key(server_seed, network)
            .expect("valid server seed");
        Self {
            shared: Arc::new(Shared {
                backend,
                network,
                server_master,
                tamper_addresses: AtomicBool::new(false),
                funding_counter: AtomicU32::new(0),
                wallets: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn testnet() -> Self {
        Self::new(Network::Testnet, &[0x5e; 32])
    }

    /// Make every new derivation report the address of the next index.
    pub fn set_tamper_addresses(&self, tamper: bool) {
        self.shared.tamper_addresses.store(tamper, Ordering::SeqCst);
    }

    fn wallets(&self) -> MutexGuard<'_, HashMap<String, WalletRecord>> {
        self.shared.wallets.lock().expect("ledger state poisoned")
    }

    fn backend(&self) -> &Secp256k1Backend {
        &self.shared.backend
    }

    /// Public server key for key index `k`, at `M/<k>'`.
    pub fn server_key(&self, key_index: u32) -> Result<KeyWithPath, LedgerError> {
        let path = DerivationPath::key_index_root(key_index).map_err(internal)?;
        let node = derive(self.backend(), &self.shared.server_master, &path).map_err(internal)?;
        let public = self.backend().neuter(&node).map_err(internal)?;
        Ok(KeyWithPath(public, path))
    }

    fn address_at(
        &self,
        record: &WalletRecord,
        path: &DerivationPath,
    ) -> Result<MultisigAddress, LedgerError> {
        let backend = self.backend();
        let key_index = path.key_index().ok_or_else(|| internal("path has no key index"))?;
        let primary = record
            .primary_keys
            .get(&key_index)
            .ok_or(LedgerError::ObjectNotFound)?;
        let relative = path.strip_key_index();
        let primary = derive_public_key(backend, primary, &relative).map_err(internal)?;
        let backup_root = &record.data.backup_public_key.0;
        let backup =
            derive_public_key(backend, backup_root, &path.without_hardening()).map_err(internal)?;
        let KeyWithPath(server, _) = record
            .data
            .blocktrail_public_keys
            .get(&key_index)
            .ok_or(LedgerError::ObjectNotFound)?;
        let server = derive_public_key(backend, server, &relative).map_err(internal)?;
        build_address(backend, &primary, &backup, &server, self.shared.network).map_err(internal)
    }

    fn issue(
        &self,
        record: &mut WalletRecord,
        parent: &DerivationPath,
    ) -> Result<(DerivationPath, MultisigAddress), LedgerError> {
        let key_index = parent.key_index().ok_or_else(|| internal("path has no key index"))?;
        let next = record.next_index.entry(key_index).or_insert(0);
        let path = parent.child(PathSegment::normal(*next).map_err(internal)?);
        *next += 1;
        let owned = self.address_at(record, &path)?;
        record
            .issued
            .insert(owned.address.clone(), (path.clone(), owned.script.clone()));
        Ok((path, owned))
    }

    /// Credit `value` to a fresh receive address of `identifier`.
    pub fn fund(&self, identifier: &str, value: u64) -> Result<Address, LedgerError> {
        let mut wallets = self.wallets();
        let record = wallets.get_mut(identifier).ok_or(LedgerError::ObjectNotFound)?;
        let parent = DerivationPath::receive_branch(record.data.key_index).map_err(internal)?;
        let (path, owned) = self.issue(record, &parent)?;
        let n = self.shared.funding_counter.fetch_add(1, Ordering::SeqCst);
        record.utxos.push(UtxoDescriptor {
            txid: txid_hex(&n.to_le_bytes()),
            index: 0,
            value,
            address: owned.address.clone(),
            redeem_script: owned.script,
            path,
        });
        Ok(owned.address)
    }

    /// Transactions accepted for `identifier`, oldest first.
    pub fn sent(&self, identifier: &str) -> Vec<SentTransaction> {
        self.wallets()
            .get(identifier)
            .map(|r| r.sent.clone())
            .unwrap_or_default()
    }

    /// Unspent outputs currently held for `identifier`.
    pub fn utxos(&self, identifier: &str) -> Vec<UtxoDescriptor> {
        self.wallets()
            .get(identifier)
            .map(|r| r.utxos.clone())
            .unwrap_or_default()
    }

    /// Verify the client's signature on input `i` and add the server's.
    fn cosign_input(
        &self,
        tx: &Transaction,
        i: usize,
        utxo: &UtxoDescriptor,
        primary_at_index: &KeyNode,
    ) -> Result<Vec<u8>, LedgerError> {
        let backend = self.backend();
        let (client_sig, redeem) = split_single_signature(&tx.inputs[i].script_sig)
            .ok_or_else(|| rejected(format!("input {i}: malformed unlocking script")))?;
        if redeem != utxo.redeem_script {
            return Err(rejected(format!("input {i}: redeem script mismatch")));
        }
        let Some((&sighash_type, der)) = client_sig.split_last() else {
            return Err(rejected(format!("input {i}: empty signature")));
        };
        if u32::from(sighash_type) != SIGHASH_ALL {
            return Err(rejected(format!("input {i}: unexpected sighash type")));
        }

        let digest = backend
            .signature_hash(tx, i, &redeem, SIGHASH_ALL)
            .map_err(internal)?;
        let relative = utxo.path.strip_key_index();
        let primary = derive_public_key(backend, primary_at_index, &relative).map_err(internal)?;

        let secp = Secp256k1::verification_only();
        let signature = secp256k1::ecdsa::Signature::from_der(der)
            .map_err(|e| rejected(format!("input {i}: {e}")))?;
        let key = secp256k1::PublicKey::from_slice(primary.as_bytes()).map_err(internal)?;
        secp.verify_ecdsa(&secp256k1::Message::from_digest(digest), &signature, &key)
            .map_err(|_| rejected(format!("input {i}: invalid primary signature")))?;

        let server_node =
            derive(backend, &self.shared.server_master, &utxo.path).map_err(internal)?;
        let server_pk = backend.public_key(&server_node).map_err(internal)?;
        let mut server_sig = backend.sign_digest(&server_node, &digest).map_err(internal)?;
        server_sig.push(SIGHASH_ALL as u8);

        let primary_pos = key_position(&redeem, &primary);
        let server_pos = key_position(&redeem, &server_pk);
        let signatures = match (primary_pos, server_pos) {
            (Some(p), Some(s)) if p < s => vec![client_sig, server_sig],
            (Some(_), Some(_)) => vec![server_sig, client_sig],
            _ => return Err(rejected(format!("input {i}: keys not in redeem script"))),
        };
        Ok(multisig_unlocking_script(&signatures, &redeem))
    }
}

impl LedgerService for InMemoryLedger {
    fn create_wallet(
        &self,
        request: &CreateWalletRequest,
    ) -> Result<CreateWalletResponse, LedgerError> {
        let mut wallets = self.wallets();
        if wallets.contains_key(&request.identifier) {
            return Err(LedgerError::EndpointSpecific {
                code: 1,
                msg: "wallet already exists".into(),
            });
        }
        let server_key = self.server_key(request.key_index)?;
        let server_keys: ServerKeys = [(request.key_index, server_key)].into();
        let data = WalletData {
            primary_mnemonic: request.primary_mnemonic.clone(),
            backup_public_key: request.backup_public_key.clone(),
            blocktrail_public_keys: server_keys.clone(),
            key_index: request.key_index,
            checksum: request.checksum.clone(),
        };
        wallets.insert(
            request.identifier.clone(),
            WalletRecord {
                data,
                primary_keys: [(request.key_index, request.primary_public_key.0.clone())].into(),
                next_index: BTreeMap::new(),
                issued: HashMap::new(),
                utxos: Vec::new(),
                locked: HashSet::new(),
                sent: Vec::new(),
            },
        );
        Ok(CreateWalletResponse {
            blocktrail_public_keys: server_keys,
            key_index: request.key_index,
        })
    }

    fn get_wallet(&self, identifier: &str) -> Result<WalletData, LedgerError> {
        self.wallets()
            .get(identifier)
            .map(|r| r.data.clone())
            .ok_or(LedgerError::ObjectNotFound)
    }

    fn upgrade_key_index(
        &self,
        identifier: &str,
        key_index: u32,
        primary_public_key: &KeyWithPath,
    ) -> Result<UpgradeKeyIndexResponse, LedgerError> {
        let mut wallets = self.wallets();
        let record = wallets.get_mut(identifier).ok_or(LedgerError::ObjectNotFound)?;
        let server_key = self.server_key(key_index)?;
        record.primary_keys.insert(key_index, primary_public_key.0.clone());
        record.data.blocktrail_public_keys.insert(key_index, server_key.clone());
        record.data.key_index = key_index;
        Ok(UpgradeKeyIndexResponse {
            blocktrail_public_keys: [(key_index, server_key)].into(),
        })
    }

    fn get_new_derivation(
        &self,
        identifier: &str,
        parent: &DerivationPath,
    ) -> Result<NewDerivation, LedgerError> {
        let mut wallets = self.wallets();
        let record = wallets.get_mut(identifier).ok_or(LedgerError::ObjectNotFound)?;
        let (path, owned) = self.issue(record, parent)?;
        let address = if self.shared.tamper_addresses.load(Ordering::SeqCst) {
            let last = path.segments().last().map(|s| s.index()).unwrap_or(0);
            let decoy = parent.child(PathSegment::normal(last + 1).map_err(internal)?);
            self.address_at(record, &decoy)?.address
        } else {
            owned.address
        };
        Ok(NewDerivation {
            path,
            address: address.to_string(),
        })
    }

    fn coin_selection(
        &self,
        identifier: &str,
        outputs: &[Recipient],
        lock_utxos: bool,
        _allow_zero_conf: bool,
    ) -> Result<CoinSelection, LedgerError> {
        let mut wallets = self.wallets();
        let record = wallets.get_mut(identifier).ok_or(LedgerError::ObjectNotFound)?;
        let target = outputs.iter().map(|r| r.value).sum::<u64>() + SERVICE_FEE;

        let mut chosen = Vec::new();
        let mut total = 0u64;
        for utxo in &record.utxos {
            if total >= target {
                break;
            }
            if record.locked.contains(&(utxo.txid.clone(), utxo.index)) {
                continue;
            }
            total += utxo.value;
            chosen.push(utxo.clone());
        }
        if total < target {
            return Err(LedgerError::CoinSelection {
                code: 0,
                msg: format!("insufficient funds: have {total}, need {target}"),
            });
        }
        if lock_utxos {
            record
                .locked
                .extend(chosen.iter().map(|u| (u.txid.clone(), u.index)));
        }
        Ok(CoinSelection {
            utxos: chosen,
            fee: SERVICE_FEE,
            change: total - target,
        })
    }

    fn send_transaction(
        &self,
        identifier: &str,
        raw_transaction: &str,
        paths: &[DerivationPath],
        check_fee: bool,
    ) -> Result<String, LedgerError> {
        let backend = self.backend();
        let submitted = hex::decode(raw_transaction).map_err(|e| rejected(e.to_string()))?;
        let tx = backend
            .deserialize_transaction(&submitted)
            .map_err(|e| rejected(e.to_string()))?;
        if paths.len() != tx.inputs.len() {
            return Err(rejected("one path per input required"));
        }

        let mut wallets = self.wallets();
        let record = wallets.get_mut(identifier).ok_or(LedgerError::ObjectNotFound)?;

        let mut spent = Vec::with_capacity(tx.inputs.len());
        for (input, path) in tx.inputs.iter().zip(paths) {
            let prev = input.previous_output;
            let utxo = record
                .utxos
                .iter()
                .find(|u| u.outpoint().map(|o| o == prev).unwrap_or(false))
                .ok_or_else(|| {
                    rejected(format!("unknown input {}:{}", prev.txid_hex(), prev.vout))
                })?;
            if &utxo.path != path {
                return Err(rejected(format!("path mismatch for {}", utxo.path)));
            }
            spent.push(utxo.clone());
        }

        let input_total: u64 = spent.iter().map(|u| u.value).sum();
        let output_total = tx.output_total().ok_or_else(|| rejected("output overflow"))?;
        let fee = input_total
            .checked_sub(output_total)
            .ok_or_else(|| rejected("outputs exceed inputs"))?;
        if check_fee && fee < SERVICE_FEE {
            return Err(rejected(format!("fee {fee} below {SERVICE_FEE}")));
        }

        let mut cosigned = tx.clone();
        for (i, utxo) in spent.iter().enumerate() {
            let key_index = utxo.path.key_index().ok_or_else(|| rejected("path has no key index"))?;
            let primary = record
                .primary_keys
                .get(&key_index)
                .ok_or_else(|| rejected(format!("no primary key for index {key_index}")))?;
            cosigned.inputs[i].script_sig = self.cosign_input(&tx, i, utxo, primary)?;
        }

        let raw = backend.serialize_transaction(&cosigned).map_err(internal)?;
        let txid = txid_hex(&raw);

        let spent_ids: HashSet<(String, u32)> =
            spent.iter().map(|u| (u.txid.clone(), u.index)).collect();
        record.utxos.retain(|u| !spent_ids.contains(&(u.txid.clone(), u.index)));
        record.locked.retain(|id| !spent_ids.contains(id));
        for (vout, output) in cosigned.outputs.iter().enumerate() {
            let owned = record
                .issued
                .iter()
                .find(|(address, _)| address.script_pubkey() == output.script_pubkey);
            if let Some((address, (path, script))) = owned {
                record.utxos.push(UtxoDescriptor {
                    txid: txid.clone(),
                    index: vout as u32,
                    value: output.value,
                    address: address.clone(),
                    redeem_script: script.clone(),
                    path: path.clone(),
                });
            }
        }
        record.sent.push(SentTransaction {
            txid: txid.clone(),
            submitted,
            cosigned,
            paths: paths.to_vec(),
        });
        Ok(txid)
    }

    fn wallet_balance(&self, identifier: &str) -> Result<WalletBalance, LedgerError> {
        let wallets = self.wallets();
        let record = wallets.get(identifier).ok_or(LedgerError::ObjectNotFound)?;
        let confirmed = record.utxos.iter().map(|u| u.value as i64).sum();
        Ok(WalletBalance {
            confirmed,
            unconfirmed: 0,
        })
    }

    fn wallet_discovery(&self, identifier: &str, _gap: u32) -> Result<WalletBalance, LedgerError> {
        self.wallet_balance(identifier)
    }
}

/// Ledger pre-loaded with the known wallet: fixture primary and backup
/// phrases at key index 9999 and the fixture server public key.
///
/// The service does not hold the fixture server's private key, so it can
/// hand out addresses but not co-sign for this wallet.
pub fn known_wallet_ledger() -> InMemoryLedger {
    let ledger = InMemoryLedger::testnet();
    let backend = Secp256k1Backend::new();
    let seed = cosign_wallet::mnemonic::seed_from_mnemonic(PRIMARY_MNEMONIC, PRIMARY_PASSPHRASE);
    let primary = backend.master_key(&seed[..], Network::Testnet).expect("fixture seed");
    let primary_public = backend.public_key(&primary).expect("public key");
    let checksum = Address::p2pkh(&primary_public, Network::Testnet);
    let root = DerivationPath::key_index_root(KEY_INDEX).expect("key index");
    let primary_at_index = backend
        .neuter(&derive(&backend, &primary, &root).expect("derive"))
        .expect("neuter");

    let backup_seed = cosign_wallet::mnemonic::seed_from_mnemonic(BACKUP_MNEMONIC, "");
    let backup = backend
        .neuter(&backend.master_key(&backup_seed[..], Network::Testnet).expect("backup seed"))
        .expect("neuter");
    let server: KeyNode = SERVER_TPUB.parse().expect("fixture tpub");

    ledger.wallets().insert(
        "unittest".into(),
        WalletRecord {
            data: WalletData {
                primary_mnemonic: PRIMARY_MNEMONIC.into(),
                backup_public_key: KeyWithPath(backup, DerivationPath::master()),
                blocktrail_public_keys: [(KEY_INDEX, KeyWithPath(server, root))].into(),
                key_index: KEY_INDEX,
                checksum: checksum.to_string(),
            },
            primary_keys: [(KEY_INDEX, primary_at_index)].into(),
            next_index: BTreeMap::new(),
            issued: HashMap::new(),
            utxos: Vec::new(),
            locked: HashSet::new(),
            sent: Vec::new(),
        },
    );
    ledger
}
