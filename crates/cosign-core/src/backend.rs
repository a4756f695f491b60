//! secp256k1 backend built on the `bitcoin` crate.
//!
//! Key nodes cross the boundary in their canonical 78-byte BIP32 form, and
//! transactions in the core's own [`Transaction`] shape, so nothing outside
//! this module depends on `bitcoin` types.

use bitcoin::absolute::LockTime;
use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::script::{Builder, Script, ScriptBuf};
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::SighashCache;
use bitcoin::transaction::Version;
use bitcoin::{Amount, Sequence, TxIn, TxOut, Txid, Witness};

use crate::error::{CryptoError, DerivationError};
use crate::keys::{KeyNode, PublicKey};
use crate::network::Network;
use crate::path::PathSegment;
use crate::traits::CryptoBackend;
use crate::types::{OutPoint, Transaction, TxInput, TxOutput};

/// Largest key count a standard `OP_CHECKMULTISIG` script accepts.
const MAX_MULTISIG_KEYS: usize = 16;

/// [`CryptoBackend`] over libsecp256k1.
pub struct Secp256k1Backend {
    secp: Secp256k1<All>,
}

impl Secp256k1Backend {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }
}

impl Default for Secp256k1Backend {
    fn default() -> Self {
        Self::new()
    }
}

fn backend_err(e: impl std::fmt::Display) -> DerivationError {
    DerivationError::Backend(e.to_string())
}

fn bitcoin_network(network: Network) -> bitcoin::Network {
    match network {
        Network::Mainnet => bitcoin::Network::Bitcoin,
        Network::Testnet => bitcoin::Network::Testnet,
    }
}

fn to_bitcoin(tx: &Transaction) -> bitcoin::Transaction {
    bitcoin::Transaction {
        version: Version(tx.version),
        lock_time: LockTime::from_consensus(tx.lock_time),
        input: tx
            .inputs
            .iter()
            .map(|input| TxIn {
                previous_output: bitcoin::OutPoint {
                    txid: Txid::from_byte_array(input.previous_output.txid),
                    vout: input.previous_output.vout,
                },
                script_sig: ScriptBuf::from_bytes(input.script_sig.clone()),
                sequence: Sequence(input.sequence),
                witness: Witness::new(),
            })
            .collect(),
        output: tx
            .outputs
            .iter()
            .map(|output| TxOut {
                value: Amount::from_sat(output.value),
                script_pubkey: ScriptBuf::from_bytes(output.script_pubkey.clone()),
            })
            .collect(),
    }
}

fn from_bitcoin(tx: bitcoin::Transaction) -> Result<Transaction, CryptoError> {
    if tx.input.iter().any(|input| !input.witness.is_empty()) {
        return Err(CryptoError::Serialization("witness data is not supported".into()));
    }
    Ok(Transaction {
        version: tx.version.0,
        lock_time: tx.lock_time.to_consensus_u32(),
        inputs: tx
            .input
            .into_iter()
            .map(|input| TxInput {
                previous_output: OutPoint {
                    txid: input.previous_output.txid.to_byte_array(),
                    vout: input.previous_output.vout,
                },
                script_sig: input.script_sig.into_bytes(),
                sequence: input.sequence.0,
            })
            .collect(),
        outputs: tx
            .output
            .into_iter()
            .map(|output| TxOutput {
                value: output.value.to_sat(),
                script_pubkey: output.script_pubkey.into_bytes(),
            })
            .collect(),
    })
}

impl CryptoBackend for Secp256k1Backend {
    fn master_key(&self, seed: &[u8], network: Network) -> Result<KeyNode, DerivationError> {
        let master = Xpriv::new_master(bitcoin_network(network), seed).map_err(backend_err)?;
        KeyNode::decode(&master.encode())
    }

    fn derive_child(
        &self,
        parent: &KeyNode,
        segment: PathSegment,
    ) -> Result<KeyNode, DerivationError> {
        let child = ChildNumber::from(segment.child_number());
        let data = parent.encode();
        if parent.is_private() {
            let xpriv = Xpriv::decode(&data).map_err(backend_err)?;
            let derived = xpriv.derive_priv(&self.secp, &[child]).map_err(backend_err)?;
            KeyNode::decode(&derived.encode())
        } else {
            if segment.is_hardened() {
                return Err(DerivationError::HardenedFromPublic {
                    index: segment.index(),
                });
            }
            let xpub = Xpub::decode(&data).map_err(backend_err)?;
            let derived = xpub.derive_pub(&self.secp, &[child]).map_err(backend_err)?;
            KeyNode::decode(&derived.encode())
        }
    }

    fn neuter(&self, node: &KeyNode) -> Result<KeyNode, DerivationError> {
        if !node.is_private() {
            return Ok(node.clone());
        }
        let xpriv = Xpriv::decode(&node.encode()).map_err(backend_err)?;
        KeyNode::decode(&Xpub::from_priv(&self.secp, &xpriv).encode())
    }

    fn multisig_script(
        &self,
        threshold: usize,
        keys: &[PublicKey],
    ) -> Result<Vec<u8>, CryptoError> {
        if threshold == 0 || threshold > keys.len() || keys.len() > MAX_MULTISIG_KEYS {
            return Err(CryptoError::WrongKeyCount {
                expected: threshold.max(1),
                got: keys.len(),
            });
        }
        let mut builder = Builder::new().push_int(threshold as i64);
        for key in keys {
            let pk = bitcoin::PublicKey::from_slice(key.as_bytes())
                .map_err(|_| CryptoError::InvalidPublicKey)?;
            builder = builder.push_key(&pk);
        }
        Ok(builder
            .push_int(keys.len() as i64)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script()
            .into_bytes())
    }

    fn signature_hash(
        &self,
        tx: &Transaction,
        input_index: usize,
        script_code: &[u8],
        sighash_type: u32,
    ) -> Result<[u8; 32], CryptoError> {
        if input_index >= tx.inputs.len() {
            return Err(CryptoError::InputIndexOutOfBounds {
                index: input_index,
                len: tx.inputs.len(),
            });
        }
        let btx = to_bitcoin(tx);
        let cache = SighashCache::new(&btx);
        let hash = cache
            .legacy_signature_hash(input_index, Script::from_bytes(script_code), sighash_type)
            .map_err(|e| CryptoError::SignatureHash(e.to_string()))?;
        Ok(hash.to_byte_array())
    }

    fn sign_digest(&self, key: &KeyNode, digest: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
        let secret = key.secret_bytes().ok_or(CryptoError::PrivateKeyRequired)?;
        let secret_key =
            SecretKey::from_slice(secret).map_err(|e| CryptoError::Signing(e.to_string()))?;
        let message = Message::from_digest(*digest);
        let signature = self.secp.sign_ecdsa(&message, &secret_key);
        Ok(signature.serialize_der().to_vec())
    }

    fn serialize_transaction(&self, tx: &Transaction) -> Result<Vec<u8>, CryptoError> {
        Ok(encode::serialize(&to_bitcoin(tx)))
    }

    fn deserialize_transaction(&self, bytes: &[u8]) -> Result<Transaction, CryptoError> {
        let tx: bitcoin::Transaction =
            encode::deserialize(bytes).map_err(|e| CryptoError::Serialization(e.to_string()))?;
        from_bitcoin(tx)
    }
}
