//! Transaction construction and signing from a service coin selection.
//!
//! 1. Add recipients and, if the selection returns change, a change address
//! 2. [`TransactionBuilder::build`] checks the selection and lays out inputs
//!    and outputs
//! 3. [`TransactionBuilder::sign`] signs every input with the primary key and
//!    only then attaches the unlocking scripts
//!
//! Inputs follow the coin-selection order. Each input spends a 2-of-3 P2SH
//! output; the client contributes one signature and the service adds the
//! second when the transaction is submitted.

use std::collections::HashSet;

use rand::Rng;
use tracing::debug;

use cosign_core::address::Address;
use cosign_core::constants::{SEQUENCE_FINAL, SIGHASH_ALL, TX_VERSION};
use cosign_core::derive::derive;
use cosign_core::error::AddressError;
use cosign_core::keys::KeyNode;
use cosign_core::network::Network;
use cosign_core::path::DerivationPath;
use cosign_core::script::multisig_unlocking_script;
use cosign_core::traits::CryptoBackend;
use cosign_core::types::{CoinSelection, Recipient, Transaction, TxInput, TxOutput};

use crate::error::WalletError;

/// Where the change output goes among the outputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChangePosition {
    /// After every recipient.
    #[default]
    Last,
    /// At a uniformly random position, chosen before signing.
    Random,
}

/// Validate a payment's outputs and return their total.
///
/// Rejects an empty list, zero values, addresses on another network and
/// repeated addresses.
pub fn validate_recipients(recipients: &[Recipient], network: Network) -> Result<u64, WalletError> {
    if recipients.is_empty() {
        return Err(WalletError::NoRecipients);
    }
    let mut seen = HashSet::with_capacity(recipients.len());
    let mut total: u64 = 0;
    for r in recipients {
        if r.value == 0 {
            return Err(WalletError::InvalidAmount(format!("zero value for {}", r.address)));
        }
        if r.address.network() != network {
            return Err(AddressError::WrongNetwork {
                address: r.address.to_string(),
                expected: network.to_string(),
            }
            .into());
        }
        if !seen.insert(&r.address) {
            return Err(WalletError::DuplicateRecipient(r.address.to_string()));
        }
        total = total
            .checked_add(r.value)
            .ok_or_else(|| WalletError::InvalidAmount("total amount overflow".into()))?;
    }
    Ok(total)
}

/// A laid-out transaction with empty unlocking scripts.
#[derive(Debug)]
pub struct UnsignedTransaction {
    /// The transaction; input `i` spends `selection.utxos[i]`.
    pub tx: Transaction,
    /// The coin selection this transaction spends.
    pub selection: CoinSelection,
}

/// A transaction carrying the primary signature on every input.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub tx: Transaction,
    /// Canonical wire encoding of `tx`.
    pub raw: Vec<u8>,
    /// Derivation path of each input, in input order.
    pub paths: Vec<DerivationPath>,
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        hex::encode(&self.raw)
    }
}

/// Builder for payment transactions.
pub struct TransactionBuilder {
    network: Network,
    recipients: Vec<Recipient>,
    change_address: Option<Address>,
    change_position: ChangePosition,
}

impl TransactionBuilder {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            recipients: Vec::new(),
            change_address: None,
            change_position: ChangePosition::Last,
        }
    }

    /// Add a recipient to the transaction.
    pub fn add_recipient(&mut self, recipient: Recipient) -> &mut Self {
        self.recipients.push(recipient);
        self
    }

    /// Address that receives the selection's change, if any.
    pub fn set_change_address(&mut self, address: Address) -> &mut Self {
        self.change_address = Some(address);
        self
    }

    pub fn set_change_position(&mut self, position: ChangePosition) -> &mut Self {
        self.change_position = position;
        self
    }

    /// Lay out the transaction for `selection`.
    ///
    /// Fails unless `sum(utxos) == sum(outputs) + fee + change`, a change
    /// address is set whenever change is non-zero, and every redeem script
    /// hashes to the address of its UTXO.
    pub fn build(&self, selection: CoinSelection) -> Result<UnsignedTransaction, WalletError> {
        let total_send = validate_recipients(&self.recipients, self.network)?;
        if selection.utxos.is_empty() {
            return Err(WalletError::InconsistentSelection("no inputs selected".into()));
        }
        let input_total = selection
            .input_total()
            .ok_or_else(|| WalletError::InconsistentSelection("input total overflow".into()))?;
        let spend_total = total_send
            .checked_add(selection.fee)
            .and_then(|v| v.checked_add(selection.change))
            .ok_or_else(|| WalletError::InconsistentSelection("output total overflow".into()))?;
        if input_total != spend_total {
            return Err(WalletError::InconsistentSelection(format!(
                "inputs {input_total} != outputs {total_send} + fee {} + change {}",
                selection.fee, selection.change
            )));
        }

        let mut inputs = Vec::with_capacity(selection.utxos.len());
        for utxo in &selection.utxos {
            let script_address = Address::p2sh(&utxo.redeem_script, self.network);
            if script_address != utxo.address {
                return Err(WalletError::Integrity {
                    path: utxo.path.to_string(),
                    server: utxo.address.to_string(),
                    local: script_address.to_string(),
                });
            }
            inputs.push(TxInput {
                previous_output: utxo.outpoint()?,
                script_sig: Vec::new(),
                sequence: SEQUENCE_FINAL,
            });
        }

        let mut outputs: Vec<TxOutput> = self
            .recipients
            .iter()
            .map(|r| TxOutput {
                value: r.value,
                script_pubkey: r.address.script_pubkey(),
            })
            .collect();

        if selection.change > 0 {
            let change_address = self.change_address.as_ref().ok_or_else(|| {
                WalletError::InconsistentSelection("change returned but no change address".into())
            })?;
            let change = TxOutput {
                value: selection.change,
                script_pubkey: change_address.script_pubkey(),
            };
            let position = match self.change_position {
                ChangePosition::Last => outputs.len(),
                ChangePosition::Random => rand::thread_rng().gen_range(0..=outputs.len()),
            };
            outputs.insert(position, change);
        }

        let tx = Transaction {
            version: TX_VERSION,
            inputs,
            outputs,
            lock_time: 0,
        };
        Ok(UnsignedTransaction { tx, selection })
    }

    /// Sign every input with the key `primary` derives at the UTXO's path.
    ///
    /// All signatures are produced before any is attached, so a failure on
    /// any input returns an error and no partially signed transaction.
    pub fn sign<B: CryptoBackend + ?Sized>(
        unsigned: UnsignedTransaction,
        backend: &B,
        primary: &KeyNode,
    ) -> Result<SignedTransaction, WalletError> {
        let UnsignedTransaction { mut tx, selection } = unsigned;

        let mut signatures = Vec::with_capacity(selection.utxos.len());
        for (i, utxo) in selection.utxos.iter().enumerate() {
            let key = derive(backend, primary, &utxo.path)?;
            let digest = backend.signature_hash(&tx, i, &utxo.redeem_script, SIGHASH_ALL)?;
            let mut signature = backend.sign_digest(&key, &digest)?;
            signature.push(SIGHASH_ALL as u8);
            debug!(input = i, path = %utxo.path, "signed input");
            signatures.push(signature);
        }

        for ((input, utxo), signature) in
            tx.inputs.iter_mut().zip(&selection.utxos).zip(signatures)
        {
            input.script_sig = multisig_unlocking_script(&[signature], &utxo.redeem_script);
        }

        let raw = backend.serialize_transaction(&tx)?;
        let paths = selection.utxos.into_iter().map(|u| u.path).collect();
        Ok(SignedTransaction { tx, raw, paths })
    }
}
