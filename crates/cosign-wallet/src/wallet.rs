//! The wallet: identity plus a ledger service plus a crypto backend.
//!
//! Every address the service hands out is re-derived locally before it is
//! returned or used as change; every payment is signed locally and only then
//! sent to the service for co-signing.

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use cosign_core::address::Address;
use cosign_core::backend::Secp256k1Backend;
use cosign_core::derive::derive;
use cosign_core::error::AddressError;
use cosign_core::keys::KeyNode;
use cosign_core::multisig::MultisigAddress;
use cosign_core::network::Network;
use cosign_core::path::DerivationPath;
use cosign_core::traits::{CryptoBackend, LedgerService};
use cosign_core::types::{
    CreateWalletRequest, KeyWithPath, NewDerivation, Recipient, WalletBalance,
};

use crate::builder::{ChangePosition, TransactionBuilder, validate_recipients};
use crate::error::WalletError;
use crate::identity::{WalletIdentity, WalletState};
use crate::mnemonic::{check_phrase, generate_mnemonic, seed_from_mnemonic};
use crate::verify::{address_for_path, verify_derivation};

/// Whether service-issued addresses are checked against local derivation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AddressVerification {
    #[default]
    Enabled,
    /// Trust the service's addresses as returned. Only for tests against a
    /// service whose keys cannot be reproduced locally.
    DisabledForTesting,
}

/// Options for creating or opening a wallet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WalletOptions {
    pub network: Network,
    /// Key index registered on create. Opening uses the stored index.
    pub key_index: u32,
    pub verification: AddressVerification,
}

impl Default for WalletOptions {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            key_index: 0,
            verification: AddressVerification::Enabled,
        }
    }
}

/// Per-payment policy flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayOptions {
    /// Ask the service to lock the selected UTXOs.
    pub lock_utxos: bool,
    /// Allow unconfirmed UTXOs in the selection.
    pub allow_zero_conf: bool,
    /// Put the change output at a random position instead of last.
    pub randomize_change: bool,
    /// Ask the service to check the fee before co-signing.
    pub check_fee: bool,
}

impl Default for PayOptions {
    fn default() -> Self {
        Self {
            lock_utxos: true,
            allow_zero_conf: false,
            randomize_change: true,
            check_fee: true,
        }
    }
}

/// A freshly registered wallet and the backup phrase the service never saw.
pub struct NewWallet<L: LedgerService, B: CryptoBackend = Secp256k1Backend> {
    pub wallet: Wallet<L, B>,
    pub backup_mnemonic: Zeroizing<String>,
}

/// A 2-of-3 multisig wallet bound to a ledger service.
pub struct Wallet<L: LedgerService, B: CryptoBackend = Secp256k1Backend> {
    ledger: L,
    backend: B,
    identity: WalletIdentity,
    primary_mnemonic: Zeroizing<String>,
    checksum: String,
    verification: AddressVerification,
}

/// Primary master key and its checksum address.
fn primary_from_phrase<B: CryptoBackend>(
    backend: &B,
    phrase: &str,
    passphrase: &str,
    network: Network,
) -> Result<(KeyNode, String), WalletError> {
    check_phrase(phrase)?;
    let seed = seed_from_mnemonic(phrase, passphrase);
    let master = backend.master_key(&seed[..], network)?;
    let checksum = Address::p2pkh(&backend.public_key(&master)?, network).to_string();
    Ok((master, checksum))
}

/// Primary public key at `M/<key_index>'`, in wire form.
fn primary_public_key<B: CryptoBackend>(
    backend: &B,
    primary: &KeyNode,
    key_index: u32,
) -> Result<KeyWithPath, WalletError> {
    let path = DerivationPath::key_index_root(key_index)?;
    let node = backend.neuter(&derive(backend, primary, &path)?)?;
    Ok(KeyWithPath(node, path))
}

fn warn_if_unverified(verification: AddressVerification) {
    if verification == AddressVerification::DisabledForTesting {
        warn!("address verification disabled; service addresses are trusted as returned");
    }
}

impl<L: LedgerService, B: CryptoBackend> Wallet<L, B> {
    /// Generate primary and backup phrases and register the wallet.
    pub fn create(
        ledger: L,
        backend: B,
        identifier: &str,
        passphrase: &str,
        options: WalletOptions,
    ) -> Result<NewWallet<L, B>, WalletError> {
        let network = options.network;
        let primary_mnemonic = generate_mnemonic()?;
        let backup_mnemonic = generate_mnemonic()?;

        let (primary, checksum) =
            primary_from_phrase(&backend, &primary_mnemonic, passphrase, network)?;
        let backup_seed = seed_from_mnemonic(&backup_mnemonic, "");
        let backup = backend.neuter(&backend.master_key(&backup_seed[..], network)?)?;

        let request = CreateWalletRequest {
            identifier: identifier.to_string(),
            primary_public_key: primary_public_key(&backend, &primary, options.key_index)?,
            backup_public_key: KeyWithPath(backup.clone(), DerivationPath::master()),
            primary_mnemonic: primary_mnemonic.to_string(),
            checksum: checksum.clone(),
            key_index: options.key_index,
        };
        let response = ledger.create_wallet(&request)?;

        let identity = WalletIdentity::new(
            identifier,
            network,
            response.key_index,
            primary,
            backup,
            response.blocktrail_public_keys,
        )?;
        info!(identifier, key_index = response.key_index, %network, "wallet created");
        warn_if_unverified(options.verification);

        Ok(NewWallet {
            wallet: Self {
                ledger,
                backend,
                identity,
                primary_mnemonic,
                checksum,
                verification: options.verification,
            },
            backup_mnemonic,
        })
    }

    /// Fetch a stored wallet and unlock it with `passphrase`.
    pub fn open(
        ledger: L,
        backend: B,
        identifier: &str,
        passphrase: &str,
        options: WalletOptions,
    ) -> Result<Self, WalletError> {
        let data = ledger.get_wallet(identifier)?;
        let state = WalletState {
            identifier: identifier.to_string(),
            network: options.network,
            key_index: data.key_index,
            primary_mnemonic: data.primary_mnemonic,
            checksum: data.checksum,
            backup_public_key: data.backup_public_key.0,
            server_keys: data.blocktrail_public_keys,
        };
        let wallet = Self::from_state(ledger, backend, state, passphrase, options.verification)?;
        info!(identifier, key_index = wallet.key_index(), "wallet opened");
        Ok(wallet)
    }

    /// Reopen from persisted state.
    ///
    /// Fails with [`WalletError::ChecksumMismatch`] when `passphrase` does
    /// not reproduce the stored checksum.
    pub fn from_state(
        ledger: L,
        backend: B,
        state: WalletState,
        passphrase: &str,
        verification: AddressVerification,
    ) -> Result<Self, WalletError> {
        let WalletState {
            identifier,
            network,
            key_index,
            primary_mnemonic,
            checksum,
            backup_public_key,
            server_keys,
        } = state;
        let primary_mnemonic = Zeroizing::new(primary_mnemonic);

        let (primary, local_checksum) =
            primary_from_phrase(&backend, &primary_mnemonic, passphrase, network)?;
        if local_checksum != checksum {
            return Err(WalletError::ChecksumMismatch);
        }

        let identity =
            WalletIdentity::new(
                identifier,
                network,
                key_index,
                primary,
                backup_public_key,
                server_keys,
            )?;
        warn_if_unverified(verification);
        Ok(Self {
            ledger,
            backend,
            identity,
            primary_mnemonic,
            checksum,
            verification,
        })
    }

    /// Persistable snapshot of this wallet.
    pub fn state(&self) -> WalletState {
        WalletState {
            identifier: self.identity.identifier().to_string(),
            network: self.identity.network(),
            key_index: self.identity.key_index(),
            primary_mnemonic: self.primary_mnemonic.to_string(),
            checksum: self.checksum.clone(),
            backup_public_key: self.identity.backup().clone(),
            server_keys: self.identity.server_keys().clone(),
        }
    }

    pub fn identifier(&self) -> &str {
        self.identity.identifier()
    }

    pub fn network(&self) -> Network {
        self.identity.network()
    }

    pub fn key_index(&self) -> u32 {
        self.identity.key_index()
    }

    pub fn identity(&self) -> &WalletIdentity {
        &self.identity
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Multisig address and redeem script at `path`, derived locally.
    pub fn address_for_path(&self, path: &DerivationPath) -> Result<MultisigAddress, WalletError> {
        address_for_path(&self.backend, &self.identity, path)
    }

    /// Ask the service for the next receive path. The address is unverified.
    pub fn get_new_derivation(&self) -> Result<NewDerivation, WalletError> {
        let parent = DerivationPath::receive_branch(self.key_index())?;
        let derivation = self.ledger.get_new_derivation(self.identifier(), &parent)?;
        debug!(path = %derivation.path, "service allocated derivation");
        Ok(derivation)
    }

    /// Next receive path and its address, checked against local derivation.
    pub fn get_new_address_pair(&self) -> Result<(DerivationPath, Address), WalletError> {
        let NewDerivation { path, address } = self.get_new_derivation()?;
        let address = match self.verification {
            AddressVerification::Enabled => {
                verify_derivation(&self.backend, &self.identity, &path, &address)?.address
            }
            AddressVerification::DisabledForTesting => Address::parse_on(&address, self.network())?,
        };
        Ok((path, address))
    }

    pub fn get_new_address(&self) -> Result<Address, WalletError> {
        self.get_new_address_pair().map(|(_, address)| address)
    }

    pub fn balance(&self) -> Result<WalletBalance, WalletError> {
        Ok(self.ledger.wallet_balance(self.identifier())?)
    }

    /// Have the service rescan the address space with gap limit `gap`.
    pub fn discovery(&self, gap: u32) -> Result<WalletBalance, WalletError> {
        info!(identifier = self.identifier(), gap, "starting discovery");
        Ok(self.ledger.wallet_discovery(self.identifier(), gap)?)
    }

    /// Move to a higher key index and register the matching primary key.
    pub fn upgrade_key_index(&mut self, key_index: u32) -> Result<(), WalletError> {
        let current = self.key_index();
        if key_index <= current {
            return Err(WalletError::KeyIndexDowngrade {
                current,
                requested: key_index,
            });
        }
        let primary = primary_public_key(&self.backend, self.identity.primary(), key_index)?;
        let mut response = self.ledger.upgrade_key_index(self.identifier(), key_index, &primary)?;
        let server_key = response
            .blocktrail_public_keys
            .remove(&key_index)
            .ok_or(WalletError::UnknownKeyIndex(key_index))?;
        self.identity.upgrade(key_index, server_key)?;
        info!(identifier = self.identifier(), from = current, to = key_index, "key index upgraded");
        Ok(())
    }

    /// Pay `recipients`, returning the txid the service broadcast.
    ///
    /// When the selection returns change and no `change_address` is given, a
    /// fresh verified address is requested for it. A `change_address` that
    /// repeats a recipient is rejected.
    pub fn pay(
        &self,
        recipients: &[Recipient],
        change_address: Option<Address>,
        options: PayOptions,
    ) -> Result<String, WalletError> {
        let network = self.network();
        let total = validate_recipients(recipients, network)?;
        if let Some(change) = &change_address {
            if change.network() != network {
                return Err(AddressError::WrongNetwork {
                    address: change.to_string(),
                    expected: network.to_string(),
                }
                .into());
            }
            if recipients.iter().any(|r| r.address == *change) {
                return Err(WalletError::DuplicateRecipient(change.to_string()));
            }
        }

        let selection = self.ledger.coin_selection(
            self.identifier(),
            recipients,
            options.lock_utxos,
            options.allow_zero_conf,
        )?;
        debug!(
            inputs = selection.utxos.len(),
            fee = selection.fee,
            change = selection.change,
            "coin selection received"
        );

        if self.verification == AddressVerification::Enabled {
            for utxo in &selection.utxos {
                let local = self.address_for_path(&utxo.path)?;
                if local.address != utxo.address {
                    return Err(WalletError::Integrity {
                        path: utxo.path.to_string(),
                        server: utxo.address.to_string(),
                        local: local.address.to_string(),
                    });
                }
            }
        }

        let mut builder = TransactionBuilder::new(network);
        for recipient in recipients {
            builder.add_recipient(recipient.clone());
        }
        if selection.change > 0 {
            let change = match change_address {
                Some(address) => address,
                None => self.get_new_address()?,
            };
            builder.set_change_address(change);
        }
        if options.randomize_change {
            builder.set_change_position(ChangePosition::Random);
        }

        let unsigned = builder.build(selection)?;
        let signed = TransactionBuilder::sign(unsigned, &self.backend, self.identity.primary())?;
        let txid = self.ledger.send_transaction(
            self.identifier(),
            &signed.raw_hex(),
            &signed.paths,
            options.check_fee,
        )?;
        info!(identifier = self.identifier(), %txid, amount = total, "payment sent");
        Ok(txid)
    }
}
