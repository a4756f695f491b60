//! End-to-end tests for the Cosign wallet client.
//!
//! Each test drives a wallet against an [`InMemoryLedger`] that derives
//! addresses independently and co-signs what the wallet submits, covering
//! creation, reopening, address issuance and verification, key-index
//! upgrades and the full pay flow.

use cosign_core::backend::Secp256k1Backend;
use cosign_core::error::LedgerError;
use cosign_core::network::Network;
use cosign_core::path::DerivationPath;
use cosign_core::traits::{CryptoBackend, LedgerService};
use cosign_core::types::Recipient;
use cosign_tests::helpers::*;
use cosign_wallet::{
    AddressVerification, PayOptions, Wallet, WalletError, WalletOptions, WalletState,
};

fn testnet(key_index: u32) -> WalletOptions {
    WalletOptions {
        network: Network::Testnet,
        key_index,
        verification: AddressVerification::Enabled,
    }
}

fn open_known(ledger: &InMemoryLedger) -> Wallet<InMemoryLedger> {
    Wallet::open(
        ledger.clone(),
        Secp256k1Backend::new(),
        "unittest",
        PRIMARY_PASSPHRASE,
        testnet(0),
    )
    .unwrap()
}

fn create(ledger: &InMemoryLedger, identifier: &str) -> Wallet<InMemoryLedger> {
    Wallet::create(
        ledger.clone(),
        Secp256k1Backend::new(),
        identifier,
        "hunter2",
        testnet(0),
    )
    .unwrap()
    .wallet
}

fn change_last() -> PayOptions {
    PayOptions {
        randomize_change: false,
        ..PayOptions::default()
    }
}

fn external(value: u64) -> Recipient {
    Recipient::new("2N65RcfKHiKQcPGZAA2QVeqitJvAQ8HroHD".parse().unwrap(), value)
}

/// Split an unlocking script into its pushes, skipping the leading `OP_0`.
fn pushes(script: &[u8]) -> Vec<Vec<u8>> {
    assert_eq!(script[0], 0x00);
    let mut out = Vec::new();
    let mut i = 1;
    while i < script.len() {
        let (len, start) = match script[i] {
            0x4c => (script[i + 1] as usize, i + 2),
            n => (n as usize, i + 1),
        };
        out.push(script[start..start + len].to_vec());
        i = start + len;
    }
    out
}

// ------------------------------------------------------------------
// Known wallet
// ------------------------------------------------------------------

#[test]
fn service_issues_known_addresses() {
    let ledger = known_wallet_ledger();
    let wallet = open_known(&ledger);
    assert_eq!(wallet.key_index(), KEY_INDEX);

    for expected in ["2MzyKviSL6pnWxkbHV7ecFRE3hWKfzmT8WS", "2N65RcfKHiKQcPGZAA2QVeqitJvAQ8HroHD"] {
        let (_, address) = wallet.get_new_address_pair().unwrap();
        assert_eq!(address.to_string(), expected);
    }
    for (path, expected) in KNOWN_ADDRESSES {
        let out = wallet.address_for_path(&path.parse().unwrap()).unwrap();
        assert_eq!(out.address.to_string(), expected);
    }
}

#[test]
fn tampered_service_address_is_rejected() {
    let ledger = known_wallet_ledger();
    let wallet = open_known(&ledger);
    ledger.set_tamper_addresses(true);
    match wallet.get_new_address_pair() {
        Err(WalletError::Integrity { path, server, local }) => {
            assert_eq!(path, "M/9999'/0/0");
            assert_eq!(server, "2N65RcfKHiKQcPGZAA2QVeqitJvAQ8HroHD");
            assert_eq!(local, "2MzyKviSL6pnWxkbHV7ecFRE3hWKfzmT8WS");
        }
        other => panic!("expected integrity error, got {other:?}"),
    }
}

#[test]
fn wrong_passphrase_does_not_open() {
    let ledger = known_wallet_ledger();
    let err = Wallet::open(
        ledger,
        Secp256k1Backend::new(),
        "unittest",
        "letmein",
        testnet(0),
    )
    .err()
    .unwrap();
    assert_eq!(err, WalletError::ChecksumMismatch);
}

#[test]
fn unknown_wallet_is_not_found() {
    let err = Wallet::open(
        InMemoryLedger::testnet(),
        Secp256k1Backend::new(),
        "nobody",
        "pw",
        testnet(0),
    )
    .err()
    .unwrap();
    assert_eq!(err, WalletError::Ledger(LedgerError::ObjectNotFound));
}

// ------------------------------------------------------------------
// Lifecycle
// ------------------------------------------------------------------

#[test]
fn create_then_open_yields_same_wallet() {
    let ledger = InMemoryLedger::testnet();
    let created = create(&ledger, "alice");
    let opened = Wallet::open(
        ledger.clone(),
        Secp256k1Backend::new(),
        "alice",
        "hunter2",
        testnet(0),
    )
    .unwrap();
    assert_eq!(opened.state(), created.state());

    let a = created.get_new_address().unwrap();
    let b = opened.get_new_address().unwrap();
    assert_ne!(a, b);
    let path = DerivationPath::receive(0, 0).unwrap();
    assert_eq!(opened.address_for_path(&path).unwrap().address, a);
}

#[test]
fn duplicate_identifier_is_rejected() {
    let ledger = InMemoryLedger::testnet();
    create(&ledger, "alice");
    let err = Wallet::create(ledger, Secp256k1Backend::new(), "alice", "pw", testnet(0))
        .err()
        .unwrap();
    assert!(matches!(err, WalletError::Ledger(LedgerError::EndpointSpecific { code: 1, .. })));
}

#[test]
fn state_file_reopens_wallet() {
    let ledger = InMemoryLedger::testnet();
    let wallet = create(&ledger, "carol");
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("carol.wallet");
    wallet.state().save(&file, b"file password").unwrap();

    let state = WalletState::load(&file, b"file password").unwrap();
    let reopened = Wallet::from_state(
        ledger.clone(),
        Secp256k1Backend::new(),
        state,
        "hunter2",
        AddressVerification::Enabled,
    )
    .unwrap();
    assert_eq!(reopened.state(), wallet.state());
    assert_eq!(
        WalletState::load(&file, b"other").unwrap_err(),
        WalletError::InvalidPassword
    );
}

#[test]
fn upgraded_key_index_issues_verified_addresses() {
    let ledger = InMemoryLedger::testnet();
    let mut wallet = create(&ledger, "dave");
    wallet.upgrade_key_index(5).unwrap();
    assert_eq!(wallet.key_index(), 5);

    let (path, _) = wallet.get_new_address_pair().unwrap();
    assert_eq!(path.to_string(), "M/5'/0/0");
    assert!(matches!(
        wallet.upgrade_key_index(3),
        Err(WalletError::KeyIndexDowngrade { current: 5, requested: 3 })
    ));
}

// ------------------------------------------------------------------
// Payments
// ------------------------------------------------------------------

#[test]
fn pay_is_cosigned_and_change_returns_to_wallet() {
    let ledger = InMemoryLedger::testnet();
    let wallet = create(&ledger, "erin");
    ledger.fund("erin", 100_000).unwrap();
    ledger.fund("erin", 50_000).unwrap();
    assert_eq!(wallet.balance().unwrap().confirmed, 150_000);

    let txid = wallet.pay(&[external(120_000)], None, change_last()).unwrap();

    let sent = ledger.sent("erin");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].txid, txid);
    assert_eq!(
        sent[0].paths,
        vec![DerivationPath::receive(0, 0).unwrap(), DerivationPath::receive(0, 1).unwrap()]
    );

    let tx = &sent[0].cosigned;
    assert_eq!(tx.inputs.len(), 2);
    assert_eq!(tx.outputs.len(), 2);
    assert_eq!(tx.outputs[0].value, 120_000);
    assert_eq!(tx.outputs[1].value, 150_000 - 120_000 - SERVICE_FEE);
    for input in &tx.inputs {
        let items = pushes(&input.script_sig);
        assert_eq!(items.len(), 3);
        assert!(items[..2].iter().all(|sig| sig[0] == 0x30 && sig.last() == Some(&0x01)));
        assert_eq!(items[2].len(), 105);
    }

    // The change output is the only wallet-owned UTXO left.
    let left = ledger.utxos("erin");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].txid, txid);
    assert_eq!(left[0].index, 1);
    assert_eq!(wallet.balance().unwrap().confirmed, 20_000);
}

#[test]
fn change_can_be_spent_again() {
    let ledger = InMemoryLedger::testnet();
    let wallet = create(&ledger, "frank");
    ledger.fund("frank", 100_000).unwrap();
    wallet.pay(&[external(30_000)], None, PayOptions::default()).unwrap();
    wallet.pay(&[external(40_000)], None, PayOptions::default()).unwrap();
    assert_eq!(ledger.sent("frank").len(), 2);
    assert_eq!(wallet.balance().unwrap().confirmed, 100_000 - 70_000 - 2 * SERVICE_FEE as i64);
}

#[test]
fn change_position_is_randomized_by_default() {
    let ledger = InMemoryLedger::testnet();
    let wallet = create(&ledger, "kate");
    ledger.fund("kate", 1_000_000).unwrap();
    let outputs = [
        external(1_000),
        Recipient::new("2MynrezSyqCq1x5dMPtRDupTPA4sfVrNBKq".parse().unwrap(), 2_000),
    ];
    for _ in 0..12 {
        wallet.pay(&outputs, None, PayOptions::default()).unwrap();
    }

    let mut change_positions = Vec::new();
    for sent in ledger.sent("kate") {
        let values: Vec<u64> = sent.cosigned.outputs.iter().map(|o| o.value).collect();
        assert_eq!(values.len(), 3);
        let change = values.iter().position(|v| *v > 2_000).unwrap();
        let payments: Vec<u64> = values.iter().copied().filter(|v| *v <= 2_000).collect();
        assert_eq!(payments, vec![1_000, 2_000]);
        change_positions.push(change);
    }
    assert!(change_positions.iter().any(|p| *p != 2));
    assert_eq!(
        wallet.balance().unwrap().confirmed,
        1_000_000 - 12 * (3_000 + SERVICE_FEE as i64)
    );
}

#[test]
fn explicit_change_address_is_used() {
    let ledger = InMemoryLedger::testnet();
    let wallet = create(&ledger, "gina");
    ledger.fund("gina", 100_000).unwrap();
    let change = wallet.get_new_address().unwrap();
    wallet
        .pay(&[external(10_000)], Some(change.clone()), change_last())
        .unwrap();
    let tx = &ledger.sent("gina")[0].cosigned;
    assert_eq!(tx.outputs[1].script_pubkey, change.script_pubkey());
}

#[test]
fn insufficient_funds_is_a_coin_selection_error() {
    let ledger = InMemoryLedger::testnet();
    let wallet = create(&ledger, "hank");
    ledger.fund("hank", 5_000).unwrap();
    let err = wallet.pay(&[external(1_000)], None, PayOptions::default()).unwrap_err();
    assert!(matches!(err, WalletError::Ledger(LedgerError::CoinSelection { .. })));
    assert!(ledger.sent("hank").is_empty());
}

#[test]
fn locked_utxos_are_not_selected_twice() {
    let ledger = InMemoryLedger::testnet();
    let wallet = create(&ledger, "ivy");
    ledger.fund("ivy", 100_000).unwrap();
    let outputs = [external(50_000)];
    ledger.coin_selection("ivy", &outputs, true, false).unwrap();
    let err = wallet.pay(&outputs, None, PayOptions::default()).unwrap_err();
    assert!(matches!(err, WalletError::Ledger(LedgerError::CoinSelection { .. })));
}

#[test]
fn submitted_transaction_round_trips_through_wire_form() {
    let ledger = InMemoryLedger::testnet();
    let wallet = create(&ledger, "judy");
    ledger.fund("judy", 70_000).unwrap();
    ledger.fund("judy", 80_000).unwrap();
    wallet.pay(&[external(100_000)], None, PayOptions::default()).unwrap();

    let backend = Secp256k1Backend::new();
    let sent = &ledger.sent("judy")[0];
    let parsed = backend.deserialize_transaction(&sent.submitted).unwrap();
    assert_eq!(backend.serialize_transaction(&parsed).unwrap(), sent.submitted);

    let utxos_in_order: Vec<_> = sent.paths.iter().map(|p| p.to_string()).collect();
    assert_eq!(utxos_in_order, vec!["M/0'/0/0", "M/0'/0/1"]);
    for (client, cosigned) in parsed.inputs.iter().zip(&sent.cosigned.inputs) {
        assert_eq!(client.previous_output, cosigned.previous_output);
        let client_sig = &pushes(&client.script_sig)[0];
        assert!(pushes(&cosigned.script_sig)[..2].contains(client_sig));
    }
}
