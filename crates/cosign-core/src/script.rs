//! Minimal script assembly: push encoding, output scripts and the
//! multisig unlocking script.
//!
//! Only the handful of templates a P2SH multisig wallet needs are built here.
//! Redeem scripts themselves come from the backend.

const OP_0: u8 = 0x00;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_DUP: u8 = 0x76;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_HASH160: u8 = 0xa9;
const OP_CHECKSIG: u8 = 0xac;

/// Append `data` to `script` with the smallest push opcode that fits.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len < OP_PUSHDATA1 as usize {
        script.push(len as u8);
    } else if len <= 0xff {
        script.push(OP_PUSHDATA1);
        script.push(len as u8);
    } else if len <= 0xffff {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        script.push(OP_PUSHDATA4);
        script.extend_from_slice(&(len as u32).to_le_bytes());
    }
    script.extend_from_slice(data);
}

/// `OP_HASH160 <script_hash> OP_EQUAL`
pub fn p2sh_script_pubkey(script_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.push(OP_HASH160);
    push_data(&mut script, script_hash);
    script.push(OP_EQUAL);
    script
}

/// `OP_DUP OP_HASH160 <pubkey_hash> OP_EQUALVERIFY OP_CHECKSIG`
pub fn p2pkh_script_pubkey(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    push_data(&mut script, pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// Unlocking script for a P2SH multisig input:
/// `OP_0 <sig_1> .. <sig_n> <redeem_script>`.
///
/// The leading `OP_0` absorbs the extra stack item `OP_CHECKMULTISIG` pops.
/// Signatures must already carry their sighash-type byte.
pub fn multisig_unlocking_script(signatures: &[Vec<u8>], redeem_script: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(
        1 + signatures.iter().map(|s| s.len() + 1).sum::<usize>() + redeem_script.len() + 2,
    );
    script.push(OP_0);
    for sig in signatures {
        push_data(&mut script, sig);
    }
    push_data(&mut script, redeem_script);
    script
}
