//! Error types for the Cosign core.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivationError {
    #[error("invalid derivation path: {0}")] InvalidPath(String),
    #[error("child index out of range: {0}")] IndexOutOfRange(u64),
    #[error("hardened step {index}' requires a private parent key")] HardenedFromPublic { index: u32 },
    #[error("invalid extended key: {0}")] InvalidKey(String),
    #[error("network mismatch: expected {expected}, got {got}")] NetworkMismatch { expected: String, got: String },
    #[error("backend: {0}")] Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("expected {expected} public keys, got {got}")] WrongKeyCount { expected: usize, got: usize },
    #[error("private key required")] PrivateKeyRequired,
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
    #[error("signature hash: {0}")] SignatureHash(String),
    #[error("signing: {0}")] Signing(String),
    #[error("invalid txid: {0}")] InvalidTxid(String),
    #[error("invalid script: {0}")] InvalidScript(String),
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58check: {0}")] InvalidEncoding(String),
    #[error("invalid length: {0}")] InvalidLength(usize),
    #[error("unknown version byte: {0:#04x}")] UnknownVersion(u8),
    #[error("address {address} does not belong to {expected}")] WrongNetwork { address: String, expected: String },
}

/// Errors surfaced by a ledger service implementation.
///
/// The HTTP client maps status codes onto these; in-memory services used in
/// tests construct them directly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("[401] your credentials are incorrect")] InvalidCredentials,
    #[error("the HTTP response was empty")] EmptyResponse,
    #[error("[{code}] {msg}")] EndpointSpecific { code: i64, msg: String },
    #[error("the endpoint returned an unknown error")] UnknownEndpointSpecific,
    #[error("[404] the endpoint you've tried to access does not exist")] MissingEndpoint,
    #[error("[404] the object you've tried to access does not exist")] ObjectNotFound,
    #[error("[{status}] a server error has occurred")] GenericServer { status: u16 },
    #[error("[{status}] an HTTP error has occurred")] GenericHttp { status: u16 },
    #[error("coin selection failed: [{code}] {msg}")] CoinSelection { code: i64, msg: String },
    #[error("transaction rejected: [{code}] {msg}")] TransactionRejected { code: i64, msg: String },
    #[error("transport: {0}")] Transport(String),
    #[error("invalid response: {0}")] InvalidResponse(String),
}

impl LedgerError {
    /// Re-tag an endpoint-specific error raised during coin selection.
    pub fn into_coin_selection(self) -> Self {
        match self {
            LedgerError::EndpointSpecific { code, msg } => LedgerError::CoinSelection { code, msg },
            other => other,
        }
    }

    /// Re-tag an endpoint-specific error raised during transaction submission.
    pub fn into_transaction_rejected(self) -> Self {
        match self {
            LedgerError::EndpointSpecific { code, msg } => {
                LedgerError::TransactionRejected { code, msg }
            }
            other => other,
        }
    }
}
