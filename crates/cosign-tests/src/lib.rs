//! Integration test suite for the Cosign wallet client.
//!
//! The tests drive full create/open/derive/pay flows against
//! [`helpers::InMemoryLedger`], a ledger service that holds real server keys,
//! derives addresses independently of the wallet and co-signs what it is sent.

pub mod helpers;
