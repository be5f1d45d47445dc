//! Data models representing ledger records and API payloads.
//!
//! Record structs map one-to-one onto database tables. Parameter structs
//! are the inputs accepted by the ledger store.

/// Account record and account requests
pub mod account;
/// Ledger entry record
pub mod entry;
/// Limit/offset pagination
pub mod page;
/// Transfer record and transfer results
pub mod transfer;
