//! Ledger-style banking backend.
//!
//! Accounts hold balances, entries record balance deltas and transfers
//! record money moving between two accounts. The
//! [`TransferEngine`](services::transfer_engine::TransferEngine) executes
//! each transfer as one atomic unit against a [`LedgerStore`](store::LedgerStore),
//! locking account rows in ascending id order so concurrent transfers in
//! opposite directions cannot deadlock.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
