//! Transfer data models and API request/response types.
//!
//! This module defines:
//! - `Transfer`: Database entity recording a movement between two accounts
//! - `TransferParams`: Input to the transfer engine
//! - `TransferRequest`: Request body for the transfer endpoint
//! - `TransactionResult`: Everything a committed transfer produced

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{account::Account, entry::Entry};

/// Represents a transfer record from the database.
///
/// # Database Table
///
/// Maps to the `transfers` table. Each transfer:
/// - References two distinct accounts
/// - Has a strictly positive amount (enforced by CHECK constraint)
/// - Is accompanied by exactly two entries written in the same unit
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct Transfer {
    /// Unique identifier for this transfer
    pub id: i64,

    /// Account that is debited
    pub from_account_id: i64,

    /// Account that is credited
    pub to_account_id: i64,

    /// Amount moved, always positive
    pub amount: Decimal,

    /// When the transfer was recorded
    pub created_at: DateTime<Utc>,
}

impl Transfer {
    /// Returns true if `account_id` is on either side of this transfer.
    pub fn involves(&self, account_id: i64) -> bool {
        self.from_account_id == account_id || self.to_account_id == account_id
    }
}

/// Input for inserting a transfer row inside an atomic unit.
#[derive(Debug, Clone, Copy)]
pub struct CreateTransferParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: Decimal,
}

/// Transfers where the account is either sender or receiver, ordered by id.
#[derive(Debug, Clone, Copy)]
pub struct ListTransfersParams {
    pub account_id: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Input to [`TransferEngine::transfer`](crate::services::transfer_engine::TransferEngine::transfer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: Decimal,
}

/// Request to transfer money between accounts.
///
/// # JSON Example
///
/// ```json
/// {
///   "from_account_id": 1,
///   "to_account_id": 2,
///   "amount": "250.00",
///   "currency": "USD"
/// }
/// ```
///
/// Both accounts must be held in `currency`, and the source account must
/// belong to the authenticated caller.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    /// Account to transfer from (will decrease)
    pub from_account_id: i64,

    /// Account to transfer to (will increase)
    pub to_account_id: i64,

    /// Amount to transfer
    pub amount: Decimal,

    /// Currency both accounts must be held in
    pub currency: String,
}

impl TransferRequest {
    pub fn params(&self) -> TransferParams {
        TransferParams {
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            amount: self.amount,
        }
    }
}

/// Outcome of one committed transfer.
///
/// The account snapshots are the rows as read back after the balance
/// update, not balances recomputed by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    pub from_account: Account,
    pub to_account: Account,
}
