//! Ledger entry model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// A signed balance delta recorded against one account.
///
/// Entries are append-only and are only ever written by the transfer
/// engine, two per transfer.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct Entry {
    pub id: i64,

    /// Account the delta applies to
    pub account_id: i64,

    /// Negative for debits, positive for credits
    pub amount: Decimal,

    pub created_at: DateTime<Utc>,
}

/// Input for appending an entry inside an atomic unit.
#[derive(Debug, Clone, Copy)]
pub struct CreateEntryParams {
    pub account_id: i64,
    pub amount: Decimal,
}

/// Account-scoped page of entries, ordered by id.
#[derive(Debug, Clone, Copy)]
pub struct ListEntriesParams {
    pub account_id: i64,
    pub limit: i64,
    pub offset: i64,
}
