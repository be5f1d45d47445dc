//! Account data models and API request/response types.
//!
//! This module defines:
//! - `Account`: Database entity representing an account
//! - `CreateAccountParams` / `ListAccountsParams`: store inputs
//! - `CreateAccountRequest`: Request body for opening accounts

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Decimal places kept by the `NUMERIC(19, 4)` money columns.
pub const MONEY_SCALE: u32 = 4;

/// Integer digits kept by the `NUMERIC(19, 4)` money columns.
const MONEY_INTEGER_DIGITS: u32 = 15;

/// Returns true if `amount` fits a `NUMERIC(19, 4)` column without rounding.
///
/// Trailing zeros do not count against the scale, so `1.50000` fits.
pub fn is_representable(amount: Decimal) -> bool {
    let limit = Decimal::from(10_i64.pow(MONEY_INTEGER_DIGITS));
    amount.normalize().scale() <= MONEY_SCALE && amount.abs() < limit
}

/// Currencies an account may be opened in.
pub const SUPPORTED_CURRENCIES: [&str; 3] = ["USD", "EUR", "CAD"];

/// Returns true if `currency` is one of [`SUPPORTED_CURRENCIES`].
pub fn is_supported_currency(currency: &str) -> bool {
    SUPPORTED_CURRENCIES.contains(&currency)
}

/// Represents an account record from the database.
///
/// # Database Table
///
/// Maps to the `accounts` table. Each account:
/// - Belongs to one owner (the identity behind an API key)
/// - Holds a signed fixed-point balance (`NUMERIC(19, 4)`)
///
/// # Balance Invariant
///
/// Accounts open at zero, so `balance` always equals the sum of every entry
/// recorded against the account. Only the transfer engine moves it.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct Account {
    /// Unique identifier for this account
    pub id: i64,

    /// Identity that owns this account
    ///
    /// Every account query issued on behalf of a caller is scoped by owner.
    pub owner: String,

    /// Current balance
    pub balance: Decimal,

    /// Currency code (ISO 4217, 3 letters)
    pub currency: String,

    /// Timestamp when account was created
    pub created_at: DateTime<Utc>,
}

/// Input for inserting a new account row.
#[derive(Debug, Clone)]
pub struct CreateAccountParams {
    pub owner: String,
    pub currency: String,
}

/// Owner-scoped page of accounts, ordered by id.
#[derive(Debug, Clone)]
pub struct ListAccountsParams {
    pub owner: String,
    pub limit: i64,
    pub offset: i64,
}

/// Request body for opening a new account.
///
/// # JSON Example
///
/// ```json
/// {
///   "currency": "USD"
/// }
/// ```
///
/// The account opens with a zero balance; money only arrives by transfer.
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    /// Currency code (defaults to "USD" if not provided)
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// Default currency value when not specified in request.
fn default_currency() -> String {
    "USD".to_string()
}
