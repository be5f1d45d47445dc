//! Ledger store: record storage plus the atomic-unit primitive.
//!
//! [`LedgerStore`] exposes single-row CRUD that runs outside any unit of
//! work. Writes that must land together go through a [`LedgerTx`] obtained
//! from [`LedgerStore::begin`], normally via [`run_atomic`].
//!
//! Entries and transfers can only be written through a `LedgerTx`, so the
//! ledger stays append-only and every entry belongs to a transfer.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use futures::future::BoxFuture;
use rust_decimal::Decimal;

use crate::{
    error::LedgerError,
    models::{
        account::{Account, CreateAccountParams, ListAccountsParams},
        entry::{CreateEntryParams, Entry, ListEntriesParams},
        transfer::{CreateTransferParams, ListTransfersParams, Transfer},
    },
};

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Durable storage for accounts, entries and transfers.
#[async_trait]
pub trait LedgerStore: Clone + Send + Sync + 'static {
    /// Handle scoped to one isolated unit of work.
    type Tx: LedgerTx + 'static;

    /// Open a new isolated unit of work.
    async fn begin(&self) -> Result<Self::Tx, LedgerError>;

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, LedgerError>;

    async fn get_account(&self, id: i64) -> Result<Account, LedgerError>;

    async fn list_accounts(&self, params: ListAccountsParams) -> Result<Vec<Account>, LedgerError>;

    /// Fails with `Constraint` while any entry or transfer references the account.
    async fn delete_account(&self, id: i64) -> Result<(), LedgerError>;

    async fn get_entry(&self, id: i64) -> Result<Entry, LedgerError>;

    async fn list_entries(&self, params: ListEntriesParams) -> Result<Vec<Entry>, LedgerError>;

    async fn get_transfer(&self, id: i64) -> Result<Transfer, LedgerError>;

    async fn list_transfers(
        &self,
        params: ListTransfersParams,
    ) -> Result<Vec<Transfer>, LedgerError>;
}

/// Operations available inside one unit of work.
///
/// Nothing written through a `LedgerTx` is visible to other units until
/// [`commit`](LedgerTx::commit). Dropping the handle without committing
/// rolls the unit back and releases its row locks.
#[async_trait]
pub trait LedgerTx: Send {
    /// Take the row lock on an account and return its current state.
    ///
    /// The lock is held until the unit commits or rolls back.
    async fn lock_account(&mut self, id: i64) -> Result<Account, LedgerError>;

    async fn create_transfer(
        &mut self,
        params: CreateTransferParams,
    ) -> Result<Transfer, LedgerError>;

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, LedgerError>;

    /// Add `delta` to the balance and return the row as read back afterwards.
    async fn add_account_balance(&mut self, id: i64, delta: Decimal)
    -> Result<Account, LedgerError>;

    async fn commit(self) -> Result<(), LedgerError>;

    async fn rollback(self) -> Result<(), LedgerError>;
}

/// Run `work` as one all-or-nothing unit.
///
/// Commits when `work` returns `Ok`. When it returns `Err`, the unit is
/// rolled back and that same error is returned. A conflict reported while
/// committing surfaces as [`LedgerError::Conflict`]; nothing is retried here.
///
/// ```ignore
/// let transfer = run_atomic(&store, |tx| {
///     Box::pin(async move { tx.create_transfer(params).await })
/// })
/// .await?;
/// ```
pub async fn run_atomic<S, T, F>(store: &S, work: F) -> Result<T, LedgerError>
where
    S: LedgerStore,
    T: Send,
    F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, Result<T, LedgerError>> + Send,
{
    let mut tx = store.begin().await?;

    match work(&mut tx).await {
        Ok(value) => {
            tx.commit().await.inspect_err(|err| {
                tracing::warn!(error = %err, "atomic unit failed to commit");
            })?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed after {err}");
            }
            Err(err)
        }
    }
}
