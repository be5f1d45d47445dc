//! PostgreSQL ledger store backed by an sqlx connection pool.
//!
//! Every unit of work is a database transaction. Row locks come from
//! `SELECT … FOR NO KEY UPDATE` and from the `UPDATE` itself, so the lock
//! order chosen by the caller is the order in which rows are locked.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};

use super::{LedgerStore, LedgerTx};
use crate::{
    db::DbPool,
    error::LedgerError,
    models::{
        account::{Account, CreateAccountParams, ListAccountsParams},
        entry::{CreateEntryParams, Entry, ListEntriesParams},
        transfer::{CreateTransferParams, ListTransfersParams, Transfer},
    },
};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";

/// Ledger store over a PostgreSQL pool.
///
/// Cloning is cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: DbPool,
    lock_timeout: Option<Duration>,
}

impl PgLedgerStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Bound how long a unit of work waits for a row lock.
    ///
    /// Applied per transaction with `SET LOCAL lock_timeout`; an expired
    /// wait surfaces as [`LedgerError::Conflict`].
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// A foreign-key violation on insert means the referenced account is gone.
fn missing_account(err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
            LedgerError::NotFound("account")
        }
        other => other.into(),
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<PgLedgerTx, LedgerError> {
        let mut tx = self.pool.begin().await?;

        if let Some(timeout) = self.lock_timeout {
            // SET does not accept bind parameters
            let statement = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis());
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        Ok(PgLedgerTx { tx })
    }

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, LedgerError> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO accounts (owner, currency) VALUES ($1, $2) RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(params.owner)
        .bind(params.currency)
        .fetch_one(&self.pool)
        .await?;

        Ok(account)
    }

    async fn get_account(&self, id: i64) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound("account"))
    }

    async fn list_accounts(&self, params: ListAccountsParams) -> Result<Vec<Account>, LedgerError> {
        let accounts = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE owner = $1 ORDER BY id LIMIT $2 OFFSET $3"
        ))
        .bind(params.owner)
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }

    async fn delete_account(&self, id: i64) -> Result<(), LedgerError> {
        let deleted = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(LedgerError::NotFound("account"));
        }

        Ok(())
    }

    async fn get_entry(&self, id: i64) -> Result<Entry, LedgerError> {
        sqlx::query_as::<_, Entry>(
            "SELECT id, account_id, amount, created_at FROM entries WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound("entry"))
    }

    async fn list_entries(&self, params: ListEntriesParams) -> Result<Vec<Entry>, LedgerError> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(params.account_id)
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn get_transfer(&self, id: i64) -> Result<Transfer, LedgerError> {
        sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound("transfer"))
    }

    async fn list_transfers(
        &self,
        params: ListTransfersParams,
    ) -> Result<Vec<Transfer>, LedgerError> {
        let transfers = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE from_account_id = $1 OR to_account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(params.account_id)
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(transfers)
    }
}

/// One PostgreSQL transaction.
///
/// Dropping it without calling `commit` rolls the transaction back.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_account(&mut self, id: i64) -> Result<Account, LedgerError> {
        // NO KEY UPDATE does not block the KEY SHARE locks taken by
        // foreign-key checks when entries are inserted.
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR NO KEY UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(LedgerError::NotFound("account"))
    }

    async fn create_transfer(
        &mut self,
        params: CreateTransferParams,
    ) -> Result<Transfer, LedgerError> {
        sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(params.from_account_id)
        .bind(params.to_account_id)
        .bind(params.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(missing_account)
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, LedgerError> {
        sqlx::query_as::<_, Entry>(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(params.account_id)
        .bind(params.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(missing_account)
    }

    async fn add_account_balance(
        &mut self,
        id: i64,
        delta: Decimal,
    ) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(&format!(
            "UPDATE accounts SET balance = balance + $2 WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(LedgerError::NotFound("account"))
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
