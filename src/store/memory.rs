//! In-process ledger store.
//!
//! Behaves like a row-locking relational store: each account row carries
//! its own lock, a unit of work holds the locks it takes until it commits
//! or rolls back, and uncommitted writes are staged inside the unit so no
//! other unit can observe them. Lock waits are bounded by a timeout that
//! surfaces as [`LedgerError::Conflict`], standing in for the lock-wait or
//! deadlock detection of a real database.
//!
//! A commit publishes its entries, transfers and balances under one
//! store-wide write lock that every reader also takes, so readers see either
//! all of a unit's writes or none of them.
//!
//! A [`FailPoint`] can be armed to make the next unit fail at a chosen
//! step, which is how rollback paths are exercised.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use super::{LedgerStore, LedgerTx};
use crate::{
    error::LedgerError,
    models::{
        account::{Account, CreateAccountParams, ListAccountsParams, is_representable},
        entry::{CreateEntryParams, Entry, ListEntriesParams},
        transfer::{CreateTransferParams, ListTransfersParams, Transfer},
    },
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Step at which an armed fault fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// The next balance update fails with `Unavailable`.
    BalanceUpdate,
    /// The next commit fails with `Conflict`, as a serialization failure would.
    Commit,
}

#[derive(Debug)]
struct AccountRow {
    committed: Mutex<Account>,
    lock: Arc<RowLock<()>>,
}

#[derive(Debug)]
struct Inner {
    /// Held for writing while a commit or delete publishes its changes.
    published: RwLock<()>,
    accounts: RwLock<BTreeMap<i64, Arc<AccountRow>>>,
    entries: Mutex<BTreeMap<i64, Entry>>,
    transfers: Mutex<BTreeMap<i64, Transfer>>,
    next_account_id: AtomicI64,
    next_entry_id: AtomicI64,
    next_transfer_id: AtomicI64,
    lock_timeout: Duration,
    fail_point: Mutex<Option<FailPoint>>,
}

/// Ledger store kept entirely in memory.
///
/// Cloning is cheap; clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryLedgerStore {
    inner: Arc<Inner>,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Convert a limit/offset pair into iterator bounds.
fn window(limit: i64, offset: i64) -> Result<(usize, usize), LedgerError> {
    let limit = usize::try_from(limit)
        .map_err(|_| LedgerError::InvalidArgument("limit must not be negative".to_string()))?;
    let offset = usize::try_from(offset)
        .map_err(|_| LedgerError::InvalidArgument("offset must not be negative".to_string()))?;
    Ok((limit, offset))
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                published: RwLock::new(()),
                accounts: RwLock::new(BTreeMap::new()),
                entries: Mutex::new(BTreeMap::new()),
                transfers: Mutex::new(BTreeMap::new()),
                next_account_id: AtomicI64::new(1),
                next_entry_id: AtomicI64::new(1),
                next_transfer_id: AtomicI64::new(1),
                lock_timeout,
                fail_point: Mutex::new(None),
            }),
        }
    }

    /// Arm a fault that fires once, in whichever unit reaches it first.
    pub fn fail_next(&self, point: FailPoint) {
        *guard(&self.inner.fail_point) = Some(point);
    }

    fn row(&self, id: i64) -> Option<Arc<AccountRow>> {
        self.inner.row(id)
    }
}

impl Inner {
    fn read_published(&self) -> RwLockReadGuard<'_, ()> {
        self.published.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_published(&self) -> RwLockWriteGuard<'_, ()> {
        self.published.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_referenced(&self, id: i64) -> bool {
        guard(&self.entries)
            .values()
            .any(|entry| entry.account_id == id)
            || guard(&self.transfers)
                .values()
                .any(|transfer| transfer.involves(id))
    }

    fn row(&self, id: i64) -> Option<Arc<AccountRow>> {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn account_exists(&self, id: i64) -> bool {
        self.row(id).is_some()
    }

    /// Disarm and report the fault if it matches `point`.
    fn trip(&self, point: FailPoint) -> bool {
        let mut armed = guard(&self.fail_point);
        if *armed == Some(point) {
            *armed = None;
            true
        } else {
            false
        }
    }

    async fn acquire(&self, id: i64) -> Result<(Arc<AccountRow>, OwnedMutexGuard<()>), LedgerError> {
        let row = self.row(id).ok_or(LedgerError::NotFound("account"))?;
        let held = tokio::time::timeout(self.lock_timeout, row.lock.clone().lock_owned())
            .await
            .map_err(|_| LedgerError::Conflict(format!("lock wait timeout on account {id}")))?;
        Ok((row, held))
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Tx = MemoryLedgerTx;

    async fn begin(&self) -> Result<MemoryLedgerTx, LedgerError> {
        Ok(MemoryLedgerTx {
            store: Arc::clone(&self.inner),
            locks: HashMap::new(),
            accounts: BTreeMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
        })
    }

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account, LedgerError> {
        let mut accounts = self
            .inner
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let duplicate = accounts.values().any(|row| {
            let existing = guard(&row.committed);
            existing.owner == params.owner && existing.currency == params.currency
        });
        if duplicate {
            return Err(LedgerError::Constraint(format!(
                "{} already holds a {} account",
                params.owner, params.currency
            )));
        }

        let account = Account {
            id: self.inner.next_account_id.fetch_add(1, Ordering::SeqCst),
            owner: params.owner,
            balance: Decimal::ZERO,
            currency: params.currency,
            created_at: Utc::now(),
        };
        accounts.insert(
            account.id,
            Arc::new(AccountRow {
                committed: Mutex::new(account.clone()),
                lock: Arc::new(RowLock::new(())),
            }),
        );

        Ok(account)
    }

    async fn get_account(&self, id: i64) -> Result<Account, LedgerError> {
        let _published = self.inner.read_published();
        let row = self.row(id).ok_or(LedgerError::NotFound("account"))?;
        let account = guard(&row.committed).clone();
        Ok(account)
    }

    async fn list_accounts(&self, params: ListAccountsParams) -> Result<Vec<Account>, LedgerError> {
        let (limit, offset) = window(params.limit, params.offset)?;
        let _published = self.inner.read_published();
        let accounts = self
            .inner
            .accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|row| guard(&row.committed).clone())
            .filter(|account| account.owner == params.owner)
            .skip(offset)
            .take(limit)
            .collect();
        Ok(accounts)
    }

    async fn delete_account(&self, id: i64) -> Result<(), LedgerError> {
        // a unit holding the row may still commit entries against it
        let (_row, _held) = self.inner.acquire(id).await?;

        let _published = self.inner.write_published();
        if self.inner.is_referenced(id) {
            return Err(LedgerError::Constraint(format!(
                "account {id} is referenced by ledger records"
            )));
        }
        self.inner
            .accounts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        Ok(())
    }

    async fn get_entry(&self, id: i64) -> Result<Entry, LedgerError> {
        let _published = self.inner.read_published();
        guard(&self.inner.entries)
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound("entry"))
    }

    async fn list_entries(&self, params: ListEntriesParams) -> Result<Vec<Entry>, LedgerError> {
        let (limit, offset) = window(params.limit, params.offset)?;
        let _published = self.inner.read_published();
        let entries = guard(&self.inner.entries)
            .values()
            .filter(|entry| entry.account_id == params.account_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(entries)
    }

    async fn get_transfer(&self, id: i64) -> Result<Transfer, LedgerError> {
        let _published = self.inner.read_published();
        guard(&self.inner.transfers)
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound("transfer"))
    }

    async fn list_transfers(
        &self,
        params: ListTransfersParams,
    ) -> Result<Vec<Transfer>, LedgerError> {
        let (limit, offset) = window(params.limit, params.offset)?;
        let _published = self.inner.read_published();
        let transfers = guard(&self.inner.transfers)
            .values()
            .filter(|transfer| transfer.involves(params.account_id))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(transfers)
    }
}

/// One unit of work against a [`MemoryLedgerStore`].
///
/// Holds the row locks it has taken plus staged copies of every row it has
/// touched. Dropping it discards the staged writes and releases the locks.
pub struct MemoryLedgerTx {
    store: Arc<Inner>,
    locks: HashMap<i64, OwnedMutexGuard<()>>,
    accounts: BTreeMap<i64, Account>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
}

impl MemoryLedgerTx {
    /// Staged copy of a locked row, taking the lock first if needed.
    async fn locked(&mut self, id: i64) -> Result<&mut Account, LedgerError> {
        if !self.locks.contains_key(&id) {
            let (row, held) = self.store.acquire(id).await?;
            let current = guard(&row.committed).clone();
            self.locks.insert(id, held);
            self.accounts.insert(id, current);
        }
        self.accounts
            .get_mut(&id)
            .ok_or(LedgerError::NotFound("account"))
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn lock_account(&mut self, id: i64) -> Result<Account, LedgerError> {
        self.locked(id).await.map(|account| account.clone())
    }

    async fn create_transfer(
        &mut self,
        params: CreateTransferParams,
    ) -> Result<Transfer, LedgerError> {
        if !self.store.account_exists(params.from_account_id)
            || !self.store.account_exists(params.to_account_id)
        {
            return Err(LedgerError::NotFound("account"));
        }
        if params.amount <= Decimal::ZERO || params.from_account_id == params.to_account_id {
            return Err(LedgerError::Constraint(
                "transfer needs two distinct accounts and a positive amount".to_string(),
            ));
        }

        let transfer = Transfer {
            id: self.store.next_transfer_id.fetch_add(1, Ordering::SeqCst),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, LedgerError> {
        if !self.store.account_exists(params.account_id) {
            return Err(LedgerError::NotFound("account"));
        }

        let entry = Entry {
            id: self.store.next_entry_id.fetch_add(1, Ordering::SeqCst),
            account_id: params.account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn add_account_balance(
        &mut self,
        id: i64,
        delta: Decimal,
    ) -> Result<Account, LedgerError> {
        if self.store.trip(FailPoint::BalanceUpdate) {
            return Err(LedgerError::Unavailable(
                "injected fault before balance update".to_string(),
            ));
        }

        let account = self.locked(id).await?;
        account.balance = account
            .balance
            .checked_add(delta)
            .filter(|balance| is_representable(*balance))
            .ok_or_else(|| {
                LedgerError::Constraint(format!("balance of account {id} out of range"))
            })?;
        Ok(account.clone())
    }

    async fn commit(mut self) -> Result<(), LedgerError> {
        if self.store.trip(FailPoint::Commit) {
            return Err(LedgerError::Conflict(
                "injected serialization failure".to_string(),
            ));
        }

        let _published = self.store.write_published();
        {
            let mut entries = guard(&self.store.entries);
            entries.extend(self.entries.drain(..).map(|entry| (entry.id, entry)));
        }
        {
            let mut transfers = guard(&self.store.transfers);
            transfers.extend(self.transfers.drain(..).map(|transfer| (transfer.id, transfer)));
        }
        for (id, staged) in std::mem::take(&mut self.accounts) {
            if let Some(row) = self.store.row(id) {
                *guard(&row.committed) = staged;
            }
        }

        // row locks are released when `self` drops
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn open(store: &MemoryLedgerStore, owner: &str) -> Account {
        store
            .create_account(CreateAccountParams {
                owner: owner.to_string(),
                currency: "USD".to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let store = MemoryLedgerStore::new();
        let account = open(&store, "alice").await;

        let mut tx = store.begin().await.unwrap();
        let staged = tx.add_account_balance(account.id, dec!(-40)).await.unwrap();
        assert_eq!(staged.balance, dec!(-40));
        assert_eq!(store.get_account(account.id).await.unwrap().balance, Decimal::ZERO);

        tx.commit().await.unwrap();
        assert_eq!(store.get_account(account.id).await.unwrap().balance, dec!(-40));
    }

    #[tokio::test]
    async fn dropped_unit_discards_writes_and_releases_locks() {
        let store = MemoryLedgerStore::with_lock_timeout(Duration::from_millis(100));
        let account = open(&store, "alice").await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.add_account_balance(account.id, dec!(5)).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        let locked = tx.lock_account(account.id).await.unwrap();
        assert_eq!(locked.balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn lock_wait_times_out_as_conflict() {
        let store = MemoryLedgerStore::with_lock_timeout(Duration::from_millis(50));
        let account = open(&store, "alice").await;

        let mut holder = store.begin().await.unwrap();
        holder.lock_account(account.id).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.lock_account(account.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn duplicate_owner_currency_is_rejected() {
        let store = MemoryLedgerStore::new();
        open(&store, "alice").await;

        let err = store
            .create_account(CreateAccountParams {
                owner: "alice".to_string(),
                currency: "USD".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Constraint(_)));
    }

    #[tokio::test]
    async fn entries_require_an_existing_account() {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();

        let err = tx
            .create_entry(CreateEntryParams {
                account_id: 42,
                amount: dec!(1),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound("account")));
    }

    #[tokio::test]
    async fn commit_fault_fires_once() {
        let store = MemoryLedgerStore::new();
        store.fail_next(FailPoint::Commit);

        let tx = store.begin().await.unwrap();
        assert!(matches!(tx.commit().await, Err(LedgerError::Conflict(_))));

        let tx = store.begin().await.unwrap();
        assert!(tx.commit().await.is_ok());
    }

    #[tokio::test]
    async fn delete_refuses_referenced_accounts() {
        let store = MemoryLedgerStore::new();
        let alice = open(&store, "alice").await;
        let bob = open(&store, "bob").await;
        let carol = open(&store, "carol").await;

        let mut tx = store.begin().await.unwrap();
        tx.create_transfer(CreateTransferParams {
            from_account_id: alice.id,
            to_account_id: bob.id,
            amount: dec!(1),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(
            store.delete_account(alice.id).await,
            Err(LedgerError::Constraint(_))
        ));
        store.delete_account(carol.id).await.unwrap();
        assert!(matches!(
            store.get_account(carol.id).await,
            Err(LedgerError::NotFound("account"))
        ));
    }

    #[tokio::test]
    async fn delete_waits_for_the_row_and_sees_committed_history() {
        let store = MemoryLedgerStore::new();
        let alice = open(&store, "alice").await;
        let bob = open(&store, "bob").await;

        let mut tx = store.begin().await.unwrap();
        tx.lock_account(alice.id).await.unwrap();
        tx.lock_account(bob.id).await.unwrap();
        tx.create_transfer(CreateTransferParams {
            from_account_id: alice.id,
            to_account_id: bob.id,
            amount: dec!(5),
        })
        .await
        .unwrap();
        tx.create_entry(CreateEntryParams {
            account_id: alice.id,
            amount: dec!(-5),
        })
        .await
        .unwrap();

        let deleting = tokio::spawn({
            let store = store.clone();
            async move { store.delete_account(alice.id).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.commit().await.unwrap();

        let outcome = deleting.await.unwrap();
        assert!(matches!(outcome, Err(LedgerError::Constraint(_))));
        assert_eq!(store.get_account(alice.id).await.unwrap().id, alice.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_observe_half_a_commit() {
        let store = MemoryLedgerStore::new();
        let mut accounts = Vec::new();
        for currency in ["USD", "EUR"] {
            let account = store
                .create_account(CreateAccountParams {
                    owner: "alice".to_string(),
                    currency: currency.to_string(),
                })
                .await
                .unwrap();
            accounts.push(account.id);
        }
        let (low, high) = (accounts[0], accounts[1]);

        let writer = tokio::spawn({
            let store = store.clone();
            async move {
                for round in 0..200 {
                    let delta = if round % 2 == 0 { dec!(7) } else { dec!(-7) };
                    let mut tx = store.begin().await.unwrap();
                    tx.add_account_balance(low, -delta).await.unwrap();
                    tx.add_account_balance(high, delta).await.unwrap();
                    tx.commit().await.unwrap();
                }
            }
        });

        let reader = tokio::spawn({
            let store = store.clone();
            async move {
                for _ in 0..500 {
                    let both = store
                        .list_accounts(ListAccountsParams {
                            owner: "alice".to_string(),
                            limit: 10,
                            offset: 0,
                        })
                        .await
                        .unwrap();
                    let total: Decimal = both.iter().map(|account| account.balance).sum();
                    assert_eq!(total, Decimal::ZERO);
                    tokio::task::yield_now().await;
                }
            }
        });

        writer.await.unwrap();
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn balance_outside_the_money_columns_is_rejected() {
        let store = MemoryLedgerStore::new();
        let account = open(&store, "alice").await;

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .add_account_balance(account.id, Decimal::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Constraint(_)));

        tx.add_account_balance(account.id, dec!(999999999999999.9999))
            .await
            .unwrap();
        let err = tx
            .add_account_balance(account.id, dec!(0.0001))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Constraint(_)));
    }

    #[tokio::test]
    async fn lists_are_paged_in_id_order() {
        let store = MemoryLedgerStore::new();
        for currency in ["USD", "EUR", "CAD"] {
            store
                .create_account(CreateAccountParams {
                    owner: "alice".to_string(),
                    currency: currency.to_string(),
                })
                .await
                .unwrap();
        }
        open(&store, "bob").await;

        let page = store
            .list_accounts(ListAccountsParams {
                owner: "alice".to_string(),
                limit: 2,
                offset: 1,
            })
            .await
            .unwrap();
        let currencies: Vec<_> = page.iter().map(|a| a.currency.as_str()).collect();
        assert_eq!(currencies, ["EUR", "CAD"]);
    }
}
