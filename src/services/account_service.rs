//! Account service - ownership and currency checks around the ledger.
//!
//! Every operation takes the caller's identity as an explicit `owner`
//! argument. Accounts that belong to someone else are reported as not
//! found so their existence does not leak.

use crate::{
    error::{AppError, LedgerError},
    models::{
        account::{Account, CreateAccountParams, CreateAccountRequest, ListAccountsParams, is_supported_currency},
        entry::{Entry, ListEntriesParams},
        page::Page,
        transfer::{ListTransfersParams, TransactionResult, Transfer, TransferRequest},
    },
    services::transfer_engine::{RetryPolicy, TransferEngine},
    store::LedgerStore,
};

/// Account operations on behalf of an authenticated owner.
#[derive(Debug, Clone)]
pub struct AccountService<S> {
    store: S,
    engine: TransferEngine<S>,
    retry: RetryPolicy,
}

impl<S: LedgerStore> AccountService<S> {
    pub fn new(engine: TransferEngine<S>) -> Self {
        Self {
            store: engine.store().clone(),
            engine,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Open a new account for `owner` with a zero balance.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: unsupported currency
    /// - `Constraint`: the owner already holds an account in this currency
    pub async fn create_account(
        &self,
        owner: &str,
        request: CreateAccountRequest,
    ) -> Result<Account, AppError> {
        if !is_supported_currency(&request.currency) {
            return Err(AppError::InvalidRequest(format!(
                "unsupported currency: {}",
                request.currency
            )));
        }
        let account = self
            .store
            .create_account(CreateAccountParams {
                owner: owner.to_string(),
                currency: request.currency,
            })
            .await?;

        tracing::info!(account_id = account.id, owner, "account opened");
        Ok(account)
    }

    /// Fetch an account the caller owns.
    pub async fn get_account(&self, owner: &str, id: i64) -> Result<Account, AppError> {
        let account = self.store.get_account(id).await?;
        if account.owner != owner {
            return Err(LedgerError::NotFound("account").into());
        }
        Ok(account)
    }

    pub async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>, AppError> {
        let page = page.validate()?;
        let accounts = self
            .store
            .list_accounts(ListAccountsParams {
                owner: owner.to_string(),
                limit: page.limit,
                offset: page.offset,
            })
            .await?;
        Ok(accounts)
    }

    /// Close an account. Accounts with ledger history cannot be deleted.
    pub async fn delete_account(&self, owner: &str, id: i64) -> Result<(), AppError> {
        self.get_account(owner, id).await?;
        self.store.delete_account(id).await?;
        tracing::info!(account_id = id, owner, "account deleted");
        Ok(())
    }

    pub async fn list_entries(
        &self,
        owner: &str,
        account_id: i64,
        page: Page,
    ) -> Result<Vec<Entry>, AppError> {
        let page = page.validate()?;
        self.get_account(owner, account_id).await?;

        let entries = self
            .store
            .list_entries(ListEntriesParams {
                account_id,
                limit: page.limit,
                offset: page.offset,
            })
            .await?;
        Ok(entries)
    }

    /// Fetch a transfer that touches at least one of the caller's accounts.
    pub async fn get_transfer(&self, owner: &str, id: i64) -> Result<Transfer, AppError> {
        let transfer = self.store.get_transfer(id).await?;

        for account_id in [transfer.from_account_id, transfer.to_account_id] {
            match self.get_account(owner, account_id).await {
                Ok(_) => return Ok(transfer),
                Err(AppError::Ledger(LedgerError::NotFound(_))) => continue,
                Err(err) => return Err(err),
            }
        }

        Err(LedgerError::NotFound("transfer").into())
    }

    pub async fn list_transfers(
        &self,
        owner: &str,
        account_id: i64,
        page: Page,
    ) -> Result<Vec<Transfer>, AppError> {
        let page = page.validate()?;
        self.get_account(owner, account_id).await?;

        let transfers = self
            .store
            .list_transfers(ListTransfersParams {
                account_id,
                limit: page.limit,
                offset: page.offset,
            })
            .await?;
        Ok(transfers)
    }

    /// Validate a transfer request and hand it to the engine.
    ///
    /// # Validation
    ///
    /// - Source account must exist, be held in `currency` and belong to `owner`
    /// - Destination account must exist and be held in `currency`
    ///
    /// Conflicts are retried according to the service's [`RetryPolicy`].
    #[tracing::instrument(skip(self, request), fields(from = request.from_account_id, to = request.to_account_id))]
    pub async fn transfer(
        &self,
        owner: &str,
        request: TransferRequest,
    ) -> Result<TransactionResult, AppError> {
        let from_account = self.store.get_account(request.from_account_id).await?;
        if from_account.owner != owner {
            return Err(AppError::Forbidden(
                "from account does not belong to the authenticated owner".to_string(),
            ));
        }
        check_currency(&from_account, &request.currency)?;

        let to_account = self.store.get_account(request.to_account_id).await?;
        check_currency(&to_account, &request.currency)?;

        let result = self
            .engine
            .transfer_with_retry(request.params(), self.retry)
            .await?;
        Ok(result)
    }
}

fn check_currency(account: &Account, currency: &str) -> Result<(), AppError> {
    if account.currency != currency {
        return Err(AppError::InvalidRequest(format!(
            "account [{}] currency mismatch: {} vs {}",
            account.id, account.currency, currency
        )));
    }
    Ok(())
}
