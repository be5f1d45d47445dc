//! Transfer engine - atomic, deadlock-free money movement.
//!
//! One call to [`TransferEngine::transfer`] writes four kinds of change in a
//! single unit of work: a transfer record, a debit entry, a credit entry and
//! two balance updates. Either all of them commit or none do.
//!
//! # Lock Order
//!
//! Both account rows are locked, and later updated, lowest id first no
//! matter which side is debited. Transfers A→B and B→A therefore queue on
//! the same row first and can never wait on each other in a cycle.
//!
//! # Concurrency
//!
//! The engine holds nothing but a store handle. All serialization between
//! concurrent calls happens through the store's row locks.

use std::time::Duration;

use rust_decimal::Decimal;

use crate::{
    error::LedgerError,
    models::{
        account::{MONEY_SCALE, is_representable},
        entry::CreateEntryParams,
        transfer::{CreateTransferParams, TransactionResult, TransferParams},
    },
    store::{LedgerStore, LedgerTx, run_atomic},
};

/// Bounded retry for transfers that hit a transient conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each one after.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(20),
        }
    }
}

/// Executes transfers against a [`LedgerStore`].
#[derive(Debug, Clone)]
pub struct TransferEngine<S> {
    store: S,
    timeout: Option<Duration>,
}

impl<S: LedgerStore> TransferEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            timeout: None,
        }
    }

    /// Abort and roll back any transfer still running after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Move `params.amount` from one account to another.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument`: the accounts are equal, or the amount is not
    ///   positive or not exactly representable in the money columns
    /// - `NotFound`: either account does not exist
    /// - `Conflict`: the store hit a transient conflict; safe to call again
    /// - `Timeout`: the configured deadline passed and the unit was rolled back
    /// - anything else the store reports, unchanged
    #[tracing::instrument(
        skip(self),
        fields(
            from = params.from_account_id,
            to = params.to_account_id,
            amount = %params.amount,
        )
    )]
    pub async fn transfer(&self, params: TransferParams) -> Result<TransactionResult, LedgerError> {
        validate(&params)?;

        let unit = run_atomic(&self.store, move |tx| {
            Box::pin(async move { execute(tx, params).await })
        });

        let result = match self.timeout {
            // dropping the unit on expiry rolls it back
            Some(limit) => tokio::time::timeout(limit, unit)
                .await
                .map_err(|_| LedgerError::Timeout(limit))?,
            None => unit.await,
        };

        match &result {
            Ok(outcome) => tracing::info!(transfer_id = outcome.transfer.id, "transfer committed"),
            Err(err) => tracing::warn!(error = %err, "transfer aborted"),
        }

        result
    }

    /// Like [`transfer`](Self::transfer), re-running the whole transfer
    /// while it fails with a retryable conflict.
    ///
    /// Every attempt that reaches the store starts a fresh unit, so a
    /// retried transfer is never applied twice.
    pub async fn transfer_with_retry(
        &self,
        params: TransferParams,
        policy: RetryPolicy,
    ) -> Result<TransactionResult, LedgerError> {
        let mut delay = policy.backoff;
        let mut attempt = 1;

        loop {
            match self.transfer(params).await {
                Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                    tracing::debug!(attempt, error = %err, "retrying transfer after conflict");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

fn validate(params: &TransferParams) -> Result<(), LedgerError> {
    if params.from_account_id == params.to_account_id {
        return Err(LedgerError::InvalidArgument(
            "cannot transfer to the same account".to_string(),
        ));
    }
    if params.amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidArgument(
            "amount must be positive".to_string(),
        ));
    }
    // the store would round each side separately
    if !is_representable(params.amount) {
        return Err(LedgerError::InvalidArgument(format!(
            "amount {} needs more than {MONEY_SCALE} decimal places or 15 integer digits",
            params.amount
        )));
    }
    Ok(())
}

/// Accounts in the order their rows must be locked: lowest id first.
///
/// Each element pairs an account id with the delta applied to it.
fn lock_order(params: &TransferParams) -> [(i64, Decimal); 2] {
    let debit = (params.from_account_id, -params.amount);
    let credit = (params.to_account_id, params.amount);

    if params.from_account_id < params.to_account_id {
        [debit, credit]
    } else {
        [credit, debit]
    }
}

/// Body of the atomic unit.
async fn execute<T: LedgerTx>(
    tx: &mut T,
    params: TransferParams,
) -> Result<TransactionResult, LedgerError> {
    let ordered = lock_order(&params);

    for (account_id, _) in ordered {
        tx.lock_account(account_id).await?;
    }

    let transfer = tx
        .create_transfer(CreateTransferParams {
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
        })
        .await?;

    let from_entry = tx
        .create_entry(CreateEntryParams {
            account_id: params.from_account_id,
            amount: -params.amount,
        })
        .await?;

    let to_entry = tx
        .create_entry(CreateEntryParams {
            account_id: params.to_account_id,
            amount: params.amount,
        })
        .await?;

    let [(first_id, first_delta), (second_id, second_delta)] = ordered;
    let first = tx.add_account_balance(first_id, first_delta).await?;
    let second = tx.add_account_balance(second_id, second_delta).await?;

    let (from_account, to_account) = if first.id == params.from_account_id {
        (first, second)
    } else {
        (second, first)
    };

    Ok(TransactionResult {
        transfer,
        from_entry,
        to_entry,
        from_account,
        to_account,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn params(from: i64, to: i64, amount: Decimal) -> TransferParams {
        TransferParams {
            from_account_id: from,
            to_account_id: to,
            amount,
        }
    }

    #[test]
    fn lower_id_is_locked_first_in_both_directions() {
        let forward = lock_order(&params(3, 7, dec!(10)));
        let backward = lock_order(&params(7, 3, dec!(10)));

        assert_eq!(forward, [(3, dec!(-10)), (7, dec!(10))]);
        assert_eq!(backward, [(3, dec!(10)), (7, dec!(-10))]);
    }

    #[rstest]
    #[case(params(5, 5, dec!(10)))]
    #[case(params(1, 2, dec!(0)))]
    #[case(params(1, 2, dec!(-3.5)))]
    #[case(params(1, 2, dec!(0.00005)))]
    #[tokio::test]
    async fn rejects_invalid_transfers(#[case] request: TransferParams) {
        let engine = TransferEngine::new(MemoryLedgerStore::new());

        let err = engine.transfer(request).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }
}
