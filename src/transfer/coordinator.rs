//! Transfer Coordinator
//!
//! Runs the transfer as one unit of work on a [`Ledger`]:
//!
//! 1. insert the transfer row
//! 2. insert the debit entry (from, -amount)
//! 3. insert the credit entry (to, +amount)
//! 4. add the balance deltas, lower account id first
//! 5. commit, or roll back on any failure
//!
//! Step 4 is the only place account rows are locked. Taking the locks in
//! ascending id order, whatever the transfer direction, means every transfer
//! touching the same pair queues on the same first row, so A→B and B→A never
//! wait on each other in a cycle.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info_span, warn};

use super::error::TransferError;
use super::state::UnitOfWorkState;
use super::types::{TransferTxParams, TransferTxResult, TxContext};
use crate::config::TransferConfig;
use crate::store::{
    Account, AddAccountBalanceParams, CreateEntryParams, CreateTransferParams, Ledger,
    LedgerQueries, LedgerTx, StoreError,
};

/// Transfer Coordinator - one transactional operation over a ledger store
pub struct TransferCoordinator<L: Ledger> {
    ledger: Arc<L>,
    timeout: Option<Duration>,
}

impl<L: Ledger> Clone for TransferCoordinator<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            timeout: self.timeout,
        }
    }
}

impl<L: Ledger> TransferCoordinator<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self {
            ledger,
            timeout: None,
        }
    }

    pub fn with_config(ledger: Arc<L>, config: &TransferConfig) -> Self {
        Self {
            ledger,
            timeout: config.timeout(),
        }
    }

    /// Bound each transfer, lock waits included
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Move `amount` from one account to another.
    ///
    /// Creates the transfer record and both entries and updates both balances
    /// in a single unit of work. The returned accounts carry their balances
    /// after the transfer. On error nothing from this call is visible.
    pub async fn transfer_money(
        &self,
        ctx: &TxContext,
        arg: TransferTxParams,
    ) -> Result<TransferTxResult, TransferError> {
        self.transfer_money_until(ctx, arg, std::future::pending::<()>())
            .await
    }

    /// Like [`transfer_money`](Self::transfer_money), abandoning the unit of
    /// work when `cancel` completes first. An abandoned unit of work is
    /// dropped, which rolls it back and releases its row locks.
    pub async fn transfer_money_until<C>(
        &self,
        ctx: &TxContext,
        arg: TransferTxParams,
        cancel: C,
    ) -> Result<TransferTxResult, TransferError>
    where
        C: Future<Output = ()>,
    {
        validate(&arg)?;

        let span = info_span!(
            "transfer_tx",
            tx = %ctx.tx_name,
            from = arg.from_account_id,
            to = arg.to_account_id,
            amount = arg.amount
        );

        let tx_name = ctx.tx_name.clone();
        let work = self
            .exec_tx(move |q| Box::pin(async move { transfer_steps(q, &tx_name, arg).await }))
            .instrument(span);

        let bounded = async {
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(tx = %ctx.tx_name, timeout = ?limit, "Transfer timed out, unit of work abandoned");
                        Err(TransferError::TimedOut(limit))
                    }
                },
                None => work.await,
            }
        };

        tokio::select! {
            result = bounded => result,
            () = cancel => {
                warn!(tx = %ctx.tx_name, "Transfer cancelled, unit of work abandoned");
                Err(TransferError::Cancelled)
            }
        }
    }

    /// Run `f` inside a transaction; commit if it succeeds, roll back if not.
    ///
    /// A rollback failure is reported as [`TransferError::RollbackFailed`]
    /// carrying both errors.
    async fn exec_tx<T, F>(&self, f: F) -> Result<T, TransferError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut L::Tx) -> BoxFuture<'t, Result<T, StoreError>> + Send,
    {
        let mut tx = match self.timeout {
            Some(limit) => self.ledger.begin_with_timeout(limit).await?,
            None => self.ledger.begin().await?,
        };
        let state = UnitOfWorkState::Open;
        debug!(state = %state, "Unit of work begun");

        match f(&mut tx).await {
            Ok(value) => {
                if let Err(e) = tx.commit().await {
                    error!(state = %state.finish(false), error = %e, "Commit failed");
                    return Err(e.into());
                }
                debug!(state = %state.finish(true), "Unit of work committed");
                Ok(value)
            }
            Err(cause) => {
                let state = state.finish(false);
                if let Err(rollback) = tx.rollback().await {
                    error!(
                        state = %state,
                        error = %rollback,
                        cause = %cause,
                        "Rollback failed"
                    );
                    return Err(TransferError::RollbackFailed { rollback, cause });
                }
                debug!(state = %state, error = %cause, "Unit of work rolled back");
                Err(cause.into())
            }
        }
    }
}

fn validate(arg: &TransferTxParams) -> Result<(), TransferError> {
    if arg.from_account_id == arg.to_account_id {
        return Err(TransferError::SameAccount);
    }
    if arg.amount <= 0 {
        return Err(TransferError::InvalidAmount);
    }
    Ok(())
}

/// The five statements of a transfer, in order
async fn transfer_steps<Q>(
    q: &mut Q,
    tx_name: &str,
    arg: TransferTxParams,
) -> Result<TransferTxResult, StoreError>
where
    Q: LedgerQueries + ?Sized,
{
    debug!(tx = tx_name, "create transfer");
    let transfer = q
        .create_transfer(CreateTransferParams {
            from_account_id: arg.from_account_id,
            to_account_id: arg.to_account_id,
            amount: arg.amount,
        })
        .await?;

    debug!(tx = tx_name, "create entry 1");
    let from_entry = q
        .create_entry(CreateEntryParams {
            account_id: arg.from_account_id,
            amount: -arg.amount,
        })
        .await?;

    debug!(tx = tx_name, "create entry 2");
    let to_entry = q
        .create_entry(CreateEntryParams {
            account_id: arg.to_account_id,
            amount: arg.amount,
        })
        .await?;

    let (from_account, to_account) = if arg.from_account_id < arg.to_account_id {
        add_money(
            q,
            tx_name,
            arg.from_account_id,
            -arg.amount,
            arg.to_account_id,
            arg.amount,
        )
        .await?
    } else {
        let (to_account, from_account) = add_money(
            q,
            tx_name,
            arg.to_account_id,
            arg.amount,
            arg.from_account_id,
            -arg.amount,
        )
        .await?;
        (from_account, to_account)
    };

    Ok(TransferTxResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

/// Apply two balance deltas in the given order. Callers pass the lower id first.
async fn add_money<Q>(
    q: &mut Q,
    tx_name: &str,
    account_id1: i64,
    amount1: i64,
    account_id2: i64,
    amount2: i64,
) -> Result<(Account, Account), StoreError>
where
    Q: LedgerQueries + ?Sized,
{
    debug!(tx = tx_name, account_id = account_id1, "update account 1");
    let account1 = q
        .add_account_balance(AddAccountBalanceParams {
            id: account_id1,
            amount: amount1,
        })
        .await?;

    debug!(tx = tx_name, account_id = account_id2, "update account 2");
    let account2 = q
        .add_account_balance(AddAccountBalanceParams {
            id: account_id2,
            amount: amount2,
        })
        .await?;

    Ok((account1, account2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_same_account() {
        let err = validate(&TransferTxParams::new(7, 7, 10)).unwrap_err();
        assert!(matches!(err, TransferError::SameAccount));
    }

    #[test]
    fn test_validate_amount() {
        assert!(matches!(
            validate(&TransferTxParams::new(1, 2, 0)),
            Err(TransferError::InvalidAmount)
        ));
        assert!(matches!(
            validate(&TransferTxParams::new(1, 2, -5)),
            Err(TransferError::InvalidAmount)
        ));
        assert!(validate(&TransferTxParams::new(1, 2, 5)).is_ok());
    }
}
