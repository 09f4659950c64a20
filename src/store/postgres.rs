//! PostgreSQL Ledger Store

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, warn};

use super::error::StoreError;
use super::models::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, ListAccountsParams, ListEntriesParams, ListTransfersParams,
    Transfer, UpdateAccountParams,
};
use super::{Ledger, LedgerQueries, LedgerTx, queries};
use crate::config::DatabaseConfig;
use crate::db::Database;

/// Live store backed by a connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let db = Database::connect(config).await?;
        Ok(Self::new(db.into_pool()))
    }

    pub async fn create_account(&self, arg: &CreateAccountParams) -> Result<Account, StoreError> {
        queries::create_account(&self.pool, arg).await
    }

    pub async fn get_account(&self, id: i64) -> Result<Account, StoreError> {
        queries::get_account(&self.pool, id).await
    }

    pub async fn list_accounts(&self, arg: ListAccountsParams) -> Result<Vec<Account>, StoreError> {
        queries::list_accounts(&self.pool, arg).await
    }

    pub async fn update_account(&self, arg: UpdateAccountParams) -> Result<Account, StoreError> {
        queries::update_account(&self.pool, arg).await
    }

    pub async fn delete_account(&self, id: i64) -> Result<(), StoreError> {
        queries::delete_account(&self.pool, id).await
    }

    pub async fn get_entry(&self, id: i64) -> Result<Entry, StoreError> {
        queries::get_entry(&self.pool, id).await
    }

    pub async fn list_entries(&self, arg: ListEntriesParams) -> Result<Vec<Entry>, StoreError> {
        queries::list_entries(&self.pool, arg).await
    }

    pub async fn get_transfer(&self, id: i64) -> Result<Transfer, StoreError> {
        queries::get_transfer(&self.pool, id).await
    }

    pub async fn list_transfers(
        &self,
        arg: ListTransfersParams,
    ) -> Result<Vec<Transfer>, StoreError> {
        queries::list_transfers(&self.pool, arg).await
    }
}

#[async_trait]
impl LedgerQueries for PgStore {
    async fn create_transfer(&mut self, arg: CreateTransferParams) -> Result<Transfer, StoreError> {
        queries::create_transfer(&self.pool, arg).await
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
        queries::create_entry(&self.pool, arg).await
    }

    async fn get_account(&mut self, id: i64) -> Result<Account, StoreError> {
        queries::get_account(&self.pool, id).await
    }

    /// Outside a transaction the lock is released when the statement ends
    async fn get_account_for_update(&mut self, id: i64) -> Result<Account, StoreError> {
        queries::get_account_for_update(&self.pool, id).await
    }

    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> Result<Account, StoreError> {
        queries::add_account_balance(&self.pool, arg).await
    }
}

#[async_trait]
impl Ledger for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, StoreError> {
        let mut tx = self.pool.begin().await?;
        let backend_pid = queries::backend_pid(&mut *tx).await?;
        Ok(PgTx {
            tx: Some(tx),
            pool: self.pool.clone(),
            backend_pid,
        })
    }

    async fn begin_with_timeout(&self, timeout: Duration) -> Result<PgTx, StoreError> {
        let mut tx = self.begin().await?;
        queries::set_local_timeouts(tx.conn()?, timeout).await?;
        Ok(tx)
    }
}

/// Transaction-scoped handle.
///
/// Dropped while open (timeout, cancellation), it cancels whatever statement
/// its backend is still running and then rolls back, so row locks taken so
/// far are released right away instead of when that statement finishes.
pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
    pool: PgPool,
    backend_pid: i32,
}

impl PgTx {
    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx.as_deref_mut().ok_or_else(|| {
            StoreError::Database(sqlx::Error::Protocol(
                "transaction already finished".to_string(),
            ))
        })
    }
}

#[async_trait]
impl LedgerQueries for PgTx {
    async fn create_transfer(&mut self, arg: CreateTransferParams) -> Result<Transfer, StoreError> {
        queries::create_transfer(self.conn()?, arg).await
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
        queries::create_entry(self.conn()?, arg).await
    }

    async fn get_account(&mut self, id: i64) -> Result<Account, StoreError> {
        queries::get_account(self.conn()?, id).await
    }

    async fn get_account_for_update(&mut self, id: i64) -> Result<Account, StoreError> {
        queries::get_account_for_update(self.conn()?, id).await
    }

    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> Result<Account, StoreError> {
        queries::add_account_balance(self.conn()?, arg).await
    }
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn commit(mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

impl Drop for PgTx {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        // Without a runtime sqlx queues the ROLLBACK for the connection's next use
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let pool = self.pool.clone();
        let pid = self.backend_pid;
        warn!(backend_pid = pid, "Unit of work abandoned, cancelling backend");

        // The transaction keeps the connection checked out until the cancel
        // has landed, so the signal cannot hit a later borrower.
        handle.spawn(async move {
            if let Err(e) = queries::cancel_backend(&pool, pid).await {
                warn!(backend_pid = pid, error = %e, "Cancel request failed");
            }
            match tx.rollback().await {
                Ok(()) => debug!(backend_pid = pid, "Abandoned unit of work rolled back"),
                Err(e) => warn!(backend_pid = pid, error = %e, "Rollback of abandoned unit of work failed"),
            }
        });
    }
}
