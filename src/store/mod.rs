//! Ledger Store
//!
//! Row-level access to accounts, entries and transfers.
//!
//! Two backends share the same seams:
//! - [`PgStore`] / [`PgTx`]: PostgreSQL through sqlx
//! - [`MemoryStore`] / [`MemoryTx`]: in-process, with per-account row locks
//!
//! [`LedgerQueries`] is the statement set the Transfer Coordinator needs. It is
//! implemented by both the live stores and their transaction handles, so the
//! same call runs standalone or inside a unit of work.

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod queries;

pub use error::StoreError;
pub use memory::{MemoryStore, MemoryTx};
pub use models::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, ListAccountsParams, ListEntriesParams, ListTransfersParams,
    Transfer, UpdateAccountParams,
};
pub use postgres::{PgStore, PgTx};

use async_trait::async_trait;
use std::time::Duration;

/// Statements usable both on a live store and on a transaction handle
#[async_trait]
pub trait LedgerQueries: Send {
    async fn create_transfer(&mut self, arg: CreateTransferParams) -> Result<Transfer, StoreError>;

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError>;

    /// Plain read of the last committed row; never waits on a row lock.
    /// Yields [`StoreError::NotFound`] for a missing account.
    async fn get_account(&mut self, id: i64) -> Result<Account, StoreError>;

    /// Read and take the account's row lock for the rest of the unit of work
    async fn get_account_for_update(&mut self, id: i64) -> Result<Account, StoreError>;

    /// `balance = balance + amount`, evaluated by the store in one statement,
    /// returning the updated row. Takes the row lock.
    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> Result<Account, StoreError>;
}

/// Open unit of work. Dropping it without `commit` rolls it back and releases
/// its row locks, even when the drop interrupts a statement waiting on a lock.
#[async_trait]
pub trait LedgerTx: LedgerQueries + Sized {
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Store that can open units of work
#[async_trait]
pub trait Ledger: Send + Sync {
    type Tx: LedgerTx + 'static;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Open a unit of work whose statements the store itself gives up on
    /// after `timeout`.
    async fn begin_with_timeout(&self, timeout: Duration) -> Result<Self::Tx, StoreError> {
        let _ = timeout;
        self.begin().await
    }
}
