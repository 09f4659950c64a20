//! In-memory Ledger Store
//!
//! Each account row is a working copy behind its own `tokio::sync::Mutex`
//! plus the last committed version. A [`MemoryTx`] takes a row's lock the
//! first time it writes (or selects for update) that row and holds it until
//! commit, rollback or drop, like PostgreSQL row locks inside a transaction.
//! Plain reads see the committed version and never wait. Entry and transfer
//! inserts are staged in the transaction and published on commit.
//!
//! Lock waits are real: two transactions locking the same rows in opposite
//! order block each other forever.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::debug;

use super::error::StoreError;
use super::models::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, ListAccountsParams, ListEntriesParams, ListTransfersParams,
    Transfer, UpdateAccountParams, page_bounds,
};
use super::{Ledger, LedgerQueries, LedgerTx};

#[derive(Clone)]
struct Row {
    working: Arc<RowLock<Account>>,
    committed: Arc<Mutex<Account>>,
}

impl Row {
    fn new(account: Account) -> Self {
        Self {
            working: Arc::new(RowLock::new(account.clone())),
            committed: Arc::new(Mutex::new(account)),
        }
    }

    fn snapshot(&self) -> Account {
        lock_std(&self.committed).clone()
    }

    fn publish(&self, account: &Account) {
        *lock_std(&self.committed) = account.clone();
    }
}

fn lock_std<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<i64, Row>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
}

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    account_seq: AtomicI64,
    entry_seq: AtomicI64,
    transfer_seq: AtomicI64,
}

impl Shared {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        lock_std(&self.tables)
    }

    fn row(&self, id: i64) -> Result<Row, StoreError> {
        self.tables()
            .accounts
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn has_account(&self, id: i64) -> bool {
        self.tables().accounts.contains_key(&id)
    }

    /// Sequences are never rolled back, same as PostgreSQL serials
    fn next_id(seq: &AtomicI64) -> i64 {
        seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Live in-memory store. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_account(&self, arg: &CreateAccountParams) -> Result<Account, StoreError> {
        let account = Account {
            id: Shared::next_id(&self.shared.account_seq),
            owner: arg.owner.clone(),
            balance: arg.balance,
            currency: arg.currency.clone(),
            created_at: Utc::now(),
        };
        self.shared
            .tables()
            .accounts
            .insert(account.id, Row::new(account.clone()));
        Ok(account)
    }

    /// Last committed version of the row
    pub async fn get_account(&self, id: i64) -> Result<Account, StoreError> {
        Ok(self.shared.row(id)?.snapshot())
    }

    pub async fn list_accounts(&self, arg: ListAccountsParams) -> Result<Vec<Account>, StoreError> {
        let (limit, offset) = page_bounds(arg.limit, arg.offset)?;
        Ok(self
            .shared
            .tables()
            .accounts
            .values()
            .skip(offset)
            .take(limit)
            .map(Row::snapshot)
            .collect())
    }

    /// Waits for the row lock like a single-statement UPDATE
    pub async fn update_account(&self, arg: UpdateAccountParams) -> Result<Account, StoreError> {
        let row = self.shared.row(arg.id)?;
        let mut account = row.working.lock().await;
        account.balance = arg.balance;
        row.publish(&account);
        Ok(account.clone())
    }

    /// Deleting a missing account is a no-op; deleting a referenced one is a
    /// foreign key violation.
    pub async fn delete_account(&self, id: i64) -> Result<(), StoreError> {
        let row = match self.shared.row(id) {
            Ok(row) => row,
            Err(StoreError::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        };
        let _locked = row.working.lock().await;

        let mut tables = self.shared.tables();
        if tables.entries.values().any(|e| e.account_id == id) {
            return Err(StoreError::Constraint("entries_account_id_fkey".to_string()));
        }
        if tables
            .transfers
            .values()
            .any(|t| t.from_account_id == id || t.to_account_id == id)
        {
            return Err(StoreError::Constraint(
                "transfers_from_account_id_fkey".to_string(),
            ));
        }
        tables.accounts.remove(&id);
        Ok(())
    }

    pub async fn get_entry(&self, id: i64) -> Result<Entry, StoreError> {
        self.shared
            .tables()
            .entries
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    pub async fn list_entries(&self, arg: ListEntriesParams) -> Result<Vec<Entry>, StoreError> {
        let (limit, offset) = page_bounds(arg.limit, arg.offset)?;
        Ok(self
            .shared
            .tables()
            .entries
            .values()
            .filter(|e| e.account_id == arg.account_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    pub async fn get_transfer(&self, id: i64) -> Result<Transfer, StoreError> {
        self.shared
            .tables()
            .transfers
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    pub async fn list_transfers(
        &self,
        arg: ListTransfersParams,
    ) -> Result<Vec<Transfer>, StoreError> {
        let (limit, offset) = page_bounds(arg.limit, arg.offset)?;
        Ok(self
            .shared
            .tables()
            .transfers
            .values()
            .filter(|t| {
                t.from_account_id == arg.from_account_id || t.to_account_id == arg.to_account_id
            })
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn begin_tx(&self) -> MemoryTx {
        MemoryTx {
            shared: Arc::clone(&self.shared),
            locks: HashMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
            finished: false,
        }
    }
}

/// Single statements run in their own implicit unit of work
#[async_trait]
impl LedgerQueries for MemoryStore {
    async fn create_transfer(&mut self, arg: CreateTransferParams) -> Result<Transfer, StoreError> {
        let mut tx = self.begin_tx();
        let transfer = tx.create_transfer(arg).await?;
        tx.commit().await?;
        Ok(transfer)
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
        let mut tx = self.begin_tx();
        let entry = tx.create_entry(arg).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn get_account(&mut self, id: i64) -> Result<Account, StoreError> {
        MemoryStore::get_account(self, id).await
    }

    async fn get_account_for_update(&mut self, id: i64) -> Result<Account, StoreError> {
        let mut tx = self.begin_tx();
        let account = tx.get_account_for_update(id).await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> Result<Account, StoreError> {
        let mut tx = self.begin_tx();
        let account = tx.add_account_balance(arg).await?;
        tx.commit().await?;
        Ok(account)
    }
}

#[async_trait]
impl Ledger for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        Ok(self.begin_tx())
    }
}

struct LockedRow {
    guard: OwnedMutexGuard<Account>,
    row: Row,
}

/// Transaction handle over a [`MemoryStore`]
pub struct MemoryTx {
    shared: Arc<Shared>,
    locks: HashMap<i64, LockedRow>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
    finished: bool,
}

impl MemoryTx {
    async fn lock_row(&mut self, id: i64) -> Result<&mut OwnedMutexGuard<Account>, StoreError> {
        if !self.locks.contains_key(&id) {
            let row = self.shared.row(id)?;
            let guard = Arc::clone(&row.working).lock_owned().await;
            // Deleted while we were waiting on it
            if !self.shared.has_account(id) {
                return Err(StoreError::NotFound);
            }
            self.locks.insert(id, LockedRow { guard, row });
        }
        self.locks
            .get_mut(&id)
            .map(|locked| &mut locked.guard)
            .ok_or(StoreError::NotFound)
    }

    fn revert(&mut self) {
        for locked in self.locks.values_mut() {
            *locked.guard = locked.row.snapshot();
        }
        self.locks.clear();
        self.entries.clear();
        self.transfers.clear();
    }

    fn publish(&mut self) {
        for locked in self.locks.values() {
            locked.row.publish(&locked.guard);
        }
        let mut tables = self.shared.tables();
        for entry in self.entries.drain(..) {
            tables.entries.insert(entry.id, entry);
        }
        for transfer in self.transfers.drain(..) {
            tables.transfers.insert(transfer.id, transfer);
        }
    }
}

#[async_trait]
impl LedgerQueries for MemoryTx {
    async fn create_transfer(&mut self, arg: CreateTransferParams) -> Result<Transfer, StoreError> {
        if !self.shared.has_account(arg.from_account_id) {
            return Err(StoreError::Constraint(
                "transfers_from_account_id_fkey".to_string(),
            ));
        }
        if !self.shared.has_account(arg.to_account_id) {
            return Err(StoreError::Constraint(
                "transfers_to_account_id_fkey".to_string(),
            ));
        }
        if arg.amount <= 0 {
            return Err(StoreError::Constraint("transfers_amount_check".to_string()));
        }

        let transfer = Transfer {
            id: Shared::next_id(&self.shared.transfer_seq),
            from_account_id: arg.from_account_id,
            to_account_id: arg.to_account_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
        if !self.shared.has_account(arg.account_id) {
            return Err(StoreError::Constraint("entries_account_id_fkey".to_string()));
        }

        let entry = Entry {
            id: Shared::next_id(&self.shared.entry_seq),
            account_id: arg.account_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_account(&mut self, id: i64) -> Result<Account, StoreError> {
        if let Some(locked) = self.locks.get(&id) {
            return Ok(locked.guard.clone());
        }
        Ok(self.shared.row(id)?.snapshot())
    }

    async fn get_account_for_update(&mut self, id: i64) -> Result<Account, StoreError> {
        let guard = self.lock_row(id).await?;
        Ok(guard.clone())
    }

    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> Result<Account, StoreError> {
        let guard = self.lock_row(arg.id).await?;
        guard.balance = guard
            .balance
            .checked_add(arg.amount)
            .ok_or_else(|| StoreError::Constraint("bigint out of range".to_string()))?;
        Ok(guard.clone())
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn commit(mut self) -> Result<(), StoreError> {
        self.publish();
        self.locks.clear();
        self.finished = true;
        debug!("memory tx committed");
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.revert();
        self.finished = true;
        debug!("memory tx rolled back");
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                locked_rows = self.locks.len(),
                "memory tx dropped while open, rolling back"
            );
            self.revert();
        }
    }
}
