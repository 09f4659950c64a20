//! SQL for the ledger tables.
//!
//! Every function is generic over the executor, so it runs against `&PgPool`
//! or against `&mut PgConnection` borrowed from an open transaction.

use sqlx::PgExecutor;
use std::time::Duration;

use super::error::StoreError;
use super::models::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, ListAccountsParams, ListEntriesParams, ListTransfersParams,
    Transfer, UpdateAccountParams,
};

// === Accounts ===

pub async fn create_account<'e, E: PgExecutor<'e>>(
    executor: E,
    arg: &CreateAccountParams,
) -> Result<Account, StoreError> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        INSERT INTO accounts (owner, balance, currency)
        VALUES ($1, $2, $3)
        RETURNING id, owner, balance, currency, created_at
        "#,
    )
    .bind(&arg.owner)
    .bind(arg.balance)
    .bind(&arg.currency)
    .fetch_one(executor)
    .await?;

    Ok(account)
}

pub async fn get_account<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<Account, StoreError> {
    let account = sqlx::query_as::<_, Account>(
        r#"SELECT id, owner, balance, currency, created_at FROM accounts WHERE id = $1 LIMIT 1"#,
    )
    .bind(id)
    .fetch_one(executor)
    .await?;

    Ok(account)
}

/// `FOR NO KEY UPDATE` so concurrent entry/transfer inserts referencing the
/// account (FK KEY SHARE locks) are not blocked.
pub async fn get_account_for_update<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<Account, StoreError> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        SELECT id, owner, balance, currency, created_at FROM accounts
        WHERE id = $1 LIMIT 1
        FOR NO KEY UPDATE
        "#,
    )
    .bind(id)
    .fetch_one(executor)
    .await?;

    Ok(account)
}

pub async fn list_accounts<'e, E: PgExecutor<'e>>(
    executor: E,
    arg: ListAccountsParams,
) -> Result<Vec<Account>, StoreError> {
    let accounts = sqlx::query_as::<_, Account>(
        r#"
        SELECT id, owner, balance, currency, created_at FROM accounts
        ORDER BY id
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(arg.limit)
    .bind(arg.offset)
    .fetch_all(executor)
    .await?;

    Ok(accounts)
}

/// Overwrites the balance. Not used by transfers.
pub async fn update_account<'e, E: PgExecutor<'e>>(
    executor: E,
    arg: UpdateAccountParams,
) -> Result<Account, StoreError> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        UPDATE accounts SET balance = $2
        WHERE id = $1
        RETURNING id, owner, balance, currency, created_at
        "#,
    )
    .bind(arg.id)
    .bind(arg.balance)
    .fetch_one(executor)
    .await?;

    Ok(account)
}

pub async fn add_account_balance<'e, E: PgExecutor<'e>>(
    executor: E,
    arg: AddAccountBalanceParams,
) -> Result<Account, StoreError> {
    let account = sqlx::query_as::<_, Account>(
        r#"
        UPDATE accounts SET balance = balance + $1
        WHERE id = $2
        RETURNING id, owner, balance, currency, created_at
        "#,
    )
    .bind(arg.amount)
    .bind(arg.id)
    .fetch_one(executor)
    .await?;

    Ok(account)
}

pub async fn delete_account<'e, E: PgExecutor<'e>>(executor: E, id: i64) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM accounts WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

// === Entries ===

pub async fn create_entry<'e, E: PgExecutor<'e>>(
    executor: E,
    arg: CreateEntryParams,
) -> Result<Entry, StoreError> {
    let entry = sqlx::query_as::<_, Entry>(
        r#"
        INSERT INTO entries (account_id, amount)
        VALUES ($1, $2)
        RETURNING id, account_id, amount, created_at
        "#,
    )
    .bind(arg.account_id)
    .bind(arg.amount)
    .fetch_one(executor)
    .await?;

    Ok(entry)
}

pub async fn get_entry<'e, E: PgExecutor<'e>>(executor: E, id: i64) -> Result<Entry, StoreError> {
    let entry = sqlx::query_as::<_, Entry>(
        r#"SELECT id, account_id, amount, created_at FROM entries WHERE id = $1 LIMIT 1"#,
    )
    .bind(id)
    .fetch_one(executor)
    .await?;

    Ok(entry)
}

pub async fn list_entries<'e, E: PgExecutor<'e>>(
    executor: E,
    arg: ListEntriesParams,
) -> Result<Vec<Entry>, StoreError> {
    let entries = sqlx::query_as::<_, Entry>(
        r#"
        SELECT id, account_id, amount, created_at FROM entries
        WHERE account_id = $1
        ORDER BY id
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(arg.account_id)
    .bind(arg.limit)
    .bind(arg.offset)
    .fetch_all(executor)
    .await?;

    Ok(entries)
}

// === Transfers ===

pub async fn create_transfer<'e, E: PgExecutor<'e>>(
    executor: E,
    arg: CreateTransferParams,
) -> Result<Transfer, StoreError> {
    let transfer = sqlx::query_as::<_, Transfer>(
        r#"
        INSERT INTO transfers (from_account_id, to_account_id, amount)
        VALUES ($1, $2, $3)
        RETURNING id, from_account_id, to_account_id, amount, created_at
        "#,
    )
    .bind(arg.from_account_id)
    .bind(arg.to_account_id)
    .bind(arg.amount)
    .fetch_one(executor)
    .await?;

    Ok(transfer)
}

pub async fn get_transfer<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<Transfer, StoreError> {
    let transfer = sqlx::query_as::<_, Transfer>(
        r#"
        SELECT id, from_account_id, to_account_id, amount, created_at FROM transfers
        WHERE id = $1 LIMIT 1
        "#,
    )
    .bind(id)
    .fetch_one(executor)
    .await?;

    Ok(transfer)
}

pub async fn list_transfers<'e, E: PgExecutor<'e>>(
    executor: E,
    arg: ListTransfersParams,
) -> Result<Vec<Transfer>, StoreError> {
    let transfers = sqlx::query_as::<_, Transfer>(
        r#"
        SELECT id, from_account_id, to_account_id, amount, created_at FROM transfers
        WHERE from_account_id = $1 OR to_account_id = $2
        ORDER BY id
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(arg.from_account_id)
    .bind(arg.to_account_id)
    .bind(arg.limit)
    .bind(arg.offset)
    .fetch_all(executor)
    .await?;

    Ok(transfers)
}

// === Session control ===

pub async fn backend_pid<'e, E: PgExecutor<'e>>(executor: E) -> Result<i32, StoreError> {
    let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
        .fetch_one(executor)
        .await?;
    Ok(pid)
}

/// `SET LOCAL lock_timeout` and `statement_timeout` for the open transaction,
/// so the server aborts a stuck statement even if the client is gone.
pub async fn set_local_timeouts<'e, E: PgExecutor<'e>>(
    executor: E,
    timeout: Duration,
) -> Result<(), StoreError> {
    let value = format!("{}ms", timeout.as_millis().max(1));
    sqlx::query(
        r#"
        SELECT set_config('lock_timeout', $1, true),
               set_config('statement_timeout', $1, true)
        "#,
    )
    .bind(value)
    .execute(executor)
    .await?;
    Ok(())
}

/// Interrupts whatever statement backend `pid` is running. Returns false if
/// the signal could not be sent.
pub async fn cancel_backend<'e, E: PgExecutor<'e>>(executor: E, pid: i32) -> Result<bool, StoreError> {
    let sent: bool = sqlx::query_scalar("SELECT pg_cancel_backend($1)")
        .bind(pid)
        .fetch_one(executor)
        .await?;
    Ok(sent)
}
