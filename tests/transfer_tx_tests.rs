//! Concurrent transfers against the in-memory ledger store.
//!
//! The store blocks on real per-row locks, so a lock-order bug shows up here
//! as a hang; every test is wrapped in a timeout to turn that into a failure.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ledger_transfer::store::{CreateAccountParams, ListAccountsParams, ListEntriesParams};
use ledger_transfer::util::{random_currency, random_money, random_owner};
use ledger_transfer::{
    Account, AppConfig, MemoryStore, TransferCoordinator, TransferTxParams, TxContext,
};

const DEADLOCK_GUARD: Duration = Duration::from_secs(10);

async fn create_random_account(store: &MemoryStore) -> Account {
    let arg = CreateAccountParams {
        owner: random_owner(),
        balance: random_money(),
        currency: random_currency(),
    };

    let account = store.create_account(&arg).await.unwrap();

    assert_eq!(account.owner, arg.owner);
    assert_eq!(account.balance, arg.balance);
    assert_eq!(account.currency, arg.currency);
    assert!(account.id > 0);

    account
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transfers_same_direction() {
    let store = MemoryStore::new();
    let account1 = create_random_account(&store).await;
    let account2 = create_random_account(&store).await;
    let coordinator = TransferCoordinator::new(Arc::new(store.clone()));

    let n = 5;
    let amount = 10;

    let (from, to) = (account1.id, account2.id);
    let mut handles = Vec::with_capacity(n);
    for i in 0..n {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .transfer_money(
                    &TxContext::new(format!("tx {}", i + 1)),
                    TransferTxParams::new(from, to, amount),
                )
                .await
        }));
    }

    let results = tokio::time::timeout(DEADLOCK_GUARD, futures::future::join_all(handles))
        .await
        .expect("transfers deadlocked");

    let mut seen = HashSet::new();
    for joined in results {
        let result = joined.unwrap().unwrap();

        assert_eq!(result.transfer.from_account_id, account1.id);
        assert_eq!(result.transfer.to_account_id, account2.id);
        assert_eq!(result.transfer.amount, amount);
        assert_eq!(result.from_entry.amount, -amount);
        assert_eq!(result.to_entry.amount, amount);
        assert!(store.get_transfer(result.transfer.id).await.is_ok());
        assert!(store.get_entry(result.from_entry.id).await.is_ok());
        assert!(store.get_entry(result.to_entry.id).await.is_ok());

        // Each transfer observed a distinct serialized position k
        let diff1 = account1.balance - result.from_account.balance;
        let diff2 = result.to_account.balance - account2.balance;
        assert_eq!(diff1, diff2);
        assert!(diff1 > 0);
        assert_eq!(diff1 % amount, 0);

        let k = diff1 / amount;
        assert!((1..=n as i64).contains(&k));
        assert!(seen.insert(k), "position {} seen twice", k);
    }

    let updated1 = store.get_account(account1.id).await.unwrap();
    let updated2 = store.get_account(account2.id).await.unwrap();
    assert_eq!(updated1.balance, account1.balance - n as i64 * amount);
    assert_eq!(updated2.balance, account2.balance + n as i64 * amount);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transfers_alternating_direction_no_deadlock() {
    let store = MemoryStore::new();
    let account1 = create_random_account(&store).await;
    let account2 = create_random_account(&store).await;
    let coordinator = TransferCoordinator::new(Arc::new(store.clone()));

    let n = 10;
    let amount = 10;

    let mut handles = Vec::with_capacity(n);
    for i in 0..n {
        let (from, to) = if i % 2 == 1 {
            (account2.id, account1.id)
        } else {
            (account1.id, account2.id)
        };
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .transfer_money(
                    &TxContext::new(format!("tx {}", i + 1)),
                    TransferTxParams::new(from, to, amount),
                )
                .await
        }));
    }

    let results = tokio::time::timeout(DEADLOCK_GUARD, futures::future::join_all(handles))
        .await
        .expect("transfers deadlocked");
    for joined in results {
        joined.unwrap().unwrap();
    }

    // Five each way: net zero
    let updated1 = store.get_account(account1.id).await.unwrap();
    let updated2 = store.get_account(account2.id).await.unwrap();
    assert_eq!(updated1.balance, account1.balance);
    assert_eq!(updated2.balance, account2.balance);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transfers_random_amounts_conserve_money() {
    let store = MemoryStore::new();
    let mut accounts = Vec::new();
    for _ in 0..4 {
        accounts.push(create_random_account(&store).await);
    }
    let total_before: i64 = accounts.iter().map(|a| a.balance).sum();
    let coordinator = TransferCoordinator::new(Arc::new(store.clone()));

    let mut handles = Vec::new();
    for i in 0..24 {
        let from = accounts[i % 4].id;
        let to = accounts[(i * 3 + 1) % 4].id;
        if from == to {
            continue;
        }
        let amount = ledger_transfer::util::random_int(1, 50);
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .transfer_money(&TxContext::default(), TransferTxParams::new(from, to, amount))
                .await
        }));
    }

    let results = tokio::time::timeout(DEADLOCK_GUARD, futures::future::join_all(handles))
        .await
        .expect("transfers deadlocked");

    let mut net = std::collections::HashMap::new();
    for joined in results {
        let result = joined.unwrap().unwrap();
        assert_eq!(result.from_entry.amount + result.to_entry.amount, 0);
        *net.entry(result.transfer.from_account_id).or_insert(0i64) -= result.transfer.amount;
        *net.entry(result.transfer.to_account_id).or_insert(0i64) += result.transfer.amount;
    }

    let mut total_after = 0;
    for account in &accounts {
        let current = store.get_account(account.id).await.unwrap();
        let expected = account.balance + net.get(&account.id).copied().unwrap_or(0);
        assert_eq!(current.balance, expected);

        let posted: i64 = store
            .list_entries(ListEntriesParams {
                account_id: account.id,
                limit: 1000,
                offset: 0,
            })
            .await
            .unwrap()
            .iter()
            .map(|e| e.amount)
            .sum();
        assert_eq!(current.balance, account.balance + posted);
        total_after += current.balance;
    }
    assert_eq!(total_after, total_before);
}

#[tokio::test]
async fn list_accounts_returns_requested_page() {
    let store = MemoryStore::new();
    for _ in 0..10 {
        create_random_account(&store).await;
    }

    let accounts = store
        .list_accounts(ListAccountsParams {
            limit: 5,
            offset: 5,
        })
        .await
        .unwrap();
    assert_eq!(accounts.len(), 5);

    for account in &accounts {
        assert!(account.id > 0);
        assert!(!account.owner.is_empty());
        assert!(account.created_at.timestamp() > 0);
    }
}

#[test]
fn dev_config_loads() {
    let config = AppConfig::load("dev").unwrap();
    assert!(!config.database.url.is_empty());
    assert_eq!(config.transfer.timeout(), Some(Duration::from_secs(5)));
}
