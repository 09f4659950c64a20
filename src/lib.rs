//! Ledger Transfer - atomic money movement between database accounts
//!
//! # Modules
//!
//! - [`transfer`] - Transfer Coordinator (the unit of work and its lock order)
//! - [`store`] - Ledger Store: accounts, entries, transfers (PostgreSQL / in-memory)
//! - [`db`] - PostgreSQL connection pool
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup
//! - [`util`] - random fixtures

pub mod config;
pub mod db;
pub mod logging;
pub mod store;
pub mod transfer;
pub mod util;

// Convenient re-exports at crate root
pub use config::{AppConfig, DatabaseConfig, TransferConfig};
pub use store::{
    Account, Entry, Ledger, LedgerQueries, LedgerTx, MemoryStore, PgStore, StoreError, Transfer,
};
pub use transfer::{TransferCoordinator, TransferError, TransferTxParams, TransferTxResult, TxContext};
