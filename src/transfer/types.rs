//! Transfer request / result types

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::store::{Account, Entry, Transfer};

/// Input of the transfer transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
}

impl TransferTxParams {
    pub fn new(from_account_id: i64, to_account_id: i64, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }
}

/// Everything the transfer transaction wrote, as committed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    /// Balance after the transfer
    pub from_account: Account,
    /// Balance after the transfer
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

/// Per-call context. `tx_name` tags every log line of the unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxContext {
    pub tx_name: String,
}

impl TxContext {
    pub fn new(tx_name: impl Into<String>) -> Self {
        Self {
            tx_name: tx_name.into(),
        }
    }
}

impl Default for TxContext {
    /// Random correlation id
    fn default() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for TxContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tx_name)
    }
}
