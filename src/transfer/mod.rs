//! Transfer Coordinator
//!
//! Moves money between two accounts as one atomic unit of work.
//!
//! # Unit of work
//!
//! ```text
//! BEGIN
//!   INSERT transfer (from, to, amount)
//!   INSERT entry (from, -amount)
//!   INSERT entry (to, +amount)
//!   UPDATE balance += delta   -- lower account id
//!   UPDATE balance += delta   -- higher account id
//! COMMIT | ROLLBACK
//! ```
//!
//! # Safety Invariants
//!
//! 1. **All or nothing**: the five statements commit together or not at all
//! 2. **Zero-sum**: the two entries of a transfer add up to zero
//! 3. **Lock order**: balance rows are locked in ascending account id, so
//!    concurrent transfers over the same accounts never deadlock
//! 4. **Atomic delta**: balances change only through the store's
//!    increment-and-return statement, never read-then-write

pub mod coordinator;
pub mod error;
pub mod state;
pub mod types;

pub use coordinator::TransferCoordinator;
pub use error::TransferError;
pub use state::UnitOfWorkState;
pub use types::{TransferTxParams, TransferTxResult, TxContext};
