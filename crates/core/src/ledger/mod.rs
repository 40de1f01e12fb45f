//! Group expense ledger.
//!
//! This module implements the core ledger functionality:
//! - Domain types for groups, expenses and settlements
//! - Split validation with exact integer allocation
//! - The storage port and an in-memory store
//! - Balance derivation with a watermark cache
//! - Settlement planning
//! - Reversals
//! - The ledger service tying it together

pub mod balance;
pub mod error;
pub mod memory;
pub mod reversal;
pub mod service;
pub mod settlement;
pub mod split;
pub mod store;
pub mod types;

#[cfg(test)]
mod balance_props;
#[cfg(test)]
mod settlement_props;
#[cfg(test)]
mod split_props;

pub use balance::{BalanceEngine, GroupBalances, GroupPosition};
pub use error::{LedgerError, SplitError};
pub use memory::InMemoryLedgerStore;
pub use reversal::ReversalService;
pub use service::{LedgerService, RecordExpense, RecordSettlement};
pub use settlement::{SettlementPlanner, Transfer};
pub use split::{NormalizedSplits, SplitInput, SplitValidator};
pub use store::{
    LedgerStore, first_stale_member, history_stream, next_commit_time, projected_balances,
};
pub use types::{
    Expense, Group, GroupKind, HistoryWindow, LedgerEntry, NewGroup, SequencedEntry, Settlement,
    Split, SplitKind,
};
