//! Storage port for groups and their append-only ledgers.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use splitledger_shared::types::{ExpenseId, GroupId, UserId};
use std::collections::HashMap;
use std::sync::Arc;

use super::error::LedgerError;
use super::types::{Expense, Group, HistoryWindow, LedgerEntry, SequencedEntry, Settlement};

/// Durable storage of groups, expenses and settlements.
///
/// Appends to one group are linearizable. Implementations re-check
/// membership and reversal rules at their serialization point and either
/// commit the whole entry or nothing.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persists a new group.
    async fn create_group(&self, group: Group) -> Result<Group, LedgerError>;

    /// Looks up a group by ID.
    async fn group(&self, id: GroupId) -> Result<Option<Group>, LedgerError>;

    /// Lists every group `user` belongs to, oldest first.
    async fn groups_for_member(&self, user: UserId) -> Result<Vec<Group>, LedgerError>;

    /// Appends an expense (or reversal) and returns it with its sequence.
    ///
    /// The store stamps `created_at`.
    async fn append_expense(&self, expense: Expense) -> Result<SequencedEntry, LedgerError>;

    /// Appends a settlement and returns it with its sequence.
    ///
    /// The store stamps `created_at`.
    async fn append_settlement(
        &self,
        settlement: Settlement,
    ) -> Result<SequencedEntry, LedgerError>;

    /// Sequence of the latest committed entry; 0 for an empty ledger.
    async fn head(&self, group: GroupId) -> Result<u64, LedgerError>;

    /// Up to `limit` entries inside `window`, in sequence order.
    async fn history_page(
        &self,
        group: GroupId,
        window: HistoryWindow,
        limit: u32,
    ) -> Result<Vec<SequencedEntry>, LedgerError>;

    /// Looks up one expense of a group.
    async fn expense(
        &self,
        group: GroupId,
        id: ExpenseId,
    ) -> Result<Option<Expense>, LedgerError>;
}

/// Lazily streams a group's history, one page at a time.
///
/// Each page resumes after the last sequence seen, so dropping and rebuilding
/// the stream with [`HistoryWindow::resume_after`] restarts it where it left off.
pub fn history_stream(
    store: Arc<dyn LedgerStore>,
    group: GroupId,
    window: HistoryWindow,
    page_size: u32,
) -> BoxStream<'static, Result<SequencedEntry, LedgerError>> {
    let page_size = page_size.max(1);

    stream::try_unfold(Some(window), move |cursor| {
        let store = Arc::clone(&store);
        async move {
            let Some(window) = cursor else {
                return Ok::<_, LedgerError>(None);
            };

            let page = store.history_page(group, window, page_size).await?;
            let full_page = page.len() >= page_size as usize;
            let next = match page.last() {
                Some(last) if full_page && !window.exhausted_at(last.sequence) => {
                    Some(window.resume_after(last.sequence))
                }
                _ => None,
            };

            if page.is_empty() {
                Ok(None)
            } else {
                Ok(Some((page, next)))
            }
        }
    })
    .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, LedgerError>)))
    .try_flatten()
    .boxed()
}

/// Members referenced by an entry that must belong to the group.
pub fn referenced_members(entry: &LedgerEntry) -> Vec<UserId> {
    match entry {
        LedgerEntry::Expense(expense) => expense.participants().collect(),
        LedgerEntry::Settlement(settlement) => vec![settlement.from, settlement.to],
    }
}

/// Returns the first referenced member outside the group.
pub fn first_stale_member(group: &Group, entry: &LedgerEntry) -> Option<UserId> {
    referenced_members(entry)
        .into_iter()
        .find(|member| !group.is_member(*member))
}

/// Balances of the members an entry touches once it is applied on top of
/// `current` (minor units; absent members are at zero).
///
/// Stores call this at their serialization point and persist only entries
/// that pass, so every committed history folds without overflow.
pub fn projected_balances(
    current: &HashMap<UserId, i64>,
    entry: &LedgerEntry,
) -> Result<Vec<(UserId, i64)>, LedgerError> {
    entry
        .balance_deltas()
        .into_iter()
        .map(|(member, delta)| {
            let balance = i128::from(current.get(&member).copied().unwrap_or(0)) + delta;
            i64::try_from(balance)
                .map(|minor| (member, minor))
                .map_err(|_| LedgerError::BalanceOutOfRange(member))
        })
        .collect()
}

/// Commit time for the next entry of a ledger whose latest entry was
/// committed at `last`.
///
/// Strictly increasing per group and truncated to microseconds, so ordering by
/// `(created_at, sequence)` equals ordering by sequence in every store.
#[must_use]
pub fn next_commit_time(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match last {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    }
}
