//! In-memory ledger store.
//!
//! Each group owns a `tokio::sync::Mutex` guarding its entries. Appends take
//! the lock with a bounded wait, check every rule, then mutate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use splitledger_shared::types::{ExpenseId, GroupId, UserId};
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use super::error::LedgerError;
use super::store::{LedgerStore, first_stale_member, next_commit_time, projected_balances};
use super::types::{Expense, Group, HistoryWindow, LedgerEntry, SequencedEntry, Settlement};

#[derive(Debug)]
struct GroupLedger {
    entries: Vec<SequencedEntry>,
    /// Index into `entries` by expense ID.
    expenses: HashMap<ExpenseId, usize>,
    /// original -> reversal
    reversals: HashMap<ExpenseId, ExpenseId>,
    /// Running net balance per member, in minor units.
    balances: HashMap<UserId, i64>,
}

impl GroupLedger {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            expenses: HashMap::new(),
            reversals: HashMap::new(),
            balances: HashMap::new(),
        }
    }

    fn head(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.sequence)
    }

    fn expense(&self, id: ExpenseId) -> Option<&Expense> {
        let idx = self.expenses.get(&id)?;
        match &self.entries.get(*idx)?.entry {
            LedgerEntry::Expense(expense) => Some(expense),
            LedgerEntry::Settlement(_) => None,
        }
    }

    fn check_reversal(&self, reversal: &Expense) -> Result<(), LedgerError> {
        let Some(original_id) = reversal.reverses else {
            return Ok(());
        };
        let original = self
            .expense(original_id)
            .ok_or(LedgerError::ExpenseNotFound(original_id))?;
        if original.is_reversal() {
            return Err(LedgerError::CannotReverseReversal(original_id));
        }
        if self.reversals.contains_key(&original_id) {
            return Err(LedgerError::AlreadyReversed(original_id));
        }
        Ok(())
    }

    fn push(&mut self, mut entry: LedgerEntry) -> SequencedEntry {
        let last = self.entries.last().map(|e| e.entry.created_at());
        entry.set_created_at(next_commit_time(last));

        let sequence = self.head() + 1;
        if let LedgerEntry::Expense(expense) = &entry {
            self.expenses.insert(expense.id, self.entries.len());
            if let Some(original) = expense.reverses {
                self.reversals.insert(original, expense.id);
            }
        }

        let sequenced = SequencedEntry { sequence, entry };
        self.entries.push(sequenced.clone());
        sequenced
    }
}

#[derive(Debug, Clone)]
struct GroupSlot {
    group: Arc<Group>,
    ledger: Arc<Mutex<GroupLedger>>,
}

/// Ledger store backed by process memory.
#[derive(Debug)]
pub struct InMemoryLedgerStore {
    groups: DashMap<GroupId, GroupSlot>,
    contention_timeout: Duration,
}

impl InMemoryLedgerStore {
    /// Creates an empty store whose appends wait at most `contention_timeout`
    /// for a group's lock.
    #[must_use]
    pub fn new(contention_timeout: Duration) -> Self {
        Self {
            groups: DashMap::new(),
            contention_timeout,
        }
    }

    fn slot(&self, id: GroupId) -> Result<GroupSlot, LedgerError> {
        self.groups
            .get(&id)
            .map(|slot| slot.value().clone())
            .ok_or(LedgerError::UnknownGroup(id))
    }

    async fn lock<'a>(
        &self,
        id: GroupId,
        ledger: &'a Mutex<GroupLedger>,
    ) -> Result<MutexGuard<'a, GroupLedger>, LedgerError> {
        tokio::time::timeout(self.contention_timeout, ledger.lock())
            .await
            .map_err(|_| LedgerError::ContentionTimeout(id))
    }

    async fn append(&self, entry: LedgerEntry) -> Result<SequencedEntry, LedgerError> {
        let group_id = entry.group_id();
        let slot = self.slot(group_id)?;
        let mut ledger = self.lock(group_id, &slot.ledger).await?;

        if let Some(stale) = first_stale_member(&slot.group, &entry) {
            return Err(LedgerError::StaleMembership(stale));
        }
        if let LedgerEntry::Expense(expense) = &entry {
            ledger.check_reversal(expense)?;
        }
        let projected = projected_balances(&ledger.balances, &entry)?;

        let sequenced = ledger.push(entry);
        ledger.balances.extend(projected);
        info!(
            group_id = %group_id,
            sequence = sequenced.sequence,
            entry_id = %sequenced.entry.id(),
            "Ledger entry appended"
        );
        Ok(sequenced)
    }

    /// Holds a group's append lock until the returned guard drops.
    #[cfg(test)]
    pub(crate) async fn hold_lock(&self, id: GroupId) -> tokio::sync::OwnedMutexGuard<()> {
        let slot = self.slot(id).expect("group exists");
        let gate = Arc::new(Mutex::new(()));
        let guard = Arc::clone(&gate).lock_owned().await;
        let ledger = Arc::clone(&slot.ledger);
        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _held = ledger.lock().await;
            let _ = locked_tx.send(());
            let _released = gate.lock().await;
        });
        locked_rx.await.expect("lock holder started");
        guard
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_group(&self, group: Group) -> Result<Group, LedgerError> {
        let slot = GroupSlot {
            group: Arc::new(group.clone()),
            ledger: Arc::new(Mutex::new(GroupLedger::new())),
        };
        self.groups.insert(group.id, slot);
        info!(group_id = %group.id, members = group.members.len(), "Group created");
        Ok(group)
    }

    async fn group(&self, id: GroupId) -> Result<Option<Group>, LedgerError> {
        Ok(self.groups.get(&id).map(|slot| slot.group.as_ref().clone()))
    }

    async fn groups_for_member(&self, user: UserId) -> Result<Vec<Group>, LedgerError> {
        let mut groups: Vec<Group> = self
            .groups
            .iter()
            .filter(|slot| slot.group.is_member(user))
            .map(|slot| slot.group.as_ref().clone())
            .collect();
        groups.sort_by_key(|g| (g.created_at, g.id));
        Ok(groups)
    }

    async fn append_expense(&self, expense: Expense) -> Result<SequencedEntry, LedgerError> {
        self.append(LedgerEntry::Expense(expense)).await
    }

    async fn append_settlement(
        &self,
        settlement: Settlement,
    ) -> Result<SequencedEntry, LedgerError> {
        self.append(LedgerEntry::Settlement(settlement)).await
    }

    async fn head(&self, group: GroupId) -> Result<u64, LedgerError> {
        let slot = self.slot(group)?;
        let ledger = self.lock(group, &slot.ledger).await?;
        Ok(ledger.head())
    }

    async fn history_page(
        &self,
        group: GroupId,
        window: HistoryWindow,
        limit: u32,
    ) -> Result<Vec<SequencedEntry>, LedgerError> {
        let slot = self.slot(group)?;
        let ledger = self.lock(group, &slot.ledger).await?;

        // Sequences are 1-based and gapless, so `after` is an index.
        let start = window
            .after
            .and_then(|after| usize::try_from(after).ok())
            .unwrap_or(0);
        Ok(ledger
            .entries
            .iter()
            .skip(start)
            .filter(|entry| window.contains(entry))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn expense(
        &self,
        group: GroupId,
        id: ExpenseId,
    ) -> Result<Option<Expense>, LedgerError> {
        let slot = self.slot(group)?;
        let ledger = self.lock(group, &slot.ledger).await?;
        Ok(ledger.expense(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::history_stream;
    use crate::ledger::types::{GroupKind, NewGroup, Split, SplitKind};
    use chrono::Utc;
    use futures::TryStreamExt;
    use splitledger_shared::types::{Currency, Money, SettlementId};
    use std::collections::HashSet;

    fn store() -> InMemoryLedgerStore {
        InMemoryLedgerStore::new(Duration::from_millis(200))
    }

    async fn group_of(store: &InMemoryLedgerStore, size: usize) -> (Group, Vec<UserId>) {
        let mut members: Vec<UserId> = (0..size).map(|_| UserId::new()).collect();
        members.sort();
        let group = NewGroup {
            name: "Apartment 404".into(),
            kind: GroupKind::Home,
            admin: members[0],
            members: members.clone(),
        }
        .into_group()
        .unwrap();
        let group = store.create_group(group).await.unwrap();
        (group, members)
    }

    fn settlement(group: &Group, from: UserId, to: UserId, minor: i64) -> Settlement {
        Settlement {
            id: SettlementId::new(),
            group_id: group.id,
            from,
            to,
            amount: Money::new(minor, Currency::Usd),
            created_at: Utc::now(),
        }
    }

    fn expense(group: &Group, payer: UserId, minor: i64) -> Expense {
        Expense {
            id: ExpenseId::new(),
            group_id: group.id,
            payer,
            description: "WiFi Bill".into(),
            total: Money::new(minor, Currency::Usd),
            split_kind: SplitKind::Exact,
            splits: vec![Split {
                member: payer,
                share: Money::new(minor, Currency::Usd),
            }],
            reverses: None,
            created_at: Utc::now(),
        }
    }

    fn reversal_of(original: &Expense) -> Expense {
        Expense {
            id: ExpenseId::new(),
            total: Money::new(-original.total.minor, original.total.currency),
            splits: original
                .splits
                .iter()
                .map(|s| Split {
                    member: s.member,
                    share: Money::new(-s.share.minor, s.share.currency),
                })
                .collect(),
            reverses: Some(original.id),
            ..original.clone()
        }
    }

    #[tokio::test]
    async fn test_append_assigns_gapless_sequences() {
        let store = store();
        let (group, m) = group_of(&store, 2).await;

        let first = store.append_expense(expense(&group, m[0], 900)).await.unwrap();
        let second = store
            .append_settlement(settlement(&group, m[1], m[0], 300))
            .await
            .unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(second.entry.created_at() > first.entry.created_at());
        assert_eq!(store.head(group.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_append_unknown_group() {
        let store = store();
        let (group, m) = group_of(&store, 2).await;
        let mut orphan = expense(&group, m[0], 100);
        orphan.group_id = GroupId::new();

        let result = store.append_expense(orphan).await;
        assert!(matches!(result, Err(LedgerError::UnknownGroup(_))));
    }

    #[tokio::test]
    async fn test_append_rejects_non_member() {
        let store = store();
        let (group, m) = group_of(&store, 2).await;
        let outsider = UserId::new();

        let result = store
            .append_settlement(settlement(&group, outsider, m[0], 100))
            .await;
        assert!(matches!(result, Err(LedgerError::StaleMembership(u)) if u == outsider));
        assert_eq!(store.head(group.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reversal_rules() {
        let store = store();
        let (group, m) = group_of(&store, 2).await;
        let original = expense(&group, m[0], 500);
        store.append_expense(original.clone()).await.unwrap();

        let reversal = reversal_of(&original);
        store.append_expense(reversal.clone()).await.unwrap();

        let again = store.append_expense(reversal_of(&original)).await;
        assert!(matches!(again, Err(LedgerError::AlreadyReversed(id)) if id == original.id));

        let nested = store.append_expense(reversal_of(&reversal)).await;
        assert!(matches!(nested, Err(LedgerError::CannotReverseReversal(_))));

        let mut missing = reversal_of(&original);
        missing.reverses = Some(ExpenseId::new());
        let missing = store.append_expense(missing).await;
        assert!(matches!(missing, Err(LedgerError::ExpenseNotFound(_))));

        assert_eq!(store.head(group.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_linearizable() {
        let store = Arc::new(store());
        let (group, m) = group_of(&store, 2).await;

        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let store = Arc::clone(&store);
                let group = group.clone();
                let payer = m[i % 2];
                tokio::spawn(async move { store.append_expense(expense(&group, payer, 100)).await })
            })
            .collect();

        let mut sequences = HashSet::new();
        for task in tasks {
            let entry = task.await.unwrap().unwrap();
            assert!(sequences.insert(entry.sequence));
        }

        assert_eq!(sequences.len(), 50);
        assert_eq!(sequences.iter().max(), Some(&50));
        assert_eq!(store.head(group.id).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_contention_timeout() {
        let store = store();
        let (group, m) = group_of(&store, 2).await;

        let guard = store.hold_lock(group.id).await;
        let result = store.append_expense(expense(&group, m[0], 100)).await;
        assert!(matches!(result, Err(LedgerError::ContentionTimeout(id)) if id == group.id));
        assert!(result.unwrap_err().is_retryable());

        drop(guard);
        let result = store.append_expense(expense(&group, m[0], 100)).await;
        assert_eq!(result.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_history_paging_and_stream() {
        let store = Arc::new(store());
        let (group, m) = group_of(&store, 2).await;
        for _ in 0..7 {
            store.append_expense(expense(&group, m[0], 100)).await.unwrap();
        }

        let page = store
            .history_page(group.id, HistoryWindow::between(2, 5), 10)
            .await
            .unwrap();
        assert_eq!(page.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![3, 4, 5]);

        let dyn_store: Arc<dyn LedgerStore> = store.clone();
        let all: Vec<SequencedEntry> = history_stream(dyn_store, group.id, HistoryWindow::default(), 3)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(all.len(), 7);
        assert!(all.windows(2).all(|w| w[0].sequence + 1 == w[1].sequence));
    }

    #[tokio::test]
    async fn test_append_rejects_balance_out_of_range() {
        let store = store();
        let (group, m) = group_of(&store, 2).await;

        store
            .append_settlement(settlement(&group, m[0], m[1], i64::MAX))
            .await
            .unwrap();
        let result = store
            .append_settlement(settlement(&group, m[0], m[1], 1))
            .await;
        assert!(matches!(result, Err(LedgerError::BalanceOutOfRange(u)) if u == m[0]));
        assert_eq!(store.head(group.id).await.unwrap(), 1);

        // Moving the balance back toward zero is still accepted.
        let back = store
            .append_settlement(settlement(&group, m[1], m[0], i64::MAX))
            .await
            .unwrap();
        assert_eq!(back.sequence, 2);
    }

    #[tokio::test]
    async fn test_groups_for_member() {
        let store = store();
        let (group, m) = group_of(&store, 3).await;
        let (_other, _) = group_of(&store, 2).await;

        let groups = store.groups_for_member(m[2]).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, group.id);
        assert!(store.groups_for_member(UserId::new()).await.unwrap().is_empty());
    }
}
