//! Per-member net balances derived from a group's ledger.
//!
//! Positive means the group owes the member; negative means the member owes
//! the group. Balances are never stored, only folded from history and cached
//! against the head sequence they were folded up to.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::TryStreamExt;
use moka::sync::Cache;
use serde::Serialize;
use splitledger_shared::types::{Currency, GroupId, Money, UserId};
use tracing::{debug, error};

use super::error::LedgerError;
use super::store::{LedgerStore, history_stream};
use super::types::{Group, HistoryWindow, SequencedEntry};

/// Net balances of one group as of a ledger sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupBalances {
    /// The group.
    pub group_id: GroupId,
    /// Ledger currency.
    pub currency: Currency,
    /// Sequence of the last entry folded in; 0 when nothing was.
    pub as_of: u64,
    /// Net balance per member, every member present.
    pub balances: BTreeMap<UserId, Money>,
}

impl GroupBalances {
    /// All-zero balances for every member of `group`.
    #[must_use]
    pub fn empty(group: &Group, currency: Currency) -> Self {
        Self {
            group_id: group.id,
            currency,
            as_of: 0,
            balances: group
                .members
                .iter()
                .map(|member| (*member, Money::zero(currency)))
                .collect(),
        }
    }

    /// Balance of one member, zero if absent.
    #[must_use]
    pub fn balance_of(&self, member: UserId) -> Money {
        self.balances
            .get(&member)
            .copied()
            .unwrap_or(Money::zero(self.currency))
    }

    /// Folds one entry in. Entries at or below `as_of` are ignored.
    pub fn apply(&mut self, entry: &SequencedEntry) -> Result<(), LedgerError> {
        if entry.sequence <= self.as_of {
            return Ok(());
        }

        let mut updated = Vec::new();
        for (member, delta) in entry.entry.balance_deltas() {
            let balance = i128::from(self.balance_of(member).minor) + delta;
            let minor = i64::try_from(balance).map_err(|_| LedgerError::Overflow)?;
            updated.push((member, Money::new(minor, self.currency)));
        }
        self.balances.extend(updated);

        self.as_of = entry.sequence;
        Ok(())
    }

    /// Sum of all balances in minor units.
    #[must_use]
    pub fn residual(&self) -> i128 {
        self.balances.values().map(|m| i128::from(m.minor)).sum()
    }

    /// Fails with `LedgerCorruption` unless the balances sum to zero.
    pub fn verify_zero_sum(&self) -> Result<(), LedgerError> {
        match self.residual() {
            0 => Ok(()),
            residual => Err(LedgerError::LedgerCorruption { residual }),
        }
    }
}

/// One user's net balance in one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupPosition {
    /// The group.
    pub group_id: GroupId,
    /// Group display name.
    pub group_name: String,
    /// The user's net balance.
    pub balance: Money,
}

/// Derives and caches group balances.
#[derive(Clone)]
pub struct BalanceEngine {
    store: Arc<dyn LedgerStore>,
    cache: Cache<GroupId, Arc<GroupBalances>>,
    currency: Currency,
    page_size: u32,
}

impl BalanceEngine {
    /// Creates an engine over `store` keeping at most `cache_capacity` snapshots.
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        currency: Currency,
        cache_capacity: u64,
        page_size: u32,
    ) -> Self {
        Self {
            store,
            cache: Cache::builder().max_capacity(cache_capacity).build(),
            currency,
            page_size,
        }
    }

    /// Current balances of a group.
    ///
    /// Reads the head first and folds only entries up to it, extending a
    /// cached snapshot when one exists.
    pub async fn compute_balances(&self, group_id: GroupId) -> Result<GroupBalances, LedgerError> {
        let group = self
            .store
            .group(group_id)
            .await?
            .ok_or(LedgerError::UnknownGroup(group_id))?;
        let head = self.store.head(group_id).await?;

        let mut balances = match self.cache.get(&group_id) {
            Some(cached) if cached.as_of == head => {
                debug!(group_id = %group_id, as_of = head, "Balance cache hit");
                return Ok(cached.as_ref().clone());
            }
            Some(cached) if cached.as_of < head => {
                debug!(group_id = %group_id, from = cached.as_of, to = head, "Extending cached balances");
                cached.as_ref().clone()
            }
            _ => {
                debug!(group_id = %group_id, to = head, "Balance cache miss");
                GroupBalances::empty(&group, self.currency)
            }
        };

        if balances.as_of < head {
            let window = HistoryWindow::between(balances.as_of, head);
            let mut entries = history_stream(Arc::clone(&self.store), group_id, window, self.page_size);
            while let Some(entry) = entries.try_next().await? {
                balances.apply(&entry)?;
            }
        }

        Self::check(&balances)?;
        self.remember(&balances);
        Ok(balances)
    }

    /// Folds a just-committed entry into the cached snapshot, if it directly
    /// follows it.
    pub fn record_applied(&self, entry: &SequencedEntry) {
        let group_id = entry.entry.group_id();
        let Some(cached) = self.cache.get(&group_id) else {
            return;
        };
        if cached.as_of + 1 != entry.sequence {
            return;
        }

        let mut next = cached.as_ref().clone();
        match next.apply(entry).and_then(|()| Self::check(&next)) {
            Ok(()) => self.remember(&next),
            Err(_) => self.cache.invalidate(&group_id),
        }
    }

    /// Drops the cached snapshot of a group.
    pub fn invalidate(&self, group_id: GroupId) {
        self.cache.invalidate(&group_id);
    }

    fn remember(&self, balances: &GroupBalances) {
        let newer = self
            .cache
            .get(&balances.group_id)
            .is_none_or(|cached| cached.as_of < balances.as_of);
        if newer {
            self.cache
                .insert(balances.group_id, Arc::new(balances.clone()));
        }
    }

    fn check(balances: &GroupBalances) -> Result<(), LedgerError> {
        let result = balances.verify_zero_sum();
        if let Err(LedgerError::LedgerCorruption { residual }) = &result {
            error!(
                group_id = %balances.group_id,
                as_of = balances.as_of,
                residual = %residual,
                "Group balances do not sum to zero"
            );
        }
        debug_assert!(result.is_ok(), "group balances must sum to zero");
        result
    }
}
