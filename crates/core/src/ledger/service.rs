//! Ledger service orchestrating validation, storage, balances and notifications.
//!
//! Every mutation follows the same path: validate, append under the group's
//! serialization point, fold the new entry into the cached balances, then
//! hand notifications to a background task.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use splitledger_shared::config::{LedgerConfig, NotificationConfig};
use splitledger_shared::types::{
    Currency, ExpenseId, GroupId, Money, NotificationId, PageRequest, PageResponse, SettlementId,
    UserId,
};
use tracing::{info, instrument};

use super::balance::{BalanceEngine, GroupBalances, GroupPosition};
use super::error::{LedgerError, SplitError};
use super::memory::InMemoryLedgerStore;
use super::reversal::ReversalService;
use super::settlement::{SettlementPlanner, Transfer};
use super::split::{SplitInput, SplitValidator};
use super::store::{LedgerStore, history_stream};
use super::types::{
    Expense, Group, HistoryWindow, LedgerEntry, NewGroup, SequencedEntry, Settlement,
};
use crate::notification::{
    InMemoryInbox, NotificationDispatcher, NotificationError, NotificationEvent,
    NotificationHub, NotificationInbox, Subscription,
};

/// Input for recording an expense.
#[derive(Debug, Clone)]
pub struct RecordExpense {
    /// Target group.
    pub group_id: GroupId,
    /// Member who paid.
    pub payer: UserId,
    /// Free-text description.
    pub description: String,
    /// Amount paid.
    pub total: Money,
    /// Proposed split.
    pub split: SplitInput,
}

/// Input for recording a settlement.
#[derive(Debug, Clone)]
pub struct RecordSettlement {
    /// Target group.
    pub group_id: GroupId,
    /// Member who paid.
    pub from: UserId,
    /// Member who received.
    pub to: UserId,
    /// Amount paid.
    pub amount: Money,
}

/// Transport-independent entry point to the ledger.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    balances: BalanceEngine,
    notifications: NotificationDispatcher,
    currency: Currency,
    page_size: u32,
}

impl LedgerService {
    /// Creates a service over the given store and inbox.
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        inbox: Arc<dyn NotificationInbox>,
        ledger: &LedgerConfig,
        notifications: &NotificationConfig,
    ) -> Self {
        let page_size = ledger.history_page_size.max(1);
        let hub = Arc::new(NotificationHub::new(notifications.channel_capacity));
        Self {
            balances: BalanceEngine::new(
                Arc::clone(&store),
                ledger.currency,
                ledger.balance_cache_capacity,
                page_size,
            ),
            notifications: NotificationDispatcher::new(inbox, hub),
            store,
            currency: ledger.currency,
            page_size,
        }
    }

    /// Creates a service backed entirely by process memory.
    #[must_use]
    pub fn in_memory(ledger: &LedgerConfig, notifications: &NotificationConfig) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new(Duration::from_millis(
            ledger.contention_timeout_ms,
        )));
        Self::new(store, Arc::new(InMemoryInbox::new()), ledger, notifications)
    }

    /// The deployment currency.
    #[must_use]
    pub const fn currency(&self) -> Currency {
        self.currency
    }

    /// Creates a group.
    #[instrument(skip_all, fields(admin = %input.admin))]
    pub async fn create_group(&self, input: NewGroup) -> Result<Group, LedgerError> {
        let group = input.into_group()?;
        self.store.create_group(group).await
    }

    /// Looks up a group.
    pub async fn group(&self, group_id: GroupId) -> Result<Group, LedgerError> {
        self.store
            .group(group_id)
            .await?
            .ok_or(LedgerError::UnknownGroup(group_id))
    }

    /// Looks up a group on behalf of `actor`, who must be a member.
    pub async fn group_for_member(
        &self,
        group_id: GroupId,
        actor: UserId,
    ) -> Result<Group, LedgerError> {
        let group = self.group(group_id).await?;
        if group.is_member(actor) {
            Ok(group)
        } else {
            Err(LedgerError::NotAMember(actor))
        }
    }

    /// Groups `user` belongs to.
    pub async fn list_groups(&self, user: UserId) -> Result<Vec<Group>, LedgerError> {
        self.store.groups_for_member(user).await
    }

    /// Validates and records an expense.
    #[instrument(skip_all, fields(group_id = %input.group_id, payer = %input.payer))]
    pub async fn record_expense(&self, input: RecordExpense) -> Result<Expense, LedgerError> {
        let group = self.group(input.group_id).await?;
        if !group.is_member(input.payer) {
            return Err(SplitError::UnknownMember(input.payer).into());
        }
        self.ensure_currency(input.total)?;

        let normalized = SplitValidator::validate(input.total, &input.split, &group.members)?;
        let expense = Expense {
            id: ExpenseId::new(),
            group_id: group.id,
            payer: input.payer,
            description: input.description.trim().to_string(),
            total: input.total,
            split_kind: normalized.kind,
            splits: normalized.splits,
            reverses: None,
            created_at: chrono::Utc::now(),
        };

        let entry = self.store.append_expense(expense).await?;
        match self.after_append(&group, entry) {
            LedgerEntry::Expense(expense) => Ok(expense),
            LedgerEntry::Settlement(_) => Err(LedgerError::Storage(
                "store returned a settlement for an expense append".into(),
            )),
        }
    }

    /// Appends the reversal of an expense. Only its payer or the group admin
    /// may do this, and only once.
    #[instrument(skip_all, fields(group_id = %group_id, expense_id = %expense_id))]
    pub async fn reverse_expense(
        &self,
        group_id: GroupId,
        expense_id: ExpenseId,
        actor: UserId,
    ) -> Result<Expense, LedgerError> {
        let group = self.group(group_id).await?;
        let original = self
            .store
            .expense(group_id, expense_id)
            .await?
            .ok_or(LedgerError::ExpenseNotFound(expense_id))?;

        let reversal = ReversalService::create_reversal(&group, &original, actor)?;
        let entry = self.store.append_expense(reversal).await?;
        match self.after_append(&group, entry) {
            LedgerEntry::Expense(expense) => Ok(expense),
            LedgerEntry::Settlement(_) => Err(LedgerError::Storage(
                "store returned a settlement for an expense append".into(),
            )),
        }
    }

    /// Records a real-world payment between two members.
    #[instrument(skip_all, fields(group_id = %input.group_id, from = %input.from, to = %input.to))]
    pub async fn record_settlement(
        &self,
        input: RecordSettlement,
    ) -> Result<Settlement, LedgerError> {
        let group = self.group(input.group_id).await?;
        if !input.amount.is_positive() {
            return Err(LedgerError::InvalidSettlement(
                "amount must be positive".into(),
            ));
        }
        if input.from == input.to {
            return Err(LedgerError::InvalidSettlement(
                "payer and receiver must differ".into(),
            ));
        }
        for member in [input.from, input.to] {
            if !group.is_member(member) {
                return Err(LedgerError::InvalidSettlement(format!(
                    "user {member} is not a member of this group"
                )));
            }
        }
        self.ensure_currency(input.amount)?;

        let settlement = Settlement {
            id: SettlementId::new(),
            group_id: group.id,
            from: input.from,
            to: input.to,
            amount: input.amount,
            created_at: chrono::Utc::now(),
        };

        let entry = self.store.append_settlement(settlement).await?;
        match self.after_append(&group, entry) {
            LedgerEntry::Settlement(settlement) => Ok(settlement),
            LedgerEntry::Expense(_) => Err(LedgerError::Storage(
                "store returned an expense for a settlement append".into(),
            )),
        }
    }

    /// Current net balances of a group.
    pub async fn get_balances(&self, group_id: GroupId) -> Result<GroupBalances, LedgerError> {
        self.balances.compute_balances(group_id).await
    }

    /// Suggested transfers that would settle the group.
    pub async fn get_settlement_plan(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<Transfer>, LedgerError> {
        let balances = self.get_balances(group_id).await?;
        SettlementPlanner::plan(&balances)
    }

    /// Lazily streams the group's history inside `window`.
    pub async fn get_history(
        &self,
        group_id: GroupId,
        window: HistoryWindow,
    ) -> Result<BoxStream<'static, Result<SequencedEntry, LedgerError>>, LedgerError> {
        self.group(group_id).await?;
        Ok(history_stream(
            Arc::clone(&self.store),
            group_id,
            window,
            self.page_size,
        ))
    }

    /// One page of the group's history. `limit` is capped at the configured
    /// page size.
    pub async fn history_page(
        &self,
        group_id: GroupId,
        window: HistoryWindow,
        limit: u32,
    ) -> Result<Vec<SequencedEntry>, LedgerError> {
        self.group(group_id).await?;
        self.store
            .history_page(group_id, window, self.history_limit(limit))
            .await
    }

    /// The page size `history_page` actually uses for a requested `limit`.
    #[must_use]
    pub fn history_limit(&self, limit: u32) -> u32 {
        limit.clamp(1, self.page_size)
    }

    /// The user's net balance in every group they belong to.
    pub async fn member_position(&self, user: UserId) -> Result<Vec<GroupPosition>, LedgerError> {
        let groups = self.list_groups(user).await?;
        let mut positions = Vec::with_capacity(groups.len());
        for group in groups {
            let balances = self.get_balances(group.id).await?;
            positions.push(GroupPosition {
                group_id: group.id,
                balance: balances.balance_of(user),
                group_name: group.name,
            });
        }
        Ok(positions)
    }

    /// Opens a live notification channel for `user`.
    pub fn subscribe(&self, user: UserId) -> Subscription {
        self.notifications.hub().subscribe(user)
    }

    /// A page of the user's inbox, newest first.
    pub async fn fetch_inbox(
        &self,
        user: UserId,
        page: PageRequest,
    ) -> Result<PageResponse<NotificationEvent>, NotificationError> {
        self.notifications.inbox().fetch(user, page).await
    }

    /// Unread notifications of the user.
    pub async fn unread_count(&self, user: UserId) -> Result<u64, NotificationError> {
        self.notifications.inbox().unread_count(user).await
    }

    /// Marks some of the user's notifications read.
    pub async fn mark_read(
        &self,
        user: UserId,
        ids: &[NotificationId],
    ) -> Result<u64, NotificationError> {
        self.notifications.inbox().mark_read(user, ids).await
    }

    /// Marks all of the user's notifications read.
    pub async fn mark_all_read(&self, user: UserId) -> Result<u64, NotificationError> {
        self.notifications.inbox().mark_all_read(user).await
    }

    fn ensure_currency(&self, amount: Money) -> Result<(), LedgerError> {
        if amount.currency == self.currency {
            Ok(())
        } else {
            Err(SplitError::CurrencyMismatch {
                expected: self.currency,
                actual: amount.currency,
            }
            .into())
        }
    }

    fn after_append(&self, group: &Group, entry: SequencedEntry) -> LedgerEntry {
        self.balances.record_applied(&entry);

        let events = match &entry.entry {
            LedgerEntry::Expense(expense) => NotificationDispatcher::on_expense_recorded(expense, group),
            LedgerEntry::Settlement(settlement) => {
                NotificationDispatcher::on_settlement_recorded(settlement, group)
            }
        };
        info!(
            group_id = %group.id,
            sequence = entry.sequence,
            recipients = events.len(),
            "Ledger mutation committed"
        );
        // Detached: delivery never blocks or fails the append.
        drop(self.notifications.dispatch(events));

        entry.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::{GroupKind, SplitKind};
    use futures::TryStreamExt;
    use splitledger_shared::types::Currency;

    fn service() -> LedgerService {
        LedgerService::in_memory(&LedgerConfig::default(), &NotificationConfig::default())
    }

    fn usd(minor: i64) -> Money {
        Money::new(minor, Currency::Usd)
    }

    /// Three members in ascending ID order, A as admin.
    async fn abc(service: &LedgerService) -> (Group, UserId, UserId, UserId) {
        let mut ids: Vec<UserId> = (0..3).map(|_| UserId::new()).collect();
        ids.sort();
        let group = service
            .create_group(NewGroup {
                name: "Apartment 404".into(),
                kind: GroupKind::Home,
                admin: ids[0],
                members: ids.clone(),
            })
            .await
            .unwrap();
        (group, ids[0], ids[1], ids[2])
    }

    fn equal(group: &Group, payer: UserId, minor: i64, description: &str) -> RecordExpense {
        RecordExpense {
            group_id: group.id,
            payer,
            description: description.into(),
            total: usd(minor),
            split: SplitInput::Equal {
                members: group.members.iter().copied().collect(),
            },
        }
    }

    fn balance_map(balances: &GroupBalances) -> Vec<(UserId, i64)> {
        balances
            .balances
            .iter()
            .map(|(member, money)| (*member, money.minor))
            .collect()
    }

    async fn wait_for_unread(service: &LedgerService, user: UserId, expected: u64) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while service.unread_count(user).await.unwrap() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("notifications delivered");
    }

    #[tokio::test]
    async fn test_equal_expense_then_settlement_then_plan() {
        let service = service();
        let (group, a, b, c) = abc(&service).await;

        service.record_expense(equal(&group, a, 900, "WiFi Bill")).await.unwrap();
        let balances = service.get_balances(group.id).await.unwrap();
        assert_eq!(balance_map(&balances), vec![(a, 600), (b, -300), (c, -300)]);

        service
            .record_settlement(RecordSettlement {
                group_id: group.id,
                from: b,
                to: a,
                amount: usd(300),
            })
            .await
            .unwrap();
        let balances = service.get_balances(group.id).await.unwrap();
        assert_eq!(balance_map(&balances), vec![(a, 300), (b, 0), (c, -300)]);

        let plan = service.get_settlement_plan(group.id).await.unwrap();
        assert_eq!(plan, vec![Transfer { from: c, to: a, amount: usd(300) }]);
    }

    #[tokio::test]
    async fn test_percentage_expense() {
        let service = service();
        let (group, a, b, c) = abc(&service).await;

        let expense = service
            .record_expense(RecordExpense {
                group_id: group.id,
                payer: a,
                description: "Groceries".into(),
                total: usd(1000),
                split: SplitInput::Percentage {
                    percentages: vec![(c, 34), (a, 33), (b, 33)],
                },
            })
            .await
            .unwrap();

        assert_eq!(expense.split_kind, SplitKind::Percentage);
        let shares: Vec<i64> = expense.splits.iter().map(|s| s.share.minor).collect();
        assert_eq!(shares, vec![330, 330, 340]);
    }

    #[tokio::test]
    async fn test_equal_split_remainder() {
        let service = service();
        let (group, a, b, c) = abc(&service).await;

        let expense = service.record_expense(equal(&group, b, 100, "Snacks")).await.unwrap();
        let shares: Vec<(UserId, i64)> =
            expense.splits.iter().map(|s| (s.member, s.share.minor)).collect();
        assert_eq!(shares, vec![(a, 34), (b, 33), (c, 33)]);
    }

    #[tokio::test]
    async fn test_reversal_restores_prior_balances() {
        let service = service();
        let (group, a, b, _c) = abc(&service).await;

        service.record_expense(equal(&group, a, 900, "WiFi Bill")).await.unwrap();
        let before = service.get_balances(group.id).await.unwrap();

        let mistake = service.record_expense(equal(&group, b, 1500, "Maid Salary")).await.unwrap();
        let reversal = service.reverse_expense(group.id, mistake.id, b).await.unwrap();
        assert_eq!(reversal.reverses, Some(mistake.id));

        let after = service.get_balances(group.id).await.unwrap();
        assert_eq!(balance_map(&after), balance_map(&before));
        assert_eq!(after.as_of, 3);

        let again = service.reverse_expense(group.id, mistake.id, a).await;
        assert!(matches!(again, Err(LedgerError::AlreadyReversed(_))));
    }

    #[tokio::test]
    async fn test_reversal_requires_payer_or_admin() {
        let service = service();
        let (group, _a, b, c) = abc(&service).await;
        let expense = service.record_expense(equal(&group, b, 300, "Taxi")).await.unwrap();

        let result = service.reverse_expense(group.id, expense.id, c).await;
        assert!(matches!(result, Err(LedgerError::ReversalNotPermitted(_))));

        let missing = service.reverse_expense(group.id, ExpenseId::new(), b).await;
        assert!(matches!(missing, Err(LedgerError::ExpenseNotFound(_))));
    }

    #[tokio::test]
    async fn test_rejections_leave_ledger_untouched() {
        let service = service();
        let (group, a, b, _c) = abc(&service).await;
        let outsider = UserId::new();

        let bad_split = service
            .record_expense(RecordExpense {
                split: SplitInput::Exact {
                    shares: vec![(a, usd(500)), (b, usd(300))],
                },
                ..equal(&group, a, 900, "Seafood Dinner")
            })
            .await;
        assert!(matches!(
            bad_split,
            Err(LedgerError::Split(SplitError::SplitMismatch { discrepancy: -100 }))
        ));

        let bad_payer = service.record_expense(equal(&group, outsider, 900, "x")).await;
        assert!(matches!(
            bad_payer,
            Err(LedgerError::Split(SplitError::UnknownMember(_)))
        ));

        let wrong_currency = service
            .record_expense(RecordExpense {
                total: Money::new(900, Currency::Eur),
                ..equal(&group, a, 900, "x")
            })
            .await;
        assert!(matches!(
            wrong_currency,
            Err(LedgerError::Split(SplitError::CurrencyMismatch { .. }))
        ));

        for (from, to, minor) in [(a, a, 100), (a, b, 0), (a, outsider, 100)] {
            let result = service
                .record_settlement(RecordSettlement {
                    group_id: group.id,
                    from,
                    to,
                    amount: usd(minor),
                })
                .await;
            assert!(matches!(result, Err(LedgerError::InvalidSettlement(_))));
        }

        let unknown = service.get_balances(GroupId::new()).await;
        assert!(matches!(unknown, Err(LedgerError::UnknownGroup(_))));

        let balances = service.get_balances(group.id).await.unwrap();
        assert_eq!(balances.as_of, 0);
    }

    #[tokio::test]
    async fn test_expense_overflowing_balances_is_rejected() {
        let service = service();
        let (group, a, b, _c) = abc(&service).await;
        let huge = RecordExpense {
            split: SplitInput::Exact {
                shares: vec![(b, usd(i64::MAX))],
            },
            ..equal(&group, a, i64::MAX, "Hotel Booking")
        };

        service.record_expense(huge.clone()).await.unwrap();
        let result = service.record_expense(huge).await;
        assert!(matches!(result, Err(LedgerError::BalanceOutOfRange(u)) if u == a));

        let balances = service.get_balances(group.id).await.unwrap();
        assert_eq!(balances.as_of, 1);
        assert_eq!(balances.balance_of(a), usd(i64::MAX));
        assert_eq!(balances.balance_of(b), usd(-i64::MAX));

        let plan = service.get_settlement_plan(group.id).await.unwrap();
        assert_eq!(plan, vec![Transfer { from: b, to: a, amount: usd(i64::MAX) }]);
    }

    #[tokio::test]
    async fn test_concurrent_expenses_keep_zero_sum() {
        let service = service();
        let (group, a, b, c) = abc(&service).await;

        let tasks: Vec<_> = [a, b, c]
            .into_iter()
            .cycle()
            .take(30)
            .enumerate()
            .map(|(i, payer)| {
                let service = service.clone();
                let input = equal(&group, payer, 100 + i64::try_from(i).unwrap(), "Round");
                tokio::spawn(async move { service.record_expense(input).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let balances = service.get_balances(group.id).await.unwrap();
        assert_eq!(balances.as_of, 30);
        assert_eq!(balances.residual(), 0);

        let history: Vec<SequencedEntry> = service
            .get_history(group.id, HistoryWindow::default())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let sequences: Vec<u64> = history.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=30).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_notifications_skip_actor_and_reach_inbox() {
        let service = service();
        let (group, a, b, c) = abc(&service).await;
        let mut b_live = service.subscribe(b);

        service.record_expense(equal(&group, a, 900, "WiFi Bill")).await.unwrap();

        let live = tokio::time::timeout(Duration::from_secs(2), b_live.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(live.recipient, b);
        assert_eq!(live.payload.message, format!("{a} added 'WiFi Bill' to Apartment 404"));

        wait_for_unread(&service, c, 1).await;
        wait_for_unread(&service, b, 1).await;
        assert_eq!(service.unread_count(a).await.unwrap(), 0);

        let inbox = service.fetch_inbox(c, PageRequest::default()).await.unwrap();
        assert_eq!(inbox.data.len(), 1);
        assert_eq!(service.mark_read(c, &[inbox.data[0].id]).await.unwrap(), 1);
        assert_eq!(service.mark_all_read(b).await.unwrap(), 1);
        assert_eq!(service.unread_count(c).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_inbox_order_follows_ledger_order() {
        let service = service();
        let (group, a, b, _c) = abc(&service).await;

        let mut recorded = Vec::new();
        for description in ["WiFi Bill", "Maid Salary", "Groceries"] {
            recorded.push(service.record_expense(equal(&group, a, 300, description)).await.unwrap());
        }
        wait_for_unread(&service, b, 3).await;

        let inbox = service.fetch_inbox(b, PageRequest::default()).await.unwrap();
        let delivered: Vec<_> = inbox
            .data
            .iter()
            .map(|e| (e.payload.entry_id, e.created_at))
            .collect();
        let expected: Vec<_> = recorded
            .iter()
            .rev()
            .map(|e| (e.id.into_inner(), e.created_at))
            .collect();
        assert_eq!(delivered, expected);
    }

    #[tokio::test]
    async fn test_member_position() {
        let service = service();
        let (home, a, b, _c) = abc(&service).await;
        let trip = service
            .create_group(NewGroup {
                name: "Goa Trip".into(),
                kind: GroupKind::Trip,
                admin: b,
                members: vec![a],
            })
            .await
            .unwrap();

        service.record_expense(equal(&home, a, 900, "WiFi Bill")).await.unwrap();
        service.record_expense(equal(&trip, b, 1000, "Hotel Booking")).await.unwrap();

        let positions = service.member_position(a).await.unwrap();
        assert_eq!(positions.len(), 2);
        let home_pos = positions.iter().find(|p| p.group_id == home.id).unwrap();
        let trip_pos = positions.iter().find(|p| p.group_id == trip.id).unwrap();
        assert_eq!(home_pos.balance, usd(600));
        assert_eq!(trip_pos.balance, usd(-500));
        assert_eq!(trip_pos.group_name, "Goa Trip");
    }

    #[tokio::test]
    async fn test_group_for_member_rejects_outsider() {
        let service = service();
        let (group, a, _b, _c) = abc(&service).await;

        assert!(service.group_for_member(group.id, a).await.is_ok());
        let result = service.group_for_member(group.id, UserId::new()).await;
        assert!(matches!(result, Err(LedgerError::NotAMember(_))));
    }

    #[tokio::test]
    async fn test_history_page_respects_window() {
        let service = service();
        let (group, a, _b, _c) = abc(&service).await;
        for i in 0..5 {
            service
                .record_expense(equal(&group, a, 300, &format!("Expense {i}")))
                .await
                .unwrap();
        }

        let page = service
            .history_page(group.id, HistoryWindow { after: Some(1), ..HistoryWindow::default() }, 2)
            .await
            .unwrap();
        let sequences: Vec<u64> = page.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![2, 3]);
    }
}
