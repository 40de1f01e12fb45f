//! Postgres ledger store.
//!
//! Appends serialize on the group row: `SELECT ... FOR UPDATE` inside a
//! transaction with `lock_timeout`, so the sequence, membership and reversal
//! checks all see a stable ledger head.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use splitledger_core::ledger::{
    Expense, Group, GroupKind, HistoryWindow, LedgerEntry, LedgerError, LedgerStore,
    SequencedEntry, Settlement, Split, SplitKind, first_stale_member, next_commit_time,
    projected_balances,
};
use splitledger_shared::types::{Currency, ExpenseId, GroupId, Money, SettlementId, UserId};
use tracing::{error, info};
use uuid::Uuid;

use crate::entities::{entry_splits, group_members, groups, ledger_entries};

/// Ledger store backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    db: DatabaseConnection,
    contention_timeout: Duration,
}

impl PgLedgerStore {
    /// Creates a store whose appends wait at most `contention_timeout` for the
    /// group row lock.
    #[must_use]
    pub const fn new(db: DatabaseConnection, contention_timeout: Duration) -> Self {
        Self {
            db,
            contention_timeout,
        }
    }

    async fn append(&self, entry: LedgerEntry) -> Result<SequencedEntry, LedgerError> {
        let group_id = entry.group_id();
        let append = self.append_locked(entry);

        let sequenced = tokio::time::timeout(self.contention_timeout, append)
            .await
            .map_err(|_| LedgerError::ContentionTimeout(group_id))??;

        info!(
            group_id = %group_id,
            sequence = sequenced.sequence,
            entry_id = %sequenced.entry.id(),
            "Ledger entry appended"
        );
        Ok(sequenced)
    }

    async fn append_locked(&self, mut entry: LedgerEntry) -> Result<SequencedEntry, LedgerError> {
        let group_id = entry.group_id();
        let db_err = db_error(group_id);

        let txn = self.db.begin().await.map_err(&db_err)?;
        let timeout_ms = self.contention_timeout.as_millis();
        txn.execute_unprepared(&format!("SET LOCAL lock_timeout = '{timeout_ms}ms'"))
            .await
            .map_err(&db_err)?;

        // Serialization point for the group.
        let group_row = groups::Entity::find_by_id(group_id.into_inner())
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(&db_err)?
            .ok_or(LedgerError::UnknownGroup(group_id))?;
        let group = load_group(&txn, group_row.clone()).await.map_err(&db_err)?;

        if let Some(stale) = first_stale_member(&group, &entry) {
            return Err(LedgerError::StaleMembership(stale));
        }
        if let LedgerEntry::Expense(expense) = &entry {
            check_reversal(&txn, expense).await?;
        }
        let current = member_balances(&txn, group_id).await.map_err(&db_err)?;
        let projected = projected_balances(&current, &entry)?;

        let sequence = group_row.ledger_head + 1;
        let last = group_row.last_entry_at.map(|at| at.with_timezone(&Utc));
        let created_at = next_commit_time(last);
        entry.set_created_at(created_at);

        insert_entry(&txn, &entry, sequence).await.map_err(&db_err)?;

        for (member, balance) in projected {
            group_members::Entity::update_many()
                .col_expr(group_members::Column::BalanceMinor, Expr::value(balance))
                .filter(group_members::Column::GroupId.eq(group_id.into_inner()))
                .filter(group_members::Column::UserId.eq(member.into_inner()))
                .exec(&txn)
                .await
                .map_err(&db_err)?;
        }

        groups::Entity::update_many()
            .col_expr(groups::Column::LedgerHead, Expr::value(sequence))
            .col_expr(
                groups::Column::LastEntryAt,
                Expr::value(created_at.fixed_offset()),
            )
            .filter(groups::Column::Id.eq(group_id.into_inner()))
            .exec(&txn)
            .await
            .map_err(&db_err)?;

        txn.commit().await.map_err(&db_err)?;

        Ok(SequencedEntry {
            sequence: to_sequence(sequence)?,
            entry,
        })
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn create_group(&self, group: Group) -> Result<Group, LedgerError> {
        let txn = self.db.begin().await.map_err(storage_error)?;

        groups::ActiveModel {
            id: Set(group.id.into_inner()),
            name: Set(group.name.clone()),
            kind: Set(group.kind.as_str().to_string()),
            admin_id: Set(group.admin.into_inner()),
            ledger_head: Set(0),
            last_entry_at: Set(None),
            created_at: Set(group.created_at.into()),
        }
        .insert(&txn)
        .await
        .map_err(storage_error)?;

        let members = group.members.iter().map(|member| group_members::ActiveModel {
            group_id: Set(group.id.into_inner()),
            user_id: Set(member.into_inner()),
            balance_minor: Set(0),
        });
        group_members::Entity::insert_many(members)
            .exec(&txn)
            .await
            .map_err(storage_error)?;

        txn.commit().await.map_err(storage_error)?;
        info!(group_id = %group.id, members = group.members.len(), "Group created");
        Ok(group)
    }

    async fn group(&self, id: GroupId) -> Result<Option<Group>, LedgerError> {
        let Some(row) = groups::Entity::find_by_id(id.into_inner())
            .one(&self.db)
            .await
            .map_err(storage_error)?
        else {
            return Ok(None);
        };
        load_group(&self.db, row).await.map(Some).map_err(storage_error)
    }

    async fn groups_for_member(&self, user: UserId) -> Result<Vec<Group>, LedgerError> {
        let group_ids: Vec<Uuid> = group_members::Entity::find()
            .filter(group_members::Column::UserId.eq(user.into_inner()))
            .all(&self.db)
            .await
            .map_err(storage_error)?
            .into_iter()
            .map(|m| m.group_id)
            .collect();
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = groups::Entity::find()
            .filter(groups::Column::Id.is_in(group_ids.clone()))
            .order_by_asc(groups::Column::CreatedAt)
            .order_by_asc(groups::Column::Id)
            .all(&self.db)
            .await
            .map_err(storage_error)?;

        let mut members: HashMap<Uuid, BTreeSet<UserId>> = HashMap::new();
        for member in group_members::Entity::find()
            .filter(group_members::Column::GroupId.is_in(group_ids))
            .all(&self.db)
            .await
            .map_err(storage_error)?
        {
            members
                .entry(member.group_id)
                .or_default()
                .insert(UserId::from_uuid(member.user_id));
        }

        rows.into_iter()
            .map(|row| {
                let group_members = members.remove(&row.id).unwrap_or_default();
                to_group(row, group_members)
            })
            .collect()
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
        let row = groups::Entity::find_by_id(group.into_inner())
            .one(&self.db)
            .await
            .map_err(storage_error)?
            .ok_or(LedgerError::UnknownGroup(group))?;
        to_sequence(row.ledger_head)
    }

    async fn history_page(
        &self,
        group: GroupId,
        window: HistoryWindow,
        limit: u32,
    ) -> Result<Vec<SequencedEntry>, LedgerError> {
        let mut query = ledger_entries::Entity::find()
            .filter(ledger_entries::Column::GroupId.eq(group.into_inner()));
        if let Some(after) = window.after {
            query = query.filter(ledger_entries::Column::Sequence.gt(to_db_sequence(after)?));
        }
        if let Some(up_to) = window.up_to {
            query = query.filter(ledger_entries::Column::Sequence.lte(to_db_sequence(up_to)?));
        }
        if let Some(from) = window.from {
            query = query.filter(ledger_entries::Column::CreatedAt.gte(from.fixed_offset()));
        }
        if let Some(until) = window.until {
            query = query.filter(ledger_entries::Column::CreatedAt.lte(until.fixed_offset()));
        }

        let rows = query
            .order_by_asc(ledger_entries::Column::Sequence)
            .limit(u64::from(limit))
            .all(&self.db)
            .await
            .map_err(storage_error)?;

        let mut splits = load_splits(&self.db, rows.iter().map(|r| r.id).collect())
            .await
            .map_err(storage_error)?;
        rows.into_iter()
            .map(|row| {
                let entry_splits = splits.remove(&row.id).unwrap_or_default();
                to_entry(row, entry_splits)
            })
            .collect()
    }

    async fn expense(
        &self,
        group: GroupId,
        id: ExpenseId,
    ) -> Result<Option<Expense>, LedgerError> {
        let Some(row) = ledger_entries::Entity::find_by_id(id.into_inner())
            .filter(ledger_entries::Column::GroupId.eq(group.into_inner()))
            .filter(ledger_entries::Column::EntryType.eq(ledger_entries::EXPENSE))
            .one(&self.db)
            .await
            .map_err(storage_error)?
        else {
            return Ok(None);
        };

        let mut splits = load_splits(&self.db, vec![row.id])
            .await
            .map_err(storage_error)?;
        let entry_splits = splits.remove(&row.id).unwrap_or_default();
        match to_entry(row, entry_splits)?.entry {
            LedgerEntry::Expense(expense) => Ok(Some(expense)),
            LedgerEntry::Settlement(_) => Ok(None),
        }
    }
}

async fn check_reversal(txn: &DatabaseTransaction, expense: &Expense) -> Result<(), LedgerError> {
    let Some(original_id) = expense.reverses else {
        return Ok(());
    };
    let db_err = db_error(expense.group_id);

    let original = ledger_entries::Entity::find_by_id(original_id.into_inner())
        .filter(ledger_entries::Column::GroupId.eq(expense.group_id.into_inner()))
        .filter(ledger_entries::Column::EntryType.eq(ledger_entries::EXPENSE))
        .one(txn)
        .await
        .map_err(&db_err)?
        .ok_or(LedgerError::ExpenseNotFound(original_id))?;
    if original.reverses.is_some() {
        return Err(LedgerError::CannotReverseReversal(original_id));
    }

    let existing = ledger_entries::Entity::find()
        .filter(ledger_entries::Column::Reverses.eq(original_id.into_inner()))
        .one(txn)
        .await
        .map_err(&db_err)?;
    if existing.is_some() {
        return Err(LedgerError::AlreadyReversed(original_id));
    }
    Ok(())
}

async fn insert_entry(
    txn: &DatabaseTransaction,
    entry: &LedgerEntry,
    sequence: i64,
) -> Result<(), DbErr> {
    match entry {
        LedgerEntry::Expense(expense) => {
            ledger_entries::ActiveModel {
                id: Set(expense.id.into_inner()),
                group_id: Set(expense.group_id.into_inner()),
                sequence: Set(sequence),
                entry_type: Set(ledger_entries::EXPENSE.to_string()),
                actor_id: Set(expense.payer.into_inner()),
                counterparty_id: Set(None),
                description: Set(Some(expense.description.clone())),
                amount_minor: Set(expense.total.minor),
                currency: Set(expense.total.currency.to_string()),
                split_kind: Set(Some(expense.split_kind.as_str().to_string())),
                reverses: Set(expense.reverses.map(ExpenseId::into_inner)),
                created_at: Set(expense.created_at.into()),
            }
            .insert(txn)
            .await?;

            let splits = expense.splits.iter().map(|split| entry_splits::ActiveModel {
                entry_id: Set(expense.id.into_inner()),
                member_id: Set(split.member.into_inner()),
                share_minor: Set(split.share.minor),
            });
            entry_splits::Entity::insert_many(splits).exec(txn).await?;
        }
        LedgerEntry::Settlement(settlement) => {
            ledger_entries::ActiveModel {
                id: Set(settlement.id.into_inner()),
                group_id: Set(settlement.group_id.into_inner()),
                sequence: Set(sequence),
                entry_type: Set(ledger_entries::SETTLEMENT.to_string()),
                actor_id: Set(settlement.from.into_inner()),
                counterparty_id: Set(Some(settlement.to.into_inner())),
                description: Set(None),
                amount_minor: Set(settlement.amount.minor),
                currency: Set(settlement.amount.currency.to_string()),
                split_kind: Set(None),
                reverses: Set(None),
                created_at: Set(settlement.created_at.into()),
            }
            .insert(txn)
            .await?;
        }
    }
    Ok(())
}

async fn load_group<C: ConnectionTrait>(db: &C, row: groups::Model) -> Result<Group, DbErr> {
    let members = group_members::Entity::find()
        .filter(group_members::Column::GroupId.eq(row.id))
        .all(db)
        .await?
        .into_iter()
        .map(|m| UserId::from_uuid(m.user_id))
        .collect();
    to_group(row, members).map_err(|err| DbErr::Custom(err.to_string()))
}

async fn member_balances(
    txn: &DatabaseTransaction,
    group: GroupId,
) -> Result<HashMap<UserId, i64>, DbErr> {
    Ok(group_members::Entity::find()
        .filter(group_members::Column::GroupId.eq(group.into_inner()))
        .all(txn)
        .await?
        .into_iter()
        .map(|m| (UserId::from_uuid(m.user_id), m.balance_minor))
        .collect())
}

async fn load_splits<C: ConnectionTrait>(
    db: &C,
    entry_ids: Vec<Uuid>,
) -> Result<HashMap<Uuid, Vec<entry_splits::Model>>, DbErr> {
    let mut splits: HashMap<Uuid, Vec<entry_splits::Model>> = HashMap::new();
    if entry_ids.is_empty() {
        return Ok(splits);
    }

    for split in entry_splits::Entity::find()
        .filter(entry_splits::Column::EntryId.is_in(entry_ids))
        .order_by_asc(entry_splits::Column::EntryId)
        .order_by_asc(entry_splits::Column::MemberId)
        .all(db)
        .await?
    {
        splits.entry(split.entry_id).or_default().push(split);
    }
    Ok(splits)
}

fn to_group(row: groups::Model, members: BTreeSet<UserId>) -> Result<Group, LedgerError> {
    Ok(Group {
        id: GroupId::from_uuid(row.id),
        kind: row.kind.parse::<GroupKind>().map_err(LedgerError::Storage)?,
        name: row.name,
        admin: UserId::from_uuid(row.admin_id),
        members,
        created_at: row.created_at.with_timezone(&Utc),
    })
}

fn to_entry(
    row: ledger_entries::Model,
    splits: Vec<entry_splits::Model>,
) -> Result<SequencedEntry, LedgerError> {
    let currency = row
        .currency
        .parse::<Currency>()
        .map_err(LedgerError::Storage)?;
    let amount = Money::new(row.amount_minor, currency);
    let created_at = row.created_at.with_timezone(&Utc);

    let entry = match row.entry_type.as_str() {
        ledger_entries::EXPENSE => {
            let split_kind = row
                .split_kind
                .as_deref()
                .ok_or_else(|| LedgerError::Storage(format!("expense {} has no split kind", row.id)))?
                .parse::<SplitKind>()
                .map_err(LedgerError::Storage)?;
            LedgerEntry::Expense(Expense {
                id: ExpenseId::from_uuid(row.id),
                group_id: GroupId::from_uuid(row.group_id),
                payer: UserId::from_uuid(row.actor_id),
                description: row.description.unwrap_or_default(),
                total: amount,
                split_kind,
                splits: splits
                    .into_iter()
                    .map(|s| Split {
                        member: UserId::from_uuid(s.member_id),
                        share: Money::new(s.share_minor, currency),
                    })
                    .collect(),
                reverses: row.reverses.map(ExpenseId::from_uuid),
                created_at,
            })
        }
        ledger_entries::SETTLEMENT => {
            let to = row.counterparty_id.ok_or_else(|| {
                LedgerError::Storage(format!("settlement {} has no receiver", row.id))
            })?;
            LedgerEntry::Settlement(Settlement {
                id: SettlementId::from_uuid(row.id),
                group_id: GroupId::from_uuid(row.group_id),
                from: UserId::from_uuid(row.actor_id),
                to: UserId::from_uuid(to),
                amount,
                created_at,
            })
        }
        other => {
            return Err(LedgerError::Storage(format!("unknown entry type: {other}")));
        }
    };

    Ok(SequencedEntry {
        sequence: to_sequence(row.sequence)?,
        entry,
    })
}

fn to_sequence(value: i64) -> Result<u64, LedgerError> {
    u64::try_from(value).map_err(|_| LedgerError::Storage(format!("negative sequence {value}")))
}

fn to_db_sequence(value: u64) -> Result<i64, LedgerError> {
    i64::try_from(value).map_err(|_| LedgerError::Overflow)
}

fn is_lock_timeout(err: &DbErr) -> bool {
    let message = err.to_string();
    message.contains("lock timeout") || message.contains("55P03")
}

/// Maps database errors inside an append, turning lock timeouts into
/// `ContentionTimeout`.
fn db_error(group: GroupId) -> impl Fn(DbErr) -> LedgerError {
    move |err| {
        if is_lock_timeout(&err) {
            LedgerError::ContentionTimeout(group)
        } else {
            storage_error(err)
        }
    }
}

fn storage_error(err: DbErr) -> LedgerError {
    error!(error = %err, "Ledger storage failure");
    LedgerError::Storage(err.to_string())
}
