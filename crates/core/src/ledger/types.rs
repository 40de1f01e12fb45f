//! Ledger domain types for groups, expenses and settlements.
//!
//! Expenses and settlements are immutable once appended. Balances are never
//! stored here; they are derived by the balance engine.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use splitledger_shared::types::{ExpenseId, GroupId, Money, SettlementId, UserId};
use uuid::Uuid;

use super::error::LedgerError;

/// Group classification, carried over from the product's group picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Shared household.
    Home,
    /// Trip with friends.
    Trip,
    /// Two-person household.
    Couple,
    /// Anything else.
    Other,
}

impl GroupKind {
    /// Returns the wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Trip => "trip",
            Self::Couple => "couple",
            Self::Other => "other",
        }
    }
}

impl std::str::FromStr for GroupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "home" => Ok(Self::Home),
            "trip" => Ok(Self::Trip),
            "couple" => Ok(Self::Couple),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown group kind: {s}")),
        }
    }
}

/// An expense-sharing group.
///
/// Membership is fixed at creation; the admin is always a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group ID.
    pub id: GroupId,
    /// Display name.
    pub name: String,
    /// Group kind.
    pub kind: GroupKind,
    /// The member who created the group.
    pub admin: UserId,
    /// Members in ascending ID order.
    pub members: BTreeSet<UserId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Group {
    /// Returns true if `user` belongs to the group.
    #[must_use]
    pub fn is_member(&self, user: UserId) -> bool {
        self.members.contains(&user)
    }
}

/// Input for creating a group.
#[derive(Debug, Clone)]
pub struct NewGroup {
    /// Display name (must not be blank).
    pub name: String,
    /// Group kind.
    pub kind: GroupKind,
    /// Creating member; added to `members` if missing.
    pub admin: UserId,
    /// Initial members. Duplicates collapse.
    pub members: Vec<UserId>,
}

impl NewGroup {
    /// Validates the input and builds the group.
    pub fn into_group(self) -> Result<Group, LedgerError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::InvalidGroup("name must not be empty".into()));
        }

        let mut members: BTreeSet<UserId> = self.members.into_iter().collect();
        members.insert(self.admin);

        Ok(Group {
            id: GroupId::new(),
            name,
            kind: self.kind,
            admin: self.admin,
            members,
            created_at: Utc::now(),
        })
    }
}

/// How an expense total was divided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitKind {
    /// Evenly, with deterministic remainder distribution.
    Equal,
    /// Explicit per-member shares.
    Exact,
    /// Integer percentages summing to 100.
    Percentage,
}

impl SplitKind {
    /// Returns the wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::Exact => "exact",
            Self::Percentage => "percentage",
        }
    }
}

impl std::str::FromStr for SplitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "equal" => Ok(Self::Equal),
            "exact" => Ok(Self::Exact),
            "percentage" => Ok(Self::Percentage),
            _ => Err(format!("Unknown split kind: {s}")),
        }
    }
}

/// One member's share of an expense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    /// Participating member.
    pub member: UserId,
    /// Amount owed by the member for this expense.
    pub share: Money,
}

/// A shared expense paid by one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    /// Expense ID.
    pub id: ExpenseId,
    /// Owning group.
    pub group_id: GroupId,
    /// Member who paid.
    pub payer: UserId,
    /// Free-text description, e.g. "WiFi Bill".
    pub description: String,
    /// Amount paid. Negative only for reversals.
    pub total: Money,
    /// How the total was divided.
    pub split_kind: SplitKind,
    /// Shares in ascending member order; they sum to `total`.
    pub splits: Vec<Split>,
    /// The expense this one cancels, if it is a reversal.
    pub reverses: Option<ExpenseId>,
    /// Commit time, stamped by the store.
    pub created_at: DateTime<Utc>,
}

impl Expense {
    /// Returns true if this expense is a reversal of another one.
    #[must_use]
    pub fn is_reversal(&self) -> bool {
        self.reverses.is_some()
    }

    /// Every member referenced by the expense, payer first.
    pub fn participants(&self) -> impl Iterator<Item = UserId> + '_ {
        std::iter::once(self.payer).chain(self.splits.iter().map(|s| s.member))
    }
}

/// A real-world payment between two members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Settlement ID.
    pub id: SettlementId,
    /// Owning group.
    pub group_id: GroupId,
    /// Paying member.
    pub from: UserId,
    /// Receiving member.
    pub to: UserId,
    /// Amount paid (always positive).
    pub amount: Money,
    /// Commit time, stamped by the store.
    pub created_at: DateTime<Utc>,
}

/// An entry of a group's append-only ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEntry {
    /// A recorded expense.
    Expense(Expense),
    /// A recorded settlement.
    Settlement(Settlement),
}

impl LedgerEntry {
    /// The owning group.
    #[must_use]
    pub fn group_id(&self) -> GroupId {
        match self {
            Self::Expense(e) => e.group_id,
            Self::Settlement(s) => s.group_id,
        }
    }

    /// The entry ID as a raw UUID.
    #[must_use]
    pub fn id(&self) -> Uuid {
        match self {
            Self::Expense(e) => e.id.into_inner(),
            Self::Settlement(s) => s.id.into_inner(),
        }
    }

    /// Commit time.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Expense(e) => e.created_at,
            Self::Settlement(s) => s.created_at,
        }
    }

    /// Stamps the commit time assigned by the store.
    pub fn set_created_at(&mut self, at: DateTime<Utc>) {
        match self {
            Self::Expense(e) => e.created_at = at,
            Self::Settlement(s) => s.created_at = at,
        }
    }

    /// Net change to each referenced member's balance, in minor units.
    ///
    /// A payer who also carries a share gets a single netted delta.
    #[must_use]
    pub fn balance_deltas(&self) -> BTreeMap<UserId, i128> {
        let mut deltas: BTreeMap<UserId, i128> = BTreeMap::new();
        match self {
            Self::Expense(expense) => {
                *deltas.entry(expense.payer).or_default() += i128::from(expense.total.minor);
                for split in &expense.splits {
                    *deltas.entry(split.member).or_default() -= i128::from(split.share.minor);
                }
            }
            Self::Settlement(settlement) => {
                *deltas.entry(settlement.from).or_default() += i128::from(settlement.amount.minor);
                *deltas.entry(settlement.to).or_default() -= i128::from(settlement.amount.minor);
            }
        }
        deltas
    }
}

/// A ledger entry with its group-local insertion sequence (1-based, gapless).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedEntry {
    /// Position in the group's ledger.
    pub sequence: u64,
    /// The entry itself.
    pub entry: LedgerEntry,
}

/// Bounds for reading a slice of a group's history.
///
/// All bounds are optional; `after` is exclusive, the others inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryWindow {
    /// Only entries with a sequence greater than this.
    pub after: Option<u64>,
    /// Only entries with a sequence up to and including this.
    pub up_to: Option<u64>,
    /// Only entries committed at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Only entries committed at or before this instant.
    pub until: Option<DateTime<Utc>>,
}

impl HistoryWindow {
    /// Window covering everything after `sequence` up to `head`.
    #[must_use]
    pub fn between(after: u64, head: u64) -> Self {
        Self {
            after: Some(after),
            up_to: Some(head),
            ..Self::default()
        }
    }

    /// Returns true if the entry falls inside the window.
    #[must_use]
    pub fn contains(&self, entry: &SequencedEntry) -> bool {
        let at = entry.entry.created_at();
        self.after.is_none_or(|after| entry.sequence > after)
            && self.up_to.is_none_or(|up_to| entry.sequence <= up_to)
            && self.from.is_none_or(|from| at >= from)
            && self.until.is_none_or(|until| at <= until)
    }

    /// Returns the same window resumed after `sequence`.
    #[must_use]
    pub fn resume_after(self, sequence: u64) -> Self {
        Self {
            after: Some(sequence),
            ..self
        }
    }

    /// Returns true if no entry beyond `sequence` can match.
    #[must_use]
    pub fn exhausted_at(&self, sequence: u64) -> bool {
        self.up_to.is_some_and(|up_to| sequence >= up_to)
    }
}
