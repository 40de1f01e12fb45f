//! Notification event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use splitledger_shared::types::{GroupId, Money, NotificationId, UserId};
use uuid::Uuid;

/// What happened in the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A member recorded an expense.
    ExpenseRecorded,
    /// A member reversed an expense.
    ExpenseReversed,
    /// A member recorded a settlement.
    SettlementRecorded,
}

impl NotificationKind {
    /// Returns the wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExpenseRecorded => "expense_recorded",
            Self::ExpenseReversed => "expense_reversed",
            Self::SettlementRecorded => "settlement_recorded",
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "expense_recorded" => Ok(Self::ExpenseRecorded),
            "expense_reversed" => Ok(Self::ExpenseReversed),
            "settlement_recorded" => Ok(Self::SettlementRecorded),
            _ => Err(format!("Unknown notification kind: {s}")),
        }
    }
}

/// Event details shown to the recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Group the entry belongs to.
    pub group_id: GroupId,
    /// Group display name at the time of the event.
    pub group_name: String,
    /// Member who made the change.
    pub actor: UserId,
    /// The expense or settlement ID.
    pub entry_id: Uuid,
    /// Amount of the entry.
    pub amount: Money,
    /// Human-readable summary.
    pub message: String,
}

/// A notification addressed to one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Notification ID.
    pub id: NotificationId,
    /// Member who receives it.
    pub recipient: UserId,
    /// Event kind.
    pub kind: NotificationKind,
    /// Event details.
    pub payload: NotificationPayload,
    /// When the event was produced.
    pub created_at: DateTime<Utc>,
    /// Whether the recipient has marked it read.
    pub read: bool,
}
