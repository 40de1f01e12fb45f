//! Turns ledger mutations into per-member notifications.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use splitledger_shared::types::{Money, NotificationId, UserId};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::NotificationError;
use super::hub::NotificationHub;
use super::inbox::NotificationInbox;
use super::types::{NotificationEvent, NotificationKind, NotificationPayload};
use crate::ledger::types::{Expense, Group, Settlement};

/// Builds and delivers notifications for ledger mutations.
///
/// Recipients are every group member except the actor, in ascending member
/// order. Delivery persists to the inbox first, then pushes live.
#[derive(Clone)]
pub struct NotificationDispatcher {
    inbox: Arc<dyn NotificationInbox>,
    hub: Arc<NotificationHub>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher over an inbox and a live hub.
    #[must_use]
    pub fn new(inbox: Arc<dyn NotificationInbox>, hub: Arc<NotificationHub>) -> Self {
        Self { inbox, hub }
    }

    /// The inbox notifications are persisted to.
    #[must_use]
    pub fn inbox(&self) -> &Arc<dyn NotificationInbox> {
        &self.inbox
    }

    /// The live hub notifications are pushed through.
    #[must_use]
    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// Events for a recorded expense or reversal; the payer is the actor.
    #[must_use]
    pub fn on_expense_recorded(expense: &Expense, group: &Group) -> Vec<NotificationEvent> {
        let actor = expense.payer;
        let (kind, message) = match expense.reverses {
            None => (
                NotificationKind::ExpenseRecorded,
                format!("{actor} added '{}' to {}", expense.description, group.name),
            ),
            Some(_) => {
                let original = expense
                    .description
                    .strip_prefix("Reversal: ")
                    .unwrap_or(&expense.description);
                (
                    NotificationKind::ExpenseReversed,
                    format!("{actor} reversed '{original}' in {}", group.name),
                )
            }
        };

        Self::fan_out(
            group,
            actor,
            kind,
            expense.id.into_inner(),
            expense.total,
            expense.created_at,
            &message,
        )
    }

    /// Events for a recorded settlement; the payer (`from`) is the actor.
    #[must_use]
    pub fn on_settlement_recorded(
        settlement: &Settlement,
        group: &Group,
    ) -> Vec<NotificationEvent> {
        let message = format!(
            "{} paid {} to {} in {}",
            settlement.from, settlement.amount, settlement.to, group.name
        );
        Self::fan_out(
            group,
            settlement.from,
            NotificationKind::SettlementRecorded,
            settlement.id.into_inner(),
            settlement.amount,
            settlement.created_at,
            &message,
        )
    }

    /// Persists events to the inbox, then pushes them to live receivers.
    pub async fn deliver(&self, events: &[NotificationEvent]) -> Result<(), NotificationError> {
        if events.is_empty() {
            return Ok(());
        }

        self.inbox.persist(events).await?;
        let pushed = events.iter().filter(|event| self.hub.publish(event)).count();
        debug!(
            events = events.len(),
            pushed,
            "Notifications delivered"
        );
        Ok(())
    }

    /// Delivers events on a background task. Failures are logged and dropped.
    pub fn dispatch(&self, events: Vec<NotificationEvent>) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            if let Err(err) = dispatcher.deliver(&events).await {
                warn!(
                    error = %err,
                    events = events.len(),
                    "Dropping notifications after delivery failure"
                );
            }
        })
    }

    fn fan_out(
        group: &Group,
        actor: UserId,
        kind: NotificationKind,
        entry_id: Uuid,
        amount: Money,
        created_at: DateTime<Utc>,
        message: &str,
    ) -> Vec<NotificationEvent> {
        group
            .members
            .iter()
            .filter(|member| **member != actor)
            .map(|recipient| NotificationEvent {
                id: NotificationId::new(),
                recipient: *recipient,
                kind,
                payload: NotificationPayload {
                    group_id: group.id,
                    group_name: group.name.clone(),
                    actor,
                    entry_id,
                    amount,
                    message: message.to_string(),
                },
                created_at,
                read: false,
            })
            .collect()
    }
}
