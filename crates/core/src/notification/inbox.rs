//! Inbox port and in-memory inbox.
//!
//! The inbox is the durable copy of every notification; live pushes are
//! best-effort on top of it.

use async_trait::async_trait;
use dashmap::DashMap;
use splitledger_shared::types::{NotificationId, PageRequest, PageResponse, UserId};

use super::error::NotificationError;
use super::types::NotificationEvent;

/// Per-user notification storage.
#[async_trait]
pub trait NotificationInbox: Send + Sync {
    /// Stores events as unread. Events already stored are ignored.
    async fn persist(&self, events: &[NotificationEvent]) -> Result<(), NotificationError>;

    /// A page of the user's notifications, newest first.
    async fn fetch(
        &self,
        user: UserId,
        page: PageRequest,
    ) -> Result<PageResponse<NotificationEvent>, NotificationError>;

    /// Number of unread notifications for the user.
    async fn unread_count(&self, user: UserId) -> Result<u64, NotificationError>;

    /// Marks the user's notifications with these IDs read.
    ///
    /// IDs belonging to other users are ignored. Returns how many changed.
    async fn mark_read(
        &self,
        user: UserId,
        ids: &[NotificationId],
    ) -> Result<u64, NotificationError>;

    /// Marks every notification of the user read. Returns how many changed.
    async fn mark_all_read(&self, user: UserId) -> Result<u64, NotificationError>;
}

/// Inbox kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryInbox {
    // Per user, ordered by (created_at, id) ascending.
    inboxes: DashMap<UserId, Vec<NotificationEvent>>,
}

impl InMemoryInbox {
    /// Creates an empty inbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationInbox for InMemoryInbox {
    async fn persist(&self, events: &[NotificationEvent]) -> Result<(), NotificationError> {
        for event in events {
            let mut inbox = self.inboxes.entry(event.recipient).or_default();
            if inbox.iter().any(|existing| existing.id == event.id) {
                continue;
            }
            let key = (event.created_at, event.id);
            let at = inbox.partition_point(|existing| (existing.created_at, existing.id) <= key);
            inbox.insert(
                at,
                NotificationEvent {
                    read: false,
                    ..event.clone()
                },
            );
        }
        Ok(())
    }

    async fn fetch(
        &self,
        user: UserId,
        page: PageRequest,
    ) -> Result<PageResponse<NotificationEvent>, NotificationError> {
        let Some(inbox) = self.inboxes.get(&user) else {
            return Ok(PageResponse::new(Vec::new(), page.page, page.per_page, 0));
        };

        let total = inbox.len() as u64;
        let data = inbox
            .iter()
            .rev()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(usize::try_from(page.limit()).unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(PageResponse::new(data, page.page, page.per_page, total))
    }

    async fn unread_count(&self, user: UserId) -> Result<u64, NotificationError> {
        Ok(self
            .inboxes
            .get(&user)
            .map_or(0, |inbox| inbox.iter().filter(|e| !e.read).count() as u64))
    }

    async fn mark_read(
        &self,
        user: UserId,
        ids: &[NotificationId],
    ) -> Result<u64, NotificationError> {
        let Some(mut inbox) = self.inboxes.get_mut(&user) else {
            return Ok(0);
        };
        let mut changed = 0;
        for event in inbox.iter_mut().filter(|e| !e.read && ids.contains(&e.id)) {
            event.read = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn mark_all_read(&self, user: UserId) -> Result<u64, NotificationError> {
        let Some(mut inbox) = self.inboxes.get_mut(&user) else {
            return Ok(0);
        };
        let mut changed = 0;
        for event in inbox.iter_mut().filter(|e| !e.read) {
            event.read = true;
            changed += 1;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::types::{NotificationKind, NotificationPayload};
    use chrono::Utc;
    use splitledger_shared::types::{Currency, GroupId, Money};
    use uuid::Uuid;

    fn event(recipient: UserId, message: &str) -> NotificationEvent {
        NotificationEvent {
            id: NotificationId::new(),
            recipient,
            kind: NotificationKind::ExpenseRecorded,
            payload: NotificationPayload {
                group_id: GroupId::new(),
                group_name: "Apartment 404".into(),
                actor: UserId::new(),
                entry_id: Uuid::now_v7(),
                amount: Money::new(900, Currency::Usd),
                message: message.into(),
            },
            created_at: Utc::now(),
            read: false,
        }
    }

    #[tokio::test]
    async fn test_fetch_newest_first_and_paginated() {
        let inbox = InMemoryInbox::new();
        let user = UserId::new();
        let base = Utc::now();
        let events: Vec<_> = (0..3)
            .map(|i| NotificationEvent {
                created_at: base + chrono::Duration::seconds(i),
                ..event(user, &format!("event {i}"))
            })
            .collect();
        inbox.persist(&events).await.unwrap();

        let page = inbox.fetch(user, PageRequest::new(1, 2)).await.unwrap();
        assert_eq!(page.meta.total, 3);
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0].payload.message, "event 2");
        assert_eq!(page.data[1].payload.message, "event 1");

        let page = inbox.fetch(user, PageRequest::new(2, 2)).await.unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].payload.message, "event 0");
    }

    #[tokio::test]
    async fn test_late_delivery_lands_in_commit_order() {
        let inbox = InMemoryInbox::new();
        let user = UserId::new();
        let base = Utc::now();
        let at = |secs: i64, message: &str| NotificationEvent {
            created_at: base + chrono::Duration::seconds(secs),
            ..event(user, message)
        };

        inbox.persist(&[at(2, "third")]).await.unwrap();
        inbox.persist(&[at(0, "first")]).await.unwrap();
        inbox.persist(&[at(1, "second")]).await.unwrap();

        let page = inbox.fetch(user, PageRequest::default()).await.unwrap();
        let messages: Vec<&str> = page.data.iter().map(|e| e.payload.message.as_str()).collect();
        assert_eq!(messages, vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_persist_is_idempotent() {
        let inbox = InMemoryInbox::new();
        let user = UserId::new();
        let e = event(user, "once");
        inbox.persist(&[e.clone()]).await.unwrap();
        inbox.persist(&[e]).await.unwrap();

        assert_eq!(inbox.unread_count(user).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_is_scoped_and_idempotent() {
        let inbox = InMemoryInbox::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let a = event(alice, "for alice");
        let b = event(bob, "for bob");
        inbox.persist(&[a.clone(), b.clone()]).await.unwrap();

        // Bob cannot mark Alice's notification.
        assert_eq!(inbox.mark_read(bob, &[a.id]).await.unwrap(), 0);
        assert_eq!(inbox.unread_count(alice).await.unwrap(), 1);

        assert_eq!(inbox.mark_read(alice, &[a.id]).await.unwrap(), 1);
        assert_eq!(inbox.mark_read(alice, &[a.id]).await.unwrap(), 0);
        assert_eq!(inbox.unread_count(alice).await.unwrap(), 0);
        assert_eq!(inbox.unread_count(bob).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_all_read() {
        let inbox = InMemoryInbox::new();
        let user = UserId::new();
        inbox
            .persist(&[event(user, "one"), event(user, "two")])
            .await
            .unwrap();

        assert_eq!(inbox.mark_all_read(user).await.unwrap(), 2);
        assert_eq!(inbox.mark_all_read(user).await.unwrap(), 0);
        assert_eq!(inbox.mark_all_read(UserId::new()).await.unwrap(), 0);
    }
}
