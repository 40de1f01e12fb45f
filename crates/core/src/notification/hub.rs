//! Live per-user notification channels.

use std::sync::Arc;

use dashmap::DashMap;
use splitledger_shared::types::UserId;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;

use super::types::NotificationEvent;

/// Fan-out of live notifications to connected users.
///
/// Each user has one broadcast channel shared by all of their connections.
/// Publishing to a user with no open receiver is a no-op. A user's channel
/// is removed when their last [`Subscription`] drops.
#[derive(Debug)]
pub struct NotificationHub {
    channels: Arc<DashMap<UserId, broadcast::Sender<NotificationEvent>>>,
    capacity: usize,
}

/// A live receiver for one user's notifications.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<NotificationEvent>,
    user: UserId,
    channels: Arc<DashMap<UserId, broadcast::Sender<NotificationEvent>>>,
}

impl Subscription {
    /// Waits for the next event.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged` when this receiver fell behind the channel buffer.
    pub async fn recv(&mut self) -> Result<NotificationEvent, RecvError> {
        self.receiver.recv().await
    }

    /// Returns the next buffered event without waiting.
    ///
    /// # Errors
    ///
    /// `TryRecvError::Empty` when nothing is buffered.
    pub fn try_recv(&mut self) -> Result<NotificationEvent, TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Our own receiver is still alive here, so one means "last".
        let removed = self
            .channels
            .remove_if(&self.user, |_, sender| sender.receiver_count() <= 1);
        if removed.is_some() {
            debug!(user = %self.user, "Live notification channel closed");
        }
    }
}

impl NotificationHub {
    /// Creates a hub buffering up to `capacity` events per user.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Opens a live channel for `user`.
    pub fn subscribe(&self, user: UserId) -> Subscription {
        let receiver = self
            .channels
            .entry(user)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Subscription {
            receiver,
            user,
            channels: Arc::clone(&self.channels),
        }
    }

    /// Pushes an event to its recipient if connected. Returns true if at
    /// least one receiver got it.
    pub fn publish(&self, event: &NotificationEvent) -> bool {
        let Some(sender) = self
            .channels
            .get(&event.recipient)
            .map(|entry| entry.value().clone())
        else {
            return false;
        };

        if sender.send(event.clone()).is_ok() {
            return true;
        }

        // Every receiver is gone; drop the channel unless someone resubscribed.
        self.channels
            .remove_if(&event.recipient, |_, s| s.receiver_count() == 0);
        debug!(recipient = %event.recipient, "No live receivers for notification");
        false
    }

    /// Returns true if `user` has an open receiver.
    #[must_use]
    pub fn is_connected(&self, user: UserId) -> bool {
        self.channels
            .get(&user)
            .is_some_and(|sender| sender.receiver_count() > 0)
    }
}
