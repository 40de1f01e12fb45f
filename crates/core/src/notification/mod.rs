//! Targeted notifications for ledger mutations.
//!
//! - `dispatcher` - recipient selection and delivery
//! - `hub` - live per-user broadcast channels
//! - `inbox` - durable inbox port and in-memory implementation

pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod inbox;
pub mod types;

pub use dispatcher::NotificationDispatcher;
pub use error::NotificationError;
pub use hub::{NotificationHub, Subscription};
pub use inbox::{InMemoryInbox, NotificationInbox};
pub use types::{NotificationEvent, NotificationKind, NotificationPayload};
