//! Store implementations for data access.
//!
//! Each repository implements a port from `splitledger-core`, hiding the
//! `SeaORM` details from the rest of the application.

pub mod ledger;
pub mod notification;

pub use ledger::PgLedgerStore;
pub use notification::PgNotificationInbox;
