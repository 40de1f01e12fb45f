//! `SeaORM` entity definitions.

pub mod entry_splits;
pub mod group_members;
pub mod groups;
pub mod ledger_entries;
pub mod notifications;
