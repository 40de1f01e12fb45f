//! Core business logic for SplitLedger.
//!
//! This crate contains pure business logic with ZERO web or database dependencies.
//! All domain types, validation rules, and calculations live here.
//!
//! # Modules
//!
//! - `ledger` - Group expense ledger, balances and settlement planning
//! - `notification` - Targeted notifications for ledger mutations

pub mod ledger;
pub mod notification;
